use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::Account;

/// Run-wide options from the `[options]` table. Everything here can be
/// overridden from the command line.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Options {
    pub days: Option<u32>,
    pub local_folder: Option<PathBuf>,
    pub wkhtmltopdf: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl Config {
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

fn default_config_path() -> Result<PathBuf> {
    if let Ok(p) = env::var("MAILSTASH_CONFIG") {
        return Ok(PathBuf::from(p));
    }
    let base = dirs::config_dir().context("no config directory for this platform")?;
    Ok(base.join("mailstash").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_accounts_and_options() {
        let raw = r#"
            [options]
            days = 30
            local_folder = "/var/mail-archive"

            [[accounts]]
            name = "work"
            host = "imap.example.com"
            username = "me@example.com"
            password = "hunter2"
            remote_folder = "ALL"

            [[accounts]]
            name = "old"
            host = "mail.old.example"
            port = 143
            username = "me"
            password = "pw"
            use_tls = false
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.options.days, Some(30));
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].port, 993);
        assert_eq!(config.accounts[0].remote_folder, "ALL");
        assert_eq!(config.accounts[1].port, 143);
        assert!(!config.accounts[1].use_tls);
        // unspecified folder spec defaults to INBOX
        assert_eq!(config.accounts[1].remote_folder, "INBOX");
    }
}
