use std::path::PathBuf;

use serde::Deserialize;

/// One IMAP account as resolved from config. Immutable for the duration of a
/// run.
#[derive(Clone, Debug, Deserialize)]
pub struct Account {
    pub name: String,
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Literal folder name, comma-separated list, or the `ALL` sentinel.
    #[serde(default = "default_folder_spec")]
    pub remote_folder: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

fn default_imap_port() -> u16 {
    993
}

fn default_folder_spec() -> String {
    "INBOX".to_string()
}

fn default_true() -> bool {
    true
}

/// Which remote folders a run covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FolderSpec {
    /// Every selectable folder the server reports.
    All,
    /// An explicit list, in configured order.
    Named(Vec<String>),
}

impl Account {
    pub fn folder_spec(&self) -> FolderSpec {
        if self.remote_folder.trim().eq_ignore_ascii_case("ALL") {
            FolderSpec::All
        } else {
            FolderSpec::Named(
                self.remote_folder
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect(),
            )
        }
    }
}

/// Per-run options consumed by the sync engine.
#[derive(Clone, Debug)]
pub struct JobOptions {
    /// Restrict enumeration to messages sent on/after `today - days_back`.
    pub days_back: Option<u32>,
    /// Root of the local archive tree.
    pub local_root: PathBuf,
    /// External HTML-to-PDF renderer, e.g. wkhtmltopdf.
    pub pdf_renderer: Option<PathBuf>,
    /// Resolved once at startup; the decomposer never probes.
    pub pdf_renderer_available: bool,
}

/// Tally for one (account, folder) pair.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FolderSummary {
    pub saved: u64,
    pub existed: u64,
}

impl FolderSummary {
    pub fn total(&self) -> u64 {
        self.saved + self.existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(spec: &str) -> Account {
        Account {
            name: "a".into(),
            host: "imap.example.com".into(),
            port: 993,
            username: "u".into(),
            password: "p".into(),
            remote_folder: spec.into(),
            use_tls: true,
        }
    }

    #[test]
    fn folder_spec_all_sentinel() {
        assert_eq!(account("ALL").folder_spec(), FolderSpec::All);
        assert_eq!(account("all").folder_spec(), FolderSpec::All);
    }

    #[test]
    fn folder_spec_comma_list() {
        assert_eq!(
            account("INBOX, Sent ,Archive.2023").folder_spec(),
            FolderSpec::Named(vec![
                "INBOX".into(),
                "Sent".into(),
                "Archive.2023".into()
            ])
        );
    }
}
