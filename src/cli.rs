use std::path::PathBuf;

use clap::Parser;

/// Command-line options for mailstash.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Config file path (default: ~/.config/mailstash/config.toml).
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Only process the account with this name.
    #[arg(short = 'a', long)]
    pub account: Option<String>,

    /// Archive only messages sent in the last N days.
    #[arg(short = 'd', long)]
    pub days: Option<u32>,

    /// Local root of the archive tree (overrides config).
    #[arg(short = 'l', long)]
    pub local_folder: Option<PathBuf>,

    /// Remote folder override for all accounts: a name, a comma-separated
    /// list, or ALL.
    #[arg(short = 'f', long)]
    pub folder: Option<String>,

    /// Path to wkhtmltopdf for optional PDF rendering.
    #[arg(short = 'w', long)]
    pub wkhtmltopdf: Option<PathBuf>,
}
