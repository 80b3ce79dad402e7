use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::Config;
use crate::pdf;
use crate::sync::SyncEngine;
use crate::types::JobOptions;

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    let mut accounts = config.accounts;
    if let Some(name) = &cli.account {
        accounts.retain(|a| &a.name == name);
        if accounts.is_empty() {
            bail!("no account named {name} in config");
        }
    }
    if accounts.is_empty() {
        warn!("No accounts configured; nothing to do");
        return Ok(());
    }
    if let Some(folder) = &cli.folder {
        for account in &mut accounts {
            account.remote_folder = folder.clone();
        }
    }

    let local_root = cli
        .local_folder
        .or(config.options.local_folder)
        .unwrap_or_else(|| ".".into());
    let pdf_renderer = cli.wkhtmltopdf.or(config.options.wkhtmltopdf);
    let pdf_renderer_available = pdf::renderer_available(pdf_renderer.as_deref());
    if let Some(renderer) = &pdf_renderer {
        if !pdf_renderer_available {
            warn!(renderer = %renderer.display(), "PDF renderer not found; skipping PDF generation");
        }
    }

    let options = JobOptions {
        days_back: cli.days.or(config.options.days),
        local_root,
        pdf_renderer,
        pdf_renderer_available,
    };
    info!(
        root = %options.local_root.display(),
        days = ?options.days_back,
        accounts = accounts.len(),
        "Archive run starting"
    );

    let engine = SyncEngine::new(options);
    let totals = engine.sync_all(&accounts).await?;

    println!("total - {}/{}/{}", totals.saved, totals.existed, totals.total());
    Ok(())
}
