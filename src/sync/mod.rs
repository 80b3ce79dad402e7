//! Top-level sync driver: per account, resolve the folder list, enumerate
//! candidate messages, fetch each one, skip entries already archived, and
//! decompose the rest into artifacts. Accounts, folders, and messages are
//! processed strictly sequentially; retry/reconnect state never has to
//! reconcile in-flight work.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::errors::AppError;
use crate::imap::{self, MailSession, SEARCH_PAGE_SIZE};
use crate::message;
use crate::pdf;
use crate::storage::{self, EntryWriter};
use crate::types::{Account, FolderSpec, FolderSummary, JobOptions};

pub struct SyncEngine {
    options: JobOptions,
}

impl SyncEngine {
    pub fn new(options: JobOptions) -> Self {
        Self { options }
    }

    /// Archive every account in turn. Per-account failures are logged and
    /// skipped; only an exhausted reconnect budget escalates, so a flaky
    /// server can never silently truncate the archive.
    pub async fn sync_all(&self, accounts: &[Account]) -> Result<FolderSummary> {
        let mut totals = FolderSummary::default();
        for account in accounts {
            info!(account = %account.name, host = %account.host, "Starting archive run");
            match self.sync_account(account).await {
                Ok(summary) => {
                    totals.saved += summary.saved;
                    totals.existed += summary.existed;
                }
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    warn!(account = %account.name, error = %e, "Account skipped");
                }
            }
        }
        Ok(totals)
    }

    async fn sync_account(&self, account: &Account) -> Result<FolderSummary> {
        let mut session = imap::connect(account).await?;

        let folders = match account.folder_spec() {
            FolderSpec::All => match session.list_folders().await {
                Ok(folders) => folders,
                Err(e) => {
                    session.logout().await;
                    return Err(e.into());
                }
            },
            FolderSpec::Named(folders) => folders,
        };

        let criterion = imap::search_criterion(self.options.days_back, Utc::now().date_naive());
        let mut totals = FolderSummary::default();
        for folder in &folders {
            match self.sync_folder(&mut session, account, folder, &criterion).await {
                Ok(summary) => {
                    println!(
                        "{}/{} - {}/{}/{}",
                        account.name,
                        folder,
                        summary.saved,
                        summary.existed,
                        summary.total()
                    );
                    info!(
                        account = %account.name,
                        folder = %folder,
                        saved = summary.saved,
                        existed = summary.existed,
                        total = summary.total(),
                        "Folder archived"
                    );
                    totals.saved += summary.saved;
                    totals.existed += summary.existed;
                }
                Err(e) if is_fatal(&e) => {
                    session.logout().await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(account = %account.name, folder = %folder, error = %e, "Folder skipped");
                }
            }
        }

        session.logout().await;
        Ok(totals)
    }

    async fn sync_folder(
        &self,
        session: &mut MailSession,
        account: &Account,
        folder: &str,
        criterion: &str,
    ) -> Result<FolderSummary> {
        session.select_folder(folder).await?;
        let ids = session.search_ids(criterion, SEARCH_PAGE_SIZE).await?;

        let mut summary = FolderSummary::default();
        for seq in ids {
            match self.archive_one(session, seq).await {
                Ok(Some(true)) => summary.saved += 1,
                Ok(Some(false)) => summary.existed += 1,
                // abandoned after a protocol abort: neither saved nor existed
                Ok(None) => {}
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    warn!(account = %account.name, folder = %folder, seq, error = %e, "Message skipped");
                }
            }
        }
        Ok(summary)
    }

    /// Fetch and archive one message. `Some(true)` = newly saved,
    /// `Some(false)` = entry already existed, `None` = abandoned this run.
    async fn archive_one(&self, session: &mut MailSession, seq: u32) -> Result<Option<bool>> {
        let Some(raw) = session.fetch_raw(seq).await? else {
            return Ok(None);
        };

        let parsed = mailparse::parse_mail(&raw)
            .map_err(|e| AppError::Decode(format!("parsing message {seq}: {e}")))?;
        let message_id = message::headers::header_value(&parsed, "Message-Id");
        let date = message::headers::header_value(&parsed, "Date");

        let dir = storage::entry_dir(
            &self.options.local_root,
            date.as_deref(),
            message_id.as_deref().map(str::trim),
            &raw,
        );
        let Some(writer) = EntryWriter::stage(&dir)? else {
            return Ok(Some(false));
        };

        // The raw copy goes down first; derivation failures must not cost us
        // the archival payload.
        if let Err(e) = message::write_raw(writer.dir(), &raw) {
            warn!(path = %dir.display(), error = %e, "Raw copy failed");
        }

        match message::decompose(&parsed) {
            Ok(msg) => {
                if let Err(e) = message::write_artifacts(writer.dir(), &msg) {
                    warn!(path = %dir.display(), error = %e, "Artifact generation incomplete");
                } else if self.options.pdf_renderer_available {
                    if let Some(renderer) = &self.options.pdf_renderer {
                        if let Err(e) = pdf::render_pdf(renderer, writer.dir()).await {
                            warn!(path = %dir.display(), error = %e, "PDF rendering failed");
                        }
                    }
                }
            }
            Err(e) => {
                // Counted as processed; the entry keeps whatever was written.
                warn!(path = %dir.display(), error = %e, "Message decode failed");
            }
        }

        let saved = writer.publish()?;
        Ok(Some(saved))
    }
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<AppError>()
        .map(AppError::is_fatal)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exhausted_retries_are_fatal() {
        let fatal: anyhow::Error = AppError::RetriesExhausted {
            attempts: 5,
            last: "connection lost".into(),
        }
        .into();
        assert!(is_fatal(&fatal));

        let auth: anyhow::Error = AppError::Auth("LOGIN failed".into()).into();
        assert!(!is_fatal(&auth));
        let other = anyhow::anyhow!("disk full");
        assert!(!is_fatal(&other));
    }
}
