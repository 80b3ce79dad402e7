//! IMAP session lifecycle: TLS-or-plaintext connect, LOGIN, folder selection
//! with a separator-normalization retry, bounded reconnect-and-resume on
//! transient resets, and paginated search.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_imap::types::{Fetch, NameAttribute};
use async_imap::Session;
use chrono::NaiveDate;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::errors::{classify, AppError, AppResult};
use crate::storage::{normalize_server_folder_name, swap_folder_separators};
use crate::types::Account;

/// Transient resets beyond this many reconnect attempts abort the process.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Sequence-number window per SEARCH request.
pub const SEARCH_PAGE_SIZE: u32 = 5000;

const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Either transport, selected purely by config.
#[derive(Debug)]
pub enum MailStream {
    Plain(TcpStream),
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl AsyncRead for MailStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MailStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MailStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MailStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MailStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MailStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MailStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

type ImapSession = Session<MailStream>;

/// One authenticated connection with at most one selected folder.
pub struct MailSession {
    account: Account,
    session: ImapSession,
    selected: Option<String>,
}

impl fmt::Debug for MailSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSession")
            .field("account", &self.account.name)
            .field("selected", &self.selected)
            .finish()
    }
}

async fn open_stream(account: &Account) -> AppResult<MailStream> {
    let tcp = TcpStream::connect((account.host.as_str(), account.port))
        .await
        .map_err(|e| {
            AppError::Connect(format!("{}:{}: {e}", account.host, account.port))
        })?;

    if !account.use_tls {
        return Ok(MailStream::Plain(tcp));
    }

    let mut root_store = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()
        .map_err(|e| AppError::Connect(format!("loading native certs: {e}")))?;
    for cert in certs {
        root_store
            .add(&tokio_rustls::rustls::Certificate(cert.0))
            .map_err(|e| AppError::Connect(format!("adding cert to root store: {e}")))?;
    }
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(account.host.as_str())
        .map_err(|e| AppError::Connect(format!("invalid DNS name {}: {e}", account.host)))?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| AppError::Connect(format!("TLS handshake with {}: {e}", account.host)))?;
    Ok(MailStream::Tls(tls))
}

/// Connect and LOGIN. A `NO` on login means bad credentials; everything else
/// stays in its transport/transient class so reconnect logic can reuse this.
pub async fn connect(account: &Account) -> AppResult<MailSession> {
    let stream = open_stream(account).await?;
    let mut client = async_imap::Client::new(stream);

    let greeting = client
        .read_response()
        .await
        .map_err(|e| AppError::Connect(format!("reading greeting: {e}")))?;
    if greeting.is_none() {
        return Err(AppError::Connect(
            "unexpected end of stream, expected greeting".into(),
        ));
    }

    let session = client
        .login(&account.username, &account.password)
        .await
        .map_err(|(err, _client)| match classify(err) {
            AppError::Search(msg) => AppError::Auth(msg),
            other => other,
        })?;

    debug!(account = %account.name, host = %account.host, "IMAP session established");
    Ok(MailSession {
        account: account.clone(),
        session,
        selected: None,
    })
}

impl MailSession {
    /// Select a folder read-only for this session, retrying once with `.`
    /// separators swapped to `/` for servers on the opposite hierarchy
    /// convention.
    pub async fn select_folder(&mut self, folder: &str) -> AppResult<()> {
        let folder = normalize_server_folder_name(folder);
        match self.session.examine(folder).await {
            Ok(_) => {
                self.selected = Some(folder.to_string());
                Ok(())
            }
            Err(first) => {
                let alt = swap_folder_separators(folder);
                if alt != folder {
                    debug!(folder = %folder, alt = %alt, "Select failed; retrying with swapped separators");
                    if self.session.examine(&alt).await.is_ok() {
                        self.selected = Some(alt);
                        return Ok(());
                    }
                }
                Err(AppError::FolderSelect {
                    folder: folder.to_string(),
                    reason: first.to_string(),
                })
            }
        }
    }

    /// Selectable folders the server reports, in LIST order. The folder name
    /// and hierarchy delimiter come from the parsed LIST response, so server
    /// dialects need no hardcoded separator token.
    pub async fn list_folders(&mut self) -> AppResult<Vec<String>> {
        let mut names = Vec::new();
        {
            let mut stream = self
                .session
                .list(Some(""), Some("*"))
                .await
                .map_err(classify)?;
            while let Some(item) = stream.next().await {
                let name = item.map_err(classify)?;
                if name
                    .attributes()
                    .iter()
                    .any(|a| matches!(a, NameAttribute::NoSelect))
                {
                    continue;
                }
                names.push(normalize_server_folder_name(name.name()).to_string());
            }
        }
        Ok(names)
    }

    /// Paginated search: range-bounded requests of `page_size` sequence
    /// numbers each, concatenated until a page comes back empty. Ranges are
    /// disjoint so identifiers never repeat; each page is sorted for
    /// deterministic enumeration.
    pub async fn search_ids(&mut self, criterion: &str, page_size: u32) -> AppResult<Vec<u32>> {
        let mut all = Vec::new();
        let mut offset = 0u32;
        let mut attempts = 0u32;
        loop {
            let query = page_query(offset, page_size, criterion);
            match self.session.search(&query).await {
                Ok(ids) => {
                    if !merge_page(&mut all, ids) {
                        return Ok(all);
                    }
                    offset += page_size;
                }
                Err(err) => match classify(err) {
                    AppError::Reset(msg) => {
                        attempts += 1;
                        if attempts >= MAX_RECONNECT_ATTEMPTS {
                            return Err(AppError::RetriesExhausted {
                                attempts,
                                last: msg,
                            });
                        }
                        warn!(query = %query, attempt = attempts, error = %msg, "Search hit a reset; reconnecting");
                        self.reconnect_with_budget(&mut attempts).await?;
                        // retry the same page on the fresh session
                    }
                    AppError::ProtocolAbort(msg) => {
                        warn!(query = %query, error = %msg, "Server aborted search; reconnecting and skipping folder");
                        self.reconnect().await?;
                        return Err(AppError::Search(msg));
                    }
                    other => return Err(other),
                },
            }
        }
    }

    /// Fetch one message's raw bytes. `Ok(None)` means the message was
    /// abandoned for this run (protocol abort, or the server returned no
    /// body); transient resets retry on a fresh session within the shared
    /// budget.
    pub async fn fetch_raw(&mut self, seq: u32) -> AppResult<Option<Vec<u8>>> {
        let mut attempts = 0u32;
        loop {
            match self.try_fetch(seq).await {
                Ok(raw) => return Ok(raw),
                Err(AppError::Reset(msg)) => {
                    attempts += 1;
                    if attempts >= MAX_RECONNECT_ATTEMPTS {
                        return Err(AppError::RetriesExhausted {
                            attempts,
                            last: msg,
                        });
                    }
                    warn!(seq, attempt = attempts, error = %msg, "Fetch hit a reset; reconnecting");
                    self.reconnect_with_budget(&mut attempts).await?;
                }
                Err(AppError::ProtocolAbort(msg)) => {
                    warn!(seq, error = %msg, "Server aborted fetch; reconnecting and abandoning message");
                    self.reconnect().await?;
                    return Ok(None);
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn try_fetch(&mut self, seq: u32) -> AppResult<Option<Vec<u8>>> {
        let mut raw: Option<Vec<u8>> = None;
        {
            let mut stream = self
                .session
                .fetch(seq.to_string(), "(RFC822)")
                .await
                .map_err(classify)?;
            while let Some(item) = stream.next().await {
                let fetch: Fetch = item.map_err(classify)?;
                if let Some(body) = fetch.body() {
                    raw = Some(body.to_vec());
                }
            }
        }
        Ok(raw)
    }

    /// Tear down a dead session and build a fresh one, re-running login and
    /// folder selection.
    async fn reconnect(&mut self) -> AppResult<()> {
        let fresh = connect(&self.account).await?;
        self.session = fresh.session;
        if let Some(folder) = self.selected.clone() {
            self.session
                .examine(&folder)
                .await
                .map_err(|e| AppError::FolderSelect {
                    folder,
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Reconnect, counting failed attempts against the caller's retry budget.
    async fn reconnect_with_budget(&mut self, attempts: &mut u32) -> AppResult<()> {
        loop {
            tokio::time::sleep(RECONNECT_PAUSE).await;
            match self.reconnect().await {
                Ok(()) => return Ok(()),
                Err(e @ (AppError::Connect(_) | AppError::Reset(_))) => {
                    *attempts += 1;
                    if *attempts >= MAX_RECONNECT_ATTEMPTS {
                        return Err(AppError::RetriesExhausted {
                            attempts: *attempts,
                            last: e.to_string(),
                        });
                    }
                    warn!(attempt = *attempts, error = %e, "Reconnect failed; retrying");
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Close the selected folder and log out. Best-effort; a run is torn
    /// down this way regardless of outcome.
    pub async fn logout(mut self) {
        if self.selected.is_some() {
            if let Err(e) = self.session.close().await {
                debug!(error = %e, "CLOSE failed during teardown");
            }
        }
        if let Err(e) = self.session.logout().await {
            debug!(error = %e, "LOGOUT failed during teardown");
        }
    }
}

/// `ALL`, or `(SENTSINCE DD-Mon-YYYY)` for a `days_back` cutoff.
pub fn search_criterion(days_back: Option<u32>, today: NaiveDate) -> String {
    match days_back {
        None => "ALL".to_string(),
        Some(days) => {
            let since = today - chrono::Days::new(u64::from(days));
            format!("(SENTSINCE {})", since.format("%d-%b-%Y"))
        }
    }
}

fn page_query(offset: u32, page_size: u32, criterion: &str) -> String {
    format!("{}:{} {}", offset + 1, offset + page_size, criterion)
}

/// Fold one page of identifiers into the accumulator, sorted for
/// deterministic enumeration. `false` when the empty page ends enumeration.
fn merge_page(all: &mut Vec<u32>, page: impl IntoIterator<Item = u32>) -> bool {
    let mut page: Vec<u32> = page.into_iter().collect();
    if page.is_empty() {
        return false;
    }
    page.sort_unstable();
    all.extend(page);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_satisfies_session_io_bounds() {
        // Session and Client require the tokio read/write traits on the
        // stream directly, with no adapter in between.
        fn assert_io<T: AsyncRead + AsyncWrite + Unpin + Send>() {}
        assert_io::<MailStream>();
    }

    #[test]
    fn criterion_without_cutoff_is_all() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(search_criterion(None, today), "ALL");
    }

    #[test]
    fn criterion_with_cutoff_uses_sentsince_wire_form() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(search_criterion(Some(30), today), "(SENTSINCE 01-Jan-2024)");
        assert_eq!(search_criterion(Some(0), today), "(SENTSINCE 31-Jan-2024)");
    }

    #[test]
    fn page_queries_are_disjoint_one_based_ranges() {
        assert_eq!(page_query(0, 5000, "ALL"), "1:5000 ALL");
        assert_eq!(page_query(5000, 5000, "ALL"), "5001:10000 ALL");
        assert_eq!(
            page_query(10000, 5000, "(SENTSINCE 01-Jan-2024)"),
            "10001:15000 (SENTSINCE 01-Jan-2024)"
        );
    }

    #[test]
    fn pages_accumulate_until_empty_with_no_duplicates() {
        // 12,000 matches at page size 5,000: three non-empty pages, then the
        // empty page terminates enumeration.
        let mut all = Vec::new();
        assert!(merge_page(&mut all, 1..=5000u32));
        assert!(merge_page(&mut all, 5001..=10000u32));
        assert!(merge_page(&mut all, 10001..=12000u32));
        assert!(!merge_page(&mut all, std::iter::empty()));

        assert_eq!(all.len(), 12000);
        let mut dedup = all.clone();
        dedup.dedup();
        assert_eq!(dedup.len(), 12000);
        assert_eq!(all.first(), Some(&1));
        assert_eq!(all.last(), Some(&12000));
    }

    #[test]
    fn unordered_page_is_sorted_before_concatenation() {
        let mut all = Vec::new();
        assert!(merge_page(&mut all, [7u32, 3, 5].into_iter()));
        assert_eq!(all, vec![3, 5, 7]);
    }
}
