use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Failure classes for one IMAP operation. Transient resets are retried with
/// a fresh session, a protocol abort gets one reconnect and the operation is
/// abandoned, everything else stays scoped to its account or folder.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transient connection reset: {0}")]
    Reset(String),
    #[error("server aborted operation: {0}")]
    ProtocolAbort(String),
    #[error("folder selection failed for {folder}: {reason}")]
    FolderSelect { folder: String, reason: String },
    #[error("search returned non-OK status: {0}")]
    Search(String),
    #[error("reconnect budget exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("message decode failed: {0}")]
    Decode(String),
}

impl AppError {
    /// True when the whole process must abort with a non-zero exit rather
    /// than continue and silently produce a partial archive.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::RetriesExhausted { .. })
    }
}

/// Sort an async-imap error into our taxonomy. I/O failures and lost
/// connections are transient; BAD means the server aborted the in-flight
/// command; NO is a plain non-OK status.
pub fn classify(err: async_imap::error::Error) -> AppError {
    use async_imap::error::Error as Imap;
    match err {
        Imap::Io(e) => AppError::Reset(e.to_string()),
        Imap::ConnectionLost => AppError::Reset("connection lost".into()),
        Imap::Bad(msg) => AppError::ProtocolAbort(msg.to_string()),
        Imap::No(msg) => AppError::Search(msg.to_string()),
        other => AppError::ProtocolAbort(other.to_string()),
    }
}
