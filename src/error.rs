use thiserror::Error;

/// Failures raised by a tabular store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    /// Native error reported by the store; `message` is surfaced verbatim.
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid store response: {0}")]
    Invalid(String),
}

/// Failures raised by a mail source backend.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("access token expired or revoked")]
    AuthExpired,
    #[error("mail API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pipeline error taxonomy.
///
/// `SourceFetch`, `MissingRequiredField` and `InvalidDate` are caught per
/// task and classified. `Destination` and `LogRead` abort the run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch message {id}: {source}")]
    SourceFetch {
        id: String,
        #[source]
        source: SourceError,
    },
    #[error("discovery failed: {0}")]
    Discovery(#[source] SourceError),
    #[error("missing required field: {field}")]
    MissingRequiredField { field: &'static str },
    #[error("invalid {field}: {raw:?}")]
    InvalidDate { field: &'static str, raw: String },
    #[error(transparent)]
    Destination(StoreError),
    #[error("failed to read sync log: {0}")]
    LogRead(#[source] StoreError),
    #[error("message {0} is not in the sync log as held")]
    NotHeld(String),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Destination(e)
    }
}
