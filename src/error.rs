use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("url must not be empty")]
    EmptyUrl,
    #[error("backup file does not exist: {}", .0.display())]
    BackupMissing(PathBuf),
    #[error("db schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
    #[error("unparseable timestamp in column {column}: {value:?}")]
    BadTimestamp { column: &'static str, value: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced by the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Failures surfaced by the session mediator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not a supported Bilibili or YouTube url: {0}")]
    UnsupportedUrl(String),
    #[error("url is already in the list: {0}")]
    Duplicate(String),
    #[error("a download is already in progress")]
    Busy,
    #[error(transparent)]
    Store(#[from] StoreError),
}
