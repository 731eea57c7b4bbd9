//! Error types for the vault synchronization engine

use std::path::PathBuf;
use vaultsync_core::ApiError;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Request failed or the server answered with a non-2xx status
    /// other than 401
    #[error("network failure: {0}")]
    Network(String),

    /// The server rejected the cached token (401)
    #[error("login expired")]
    AuthExpired,

    /// Login with stored credentials was refused
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Local file read/write/delete error
    #[error("local I/O failure at '{path}': {message}")]
    LocalIo { path: PathBuf, message: String },

    /// Malformed persisted JSON or malformed server response
    #[error("parse failure: {0}")]
    Parse(String),

    /// Invalid include/exclude filter pattern
    #[error("filter pattern error: {0}")]
    Pattern(String),

    /// A second sync cycle was requested while one is in flight
    #[error("a sync cycle is already running")]
    Busy,

    /// Operation was cancelled
    #[error("operation was cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a new local I/O error
    pub fn local_io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::LocalIo {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::AuthExpired => SyncError::AuthExpired,
            ApiError::Authentication(message) => SyncError::Authentication(message),
            ApiError::Parse(message) => SyncError::Parse(message),
            ApiError::InvalidUrl(e) => SyncError::Parse(e.to_string()),
            ApiError::Network(e) => SyncError::Network(e.to_string()),
            ApiError::Server { status, message } => {
                SyncError::Network(format!("server returned {}: {}", status, message))
            }
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}
