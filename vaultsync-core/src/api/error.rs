use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("authentication token expired or invalid")]
    AuthExpired,

    #[error("malformed server response: {0}")]
    Parse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("server error: {status} - {message}")]
    Server { status: u16, message: String },
}

impl ApiError {
    /// True for failures worth surfacing as a generic network problem
    /// rather than an auth or protocol issue.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Server { .. })
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
