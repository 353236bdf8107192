//! Error types and Result alias for the Stoat client

use thiserror::Error;

/// Main error type for the Stoat client
#[derive(Error, Debug)]
pub enum Error {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Whether retrying the same call later may succeed.
    ///
    /// Network blips and 5xx responses are transient; a missing job or a
    /// malformed payload is not going to fix itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::NetworkError(_) | Error::WebSocketError(_) | Error::ApiError(_)
        )
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidData(err.to_string())
    }
}
