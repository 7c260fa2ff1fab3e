//! Error types for the sync client.

use thiserror::Error;

/// Errors surfaced by the sync client.
///
/// Cloneable so failures can be broadcast to every subscriber.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no acknowledgement before timeout")]
    Timeout,

    #[error("change stream lost: {0}")]
    TransportLost(String),

    #[error("sync cache is closed")]
    Closed,
}

impl Error {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StorageUnavailable(_)
                | Error::Transport(_)
                | Error::Timeout
                | Error::TransportLost(_)
        )
    }
}

impl From<kvsync_engine::Error> for Error {
    fn from(e: kvsync_engine::Error) -> Self {
        match e {
            kvsync_engine::Error::InvalidKey(msg) => Error::InvalidKey(msg),
            other => Error::Transport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Transport(e.to_string())
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
