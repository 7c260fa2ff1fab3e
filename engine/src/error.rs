//! Error types for the kvsync engine.

use thiserror::Error;

/// All possible errors from the kvsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid instance id: {0}")]
    InvalidInstanceId(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::InvalidKey("key must not be empty".into());
        assert_eq!(err.to_string(), "invalid key: key must not be empty");

        let err = Error::InvalidMessage("expected object".into());
        assert_eq!(err.to_string(), "invalid message: expected object");
    }
}
