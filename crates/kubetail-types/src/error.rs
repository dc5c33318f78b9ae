//! Error types shared by the kubetail crates

use std::io;
use thiserror::Error;

/// Errors that can occur while tailing a source
#[derive(Error, Debug)]
pub enum TailError {
    /// The source never existed
    #[error("not found: {0}")]
    NotFound(String),

    /// The source exists but has nothing retrievable yet
    #[error("not ready: {0}")]
    NotReady(String),

    /// A remote call failed, possibly mid-stream
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed query, options or config
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TailError {
    /// Only `NotReady` is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}

/// Result type for tail operations
pub type Result<T> = std::result::Result<T, TailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_not_ready_is_retryable() {
        assert!(TailError::NotReady("pod".into()).is_retryable());
        assert!(!TailError::NotFound("pod".into()).is_retryable());
        assert!(!TailError::Transport("reset".into()).is_retryable());
        assert!(!TailError::invalid("bad").is_retryable());
    }

    #[test]
    fn test_io_error_converts() {
        let err: TailError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, TailError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: gone");
    }
}
