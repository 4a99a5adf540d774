//! Error types

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Crate-wide error type
///
/// `Error` is `Clone` so that a single failed handshake can be reported to
/// every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Missing or invalid configuration (cache URL, TLS material, options)
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket-level failure
    #[error("io error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The connection was closed by the server or by `close()`
    #[error("connection closed")]
    ConnectionClosed,

    /// Malformed or unexpected reply
    #[error("protocol error: {0}")]
    Protocol(String),

    /// AUTH rejected by the server
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Error reply (`-ERR ...`) to a command
    #[error("server error: {0}")]
    Server(String),

    /// Connect or response timeout elapsed
    #[error("timed out: {0}")]
    Timeout(String),

    /// Connection state machine misuse
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// State the operation required
        expected: String,
        /// State the connection was in
        actual: String,
    },
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    /// True for configuration failures, which retrying will not fix
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// True for failures of the network conversation with the cache server
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ConnectionClosed
                | Error::Protocol(_)
                | Error::Authentication(_)
                | Error::Server(_)
                | Error::Timeout(_)
        )
    }

    /// Short, stable category name (used as a metrics label)
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::ConnectionClosed => "connection_closed",
            Error::Protocol(_) => "protocol",
            Error::Authentication(_) => "authentication",
            Error::Server(_) => "server",
            Error::Timeout(_) => "timeout",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts_and_clones() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        let cloned = err.clone();
        assert!(cloned.is_connection_error());
        assert_eq!(cloned.category(), "io");
        assert!(cloned.to_string().contains("refused"));
    }

    #[test]
    fn test_config_is_not_connection_error() {
        let err = Error::Config("REDIS_URL is not set".into());
        assert!(err.is_config_error());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_invalid_state_display() {
        let err = Error::InvalidState {
            expected: "ready".into(),
            actual: "closed".into(),
        };
        assert_eq!(err.to_string(), "invalid state: expected ready, got closed");
        assert!(!err.is_connection_error());
    }
}
