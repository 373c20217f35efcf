//! Error types for ember-core

use thiserror::Error;

/// Result type alias for ember operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the ember HTTP server
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Route or mount path that cannot be compiled
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Malformed request line or headers
    #[error("Parse error: {0}")]
    Parse(String),

    /// Headers plus body exceed the configured maximum request size
    #[error("Request too large: {size} bytes exceeds limit of {limit} bytes")]
    RequestTooLarge { size: usize, limit: usize },

    /// The per-request arena cannot satisfy an allocation
    #[error("Arena exhausted: {requested} bytes requested, capacity {capacity} bytes")]
    OutOfArena { requested: usize, capacity: usize },

    /// No complete request arrived within the read timeout
    #[error("Timed out waiting for request")]
    Timeout,

    /// Accept, read or write failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by the connection engine when logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket level failure; the connection is dropped
    Transport,
    /// Malformed, oversized or timed out request; closed before routing
    Parse,
    /// Arena or pool exhaustion; only the current request is aborted
    ResourceExhaustion,
    /// Programming or configuration error
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Transport,
            Error::Parse(_)
            | Error::RequestTooLarge { .. }
            | Error::Timeout
            | Error::InvalidMethod(_) => ErrorKind::Parse,
            Error::OutOfArena { .. } => ErrorKind::ResourceExhaustion,
            Error::InvalidPath(_) | Error::Config(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<ember_router::PatternError> for Error {
    fn from(e: ember_router::PatternError) -> Self {
        Error::InvalidPath(e.to_string())
    }
}

impl From<httparse::Error> for Error {
    fn from(e: httparse::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::Timeout.kind(), ErrorKind::Parse);
        assert_eq!(
            Error::RequestTooLarge { size: 10, limit: 5 }.kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            Error::OutOfArena { requested: 1, capacity: 0 }.kind(),
            ErrorKind::ResourceExhaustion
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(Error::from(io).kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_display() {
        let e = Error::RequestTooLarge { size: 2048, limit: 1024 };
        assert_eq!(
            e.to_string(),
            "Request too large: 2048 bytes exceeds limit of 1024 bytes"
        );
    }
}
