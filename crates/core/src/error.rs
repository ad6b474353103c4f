//! Error types for the retrieval service

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Service-level error taxonomy
///
/// Every crate defines its own error enum and converts into this taxonomy at
/// the boundary. The retrieval path never surfaces `BackendTimeout` or
/// `Backend` to a caller; those degrade to partial or empty results. The
/// ingest path propagates them loudly.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Backend timeout: {0}")]
    BackendTimeout(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid-input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Error::Backend(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::not_found("document abc");
        assert_eq!(err.to_string(), "Not found: document abc");
    }

    #[test]
    fn test_helpers() {
        assert!(matches!(
            Error::invalid_input("x"),
            Error::InvalidInput(_)
        ));
        assert!(matches!(Error::backend("x"), Error::Backend(_)));
    }
}
