//! Domain error types
//!
//! Errors raised while validating paths, keys and other domain values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path is not within the watched root
    #[error("Path not within watched root: {0}")]
    PathNotInRoot(String),

    /// Invalid remote path format
    #[error("Invalid remote path: {0}")]
    InvalidRemotePath(String),

    /// Key material could not be turned into a 256-bit key
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("relative".to_string());
        assert_eq!(err.to_string(), "Invalid path: relative");

        let err = DomainError::PathNotInRoot("/etc/passwd".to_string());
        assert_eq!(err.to_string(), "Path not within watched root: /etc/passwd");

        let err = DomainError::InvalidKey("expected 32 bytes".to_string());
        assert_eq!(err.to_string(), "Invalid encryption key: expected 32 bytes");
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(
            DomainError::ValidationFailed("x".into()),
            DomainError::ValidationFailed("x".into())
        );
        assert_ne!(
            DomainError::InvalidPath("x".into()),
            DomainError::InvalidRemotePath("x".into())
        );
    }
}
