//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including malformed identifiers, proxy descriptions and unknown
//! sync pair indices.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A remote node handle could not be parsed
    #[error("Invalid node handle: {0}")]
    InvalidHandle(String),

    /// A proxy description could not be parsed
    #[error("Invalid proxy URL: {0}")]
    InvalidProxy(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// No sync pair is configured at the given index
    #[error("Unknown sync pair index: {0}")]
    UnknownSyncPair(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidHandle("zz".to_string());
        assert_eq!(err.to_string(), "Invalid node handle: zz");

        let err = DomainError::InvalidProxy("socks9://x".to_string());
        assert_eq!(err.to_string(), "Invalid proxy URL: socks9://x");

        let err = DomainError::UnknownSyncPair(4);
        assert_eq!(err.to_string(), "Unknown sync pair index: 4");
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidHandle("0x10".to_string());
        let err2 = DomainError::InvalidHandle("0x10".to_string());
        let err3 = DomainError::InvalidHandle("0x20".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
