//! Errors reported by the engine
//!
//! The engine reports failures as a numeric code plus a human-readable
//! string. The codes the orchestration layer branches on get their own
//! variant; everything else is kept verbatim in `Other`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorCode {
    /// Generic failure; for sync registration it means the local folder changed
    Failed,
    /// Storage or transfer quota exceeded
    OverQuota,
    /// The account has been blocked
    Blocked,
    /// The session is no longer valid (logged out elsewhere)
    InvalidSession,
    /// Transfer cancelled on request
    Cancelled,
    /// Any other code
    Other(i32),
}

/// An error as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineError {
    pub code: EngineErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: EngineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns true for the account-wide over-quota condition
    pub fn is_over_quota(&self) -> bool {
        self.code == EngineErrorCode::OverQuota
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.code)
    }
}

/// Returns true when an optional engine error is the over-quota condition
pub fn is_over_quota(error: Option<&EngineError>) -> bool {
    error.is_some_and(EngineError::is_over_quota)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_over_quota_detection() {
        let quota = EngineError::new(EngineErrorCode::OverQuota, "Over quota");
        let other = EngineError::new(EngineErrorCode::Other(-3), "Try again");
        assert!(is_over_quota(Some(&quota)));
        assert!(!is_over_quota(Some(&other)));
        assert!(!is_over_quota(None));
    }

    #[test]
    fn test_display_includes_message() {
        let e = EngineError::new(EngineErrorCode::Blocked, "Blocked");
        assert_eq!(e.to_string(), "Blocked (Blocked)");
    }
}
