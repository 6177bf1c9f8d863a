//! Login session state
//!
//! Tracks where the client is in the login sequence:
//!
//! ```text
//! SetupRequired ──(setup finished)──→ LoggedOut
//! LoggedOut ──→ LoggingIn ──→ FetchingNodes ──→ LoggedIn
//!     ↑                                            │
//!     └──────────────── LoggingOut ←───────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Position in the login sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No account configured yet; login callbacks belong to the setup flow
    #[default]
    SetupRequired,
    /// Account configured, no login in progress
    LoggedOut,
    LoggingIn,
    FetchingNodes,
    LoggedIn,
    LoggingOut,
}

impl SessionState {
    /// True while a login or fetch request is outstanding
    pub fn is_login_pending(&self) -> bool {
        matches!(self, SessionState::LoggingIn | SessionState::FetchingNodes)
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionState::LoggedIn)
    }

    /// False during first-run setup
    pub fn has_account(&self) -> bool {
        !matches!(self, SessionState::SetupRequired)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::SetupRequired => "setup_required",
            SessionState::LoggedOut => "logged_out",
            SessionState::LoggingIn => "logging_in",
            SessionState::FetchingNodes => "fetching_nodes",
            SessionState::LoggedIn => "logged_in",
            SessionState::LoggingOut => "logging_out",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_pending() {
        assert!(SessionState::LoggingIn.is_login_pending());
        assert!(SessionState::FetchingNodes.is_login_pending());
        assert!(!SessionState::LoggedIn.is_login_pending());
    }

    #[test]
    fn test_setup_has_no_account() {
        assert!(!SessionState::SetupRequired.has_account());
        assert!(SessionState::LoggedOut.has_account());
        assert_eq!(SessionState::default(), SessionState::SetupRequired);
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::FetchingNodes.to_string(), "fetching_nodes");
    }
}
