//! Domain newtypes
//!
//! Strongly-typed wrappers for the opaque identifiers the engine hands out:
//! node handles, transfer tags, resume fingerprints and session tokens.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// NodeHandle
// ============================================================================

/// Opaque identifier of a remote node (file or folder)
///
/// Displayed and parsed as a 16-digit lowercase hex string so handles survive
/// a round trip through the preferences file unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeHandle(u64);

impl NodeHandle {
    /// Wraps a raw engine handle
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw engine handle
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for NodeHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for NodeHandle {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| DomainError::InvalidHandle(format!("{s}: {e}")))
    }
}

impl From<u64> for NodeHandle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// ============================================================================
// TransferTag
// ============================================================================

/// Engine-assigned integer identifying one transfer
///
/// The same tag is later attached to the node the transfer produced, which is
/// what allows a finished upload to be correlated with its node update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferTag(i64);

impl TransferTag {
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for TransferTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TransferTag {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

// ============================================================================
// LocalFingerprint
// ============================================================================

/// Opaque resume token for a sync pair
///
/// Returned by the engine when a sync registration succeeds and handed back
/// on the next start so the pair resumes instead of rescanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalFingerprint(i64);

impl LocalFingerprint {
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for LocalFingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SessionToken
// ============================================================================

/// Resumable login session dumped by the engine after a successful login
///
/// `Debug` is redacted so the token never ends up in a log line.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Creates a token, rejecting empty strings
    pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "session token must not be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}
