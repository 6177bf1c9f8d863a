//! Sync pair domain types
//!
//! A sync pair binds one local folder to one remote folder. This module
//! defines the persisted configuration of a pair, the runtime state machine
//!
//! ```text
//! Inactive ──→ Starting ──→ Active ──→ Disabling ──→ Inactive
//!                 │                        │
//!                 └──────→ Disabled(reason) ←┘
//! ```
//!
//! and the closed set of reasons a pair can be disabled for. Whether a pair
//! is disabled and why are kept apart so the presentation layer can format
//! the reason however it likes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::engine_error::{EngineError, EngineErrorCode};
use super::newtypes::{LocalFingerprint, NodeHandle};

/// Path prefix under which the engine reports nodes that live in the trash
pub const DEFAULT_TRASH_ROOT: &str = "//bin";

// ============================================================================
// SyncPairConfig
// ============================================================================

/// Persisted configuration of a single sync pair
///
/// Owned by the preferences store. At runtime only the lifecycle manager
/// mutates `active` and `fingerprint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPairConfig {
    /// Display name shown in notifications
    pub name: String,
    /// Local folder kept mirrored
    pub local_folder: PathBuf,
    /// Handle of the remote folder
    pub remote_handle: NodeHandle,
    /// Remote path cached at configuration time, used to detect moves
    pub remote_path: String,
    /// Whether the pair should be running
    pub active: bool,
    /// Resume token from the last successful registration
    #[serde(default)]
    pub fingerprint: Option<LocalFingerprint>,
}

impl SyncPairConfig {
    /// Creates an active pair without a resume fingerprint
    pub fn new(
        name: impl Into<String>,
        local_folder: impl Into<PathBuf>,
        remote_handle: NodeHandle,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            local_folder: local_folder.into(),
            remote_handle,
            remote_path: remote_path.into(),
            active: true,
            fingerprint: None,
        }
    }

    /// Returns the local folder as a path
    pub fn local_folder(&self) -> &Path {
        &self.local_folder
    }
}

// ============================================================================
// DisableReason
// ============================================================================

/// Why a sync pair was disabled by the client rather than by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum DisableReason {
    /// The local folder is gone or is no longer a directory
    LocalFolderMissing,
    /// The remote folder handle no longer resolves, or resolves elsewhere
    RemoteFolderMissing,
    /// The remote folder was moved to the trash
    RemoteFolderInTrash,
    /// The engine reports that the local folder was replaced
    LocalFolderChanged,
    /// Every pair is suspended because the account is over quota
    OverQuota,
    /// Any other engine failure, with the engine's own text
    EngineError(String),
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisableReason::LocalFolderMissing => write!(f, "the local folder doesn't exist"),
            DisableReason::RemoteFolderMissing => write!(f, "the remote folder doesn't exist"),
            DisableReason::RemoteFolderInTrash => {
                write!(f, "the remote folder is in the rubbish bin")
            }
            DisableReason::LocalFolderChanged => write!(f, "the local folder has changed"),
            DisableReason::OverQuota => write!(f, "the account storage quota is exceeded"),
            DisableReason::EngineError(text) => write!(f, "{text}"),
        }
    }
}

/// Facts gathered when a sync registration fails, in classification order
#[derive(Debug, Clone)]
pub struct SyncFailureContext<'a> {
    /// Whether the local folder is currently a directory
    pub local_is_dir: bool,
    /// Path the remote handle resolves to right now, if any
    pub resolved_remote_path: Option<&'a str>,
    /// Path recorded in the pair's configuration
    pub configured_remote_path: &'a str,
    /// Path prefix of the trash root
    pub trash_root: &'a str,
    /// Error reported by the engine
    pub error: &'a EngineError,
}

impl DisableReason {
    /// Classifies a failed sync registration
    ///
    /// Checks run in priority order: local folder, trash, remote path
    /// mismatch, the engine's "local folder changed" code, then the raw
    /// engine text.
    pub fn classify(ctx: &SyncFailureContext<'_>) -> Self {
        if !ctx.local_is_dir {
            return DisableReason::LocalFolderMissing;
        }
        if let Some(reason) =
            Self::classify_remote(ctx.resolved_remote_path, ctx.configured_remote_path, ctx.trash_root)
        {
            return reason;
        }
        if ctx.error.code == EngineErrorCode::Failed {
            return DisableReason::LocalFolderChanged;
        }
        DisableReason::EngineError(ctx.error.message.clone())
    }

    /// Checks whether a remote folder is still where the configuration says
    ///
    /// Returns `None` when the resolved path matches the configured one.
    pub fn classify_remote(
        resolved: Option<&str>,
        configured: &str,
        trash_root: &str,
    ) -> Option<Self> {
        match resolved {
            Some(path) if path.starts_with(trash_root) => Some(DisableReason::RemoteFolderInTrash),
            Some(path) if path == configured => None,
            _ => Some(DisableReason::RemoteFolderMissing),
        }
    }
}

// ============================================================================
// SyncPairState
// ============================================================================

/// Runtime state of a sync pair
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum SyncPairState {
    /// Not registered with the engine
    #[default]
    Inactive,
    /// Registration issued, waiting for the completion callback
    Starting,
    /// Registered and running
    Active,
    /// Removal issued
    Disabling,
    /// Inactive and blocked from auto-resume until re-enabled by the user
    Disabled(DisableReason),
}

impl SyncPairState {
    /// Returns true for `Inactive` and `Disabled`
    pub fn is_inactive(&self) -> bool {
        matches!(self, SyncPairState::Inactive | SyncPairState::Disabled(_))
    }

    /// Returns true when the engine holds (or is acquiring) a registration
    pub fn is_registered(&self) -> bool {
        matches!(self, SyncPairState::Starting | SyncPairState::Active)
    }

    /// Returns the disable reason, if any
    pub fn disable_reason(&self) -> Option<&DisableReason> {
        match self {
            SyncPairState::Disabled(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for SyncPairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPairState::Inactive => write!(f, "inactive"),
            SyncPairState::Starting => write!(f, "starting"),
            SyncPairState::Active => write!(f, "active"),
            SyncPairState::Disabling => write!(f, "disabling"),
            SyncPairState::Disabled(reason) => write!(f, "disabled: {reason}"),
        }
    }
}
