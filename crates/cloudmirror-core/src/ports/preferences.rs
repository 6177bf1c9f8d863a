//! Preferences store port (driven/secondary port)
//!
//! The persisted key/value configuration owned by the user: sync pairs,
//! session, timestamps, proxy, exclusions and transfer settings.
//!
//! Setters only update the store's in-memory view. [`IPreferencesStore::flush`]
//! writes pending changes and is called once per orchestration step, so a
//! failing disk surfaces as one logged error rather than at every setter.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    Credentials, DomainError, ExclusionRules, LocalFingerprint, NodeHandle, ProxySettings,
    SessionToken, SyncPairConfig,
};

/// Errors raised by a preferences store
#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("Failed to read preferences from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write preferences to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt preferences file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Port trait for the persisted preferences
pub trait IPreferencesStore: Send {
    // --- Account ---

    /// True once an account has been configured through setup
    fn has_account(&self) -> bool;

    fn session(&self) -> Option<SessionToken>;

    fn set_session(&mut self, session: Option<SessionToken>);

    fn credentials(&self) -> Option<Credentials>;

    /// Forgets the account: session, credentials and sync pairs
    fn unlink(&mut self);

    // --- Sync pairs ---

    fn sync_pairs(&self) -> Vec<SyncPairConfig>;

    fn sync_pair(&self, index: usize) -> Option<SyncPairConfig>;

    fn set_sync_active(&mut self, index: usize, active: bool) -> Result<(), PreferencesError>;

    fn set_sync_fingerprint(
        &mut self,
        index: usize,
        fingerprint: LocalFingerprint,
    ) -> Result<(), PreferencesError>;

    // --- Timestamps ---

    fn last_exit(&self) -> Option<DateTime<Utc>>;

    fn set_last_exit(&mut self, at: DateTime<Utc>);

    fn last_stats_request(&self) -> Option<DateTime<Utc>>;

    fn set_last_stats_request(&mut self, at: DateTime<Utc>);

    fn last_execution(&self) -> Option<DateTime<Utc>>;

    fn set_last_execution(&mut self, at: DateTime<Utc>);

    // --- Settings ---

    fn proxy(&self) -> ProxySettings;

    fn set_proxy(&mut self, proxy: ProxySettings);

    fn exclusions(&self) -> ExclusionRules;

    /// Upload limit in KiB/s; negative means unlimited
    fn upload_limit_kib(&self) -> i64;

    fn set_upload_limit_kib(&mut self, kib: i64);

    fn default_upload_folder(&self) -> Option<NodeHandle>;

    fn default_download_folder(&self) -> Option<PathBuf>;

    // --- Flags ---

    fn was_paused(&self) -> bool;

    fn set_was_paused(&mut self, paused: bool);

    /// Set when the previous run ended in a state that needs a full reload
    fn crashed(&self) -> bool;

    fn set_crashed(&mut self, crashed: bool);

    // --- Persistence ---

    /// Writes pending changes
    fn flush(&mut self) -> Result<(), PreferencesError>;
}
