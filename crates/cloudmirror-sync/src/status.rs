//! Application-visible state published after every orchestration step

use std::path::PathBuf;

use serde::Serialize;

use cloudmirror_core::domain::{SessionState, SyncPairState, TransferDirection};

use crate::stats::{RecentFile, TransferStats};

/// Engine activity flags rendered by the presentation layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalSyncState {
    /// The engine is scanning local folders
    pub indexing: bool,
    /// The engine is waiting on the network or a locked file
    pub waiting: bool,
    pub paused: bool,
}

/// One sync pair as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairStatus {
    pub name: String,
    pub local_folder: PathBuf,
    pub state: SyncPairState,
}

/// Snapshot of everything the presentation layer renders
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub session: SessionState,
    pub global: GlobalSyncState,
    pub pairs: Vec<PairStatus>,
    pub stats: TransferStats,
    pub recent_files: Vec<RecentFile>,
    /// Directions with a batch waiting for the user to pick a destination
    pub awaiting_destination: Vec<TransferDirection>,
    pub over_quota: bool,
    pub storage_used: u64,
    pub storage_max: u64,
    /// Most recent public link created on request
    pub last_exported_link: Option<String>,
}

impl StatusSnapshot {
    /// Percentage of storage in use, if the account size is known
    pub fn storage_percent(&self) -> Option<f64> {
        if self.storage_max == 0 {
            return None;
        }
        Some(self.storage_used as f64 * 100.0 / self.storage_max as f64)
    }
}
