//! Transfer statistics and recent files

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::Serialize;

use cloudmirror_core::domain::{NodeHandle, TransferDirection, TransferInfo};

/// Running totals for one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectionStats {
    /// Bytes expected across every transfer started since the last reset
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Bytes per second of the most recent report
    pub speed: u64,
}

/// Running totals for both directions
///
/// Reset once both directions have no pending transfers left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub upload: DirectionStats,
    pub download: DirectionStats,
}

impl TransferStats {
    pub fn direction(&self, direction: TransferDirection) -> &DirectionStats {
        match direction {
            TransferDirection::Upload => &self.upload,
            TransferDirection::Download => &self.download,
        }
    }

    fn direction_mut(&mut self, direction: TransferDirection) -> &mut DirectionStats {
        match direction {
            TransferDirection::Upload => &mut self.upload,
            TransferDirection::Download => &mut self.download,
        }
    }

    pub fn on_start(&mut self, transfer: &TransferInfo) {
        let stats = self.direction_mut(transfer.direction);
        stats.total_bytes = stats.total_bytes.saturating_add(transfer.total_bytes);
        stats.speed = 0;
    }

    pub fn on_update(&mut self, transfer: &TransferInfo) {
        let stats = self.direction_mut(transfer.direction);
        stats.transferred_bytes = stats.transferred_bytes.saturating_add(transfer.delta_bytes);
        stats.speed = transfer.speed;
    }

    pub fn on_finish(&mut self, transfer: &TransferInfo) {
        let stats = self.direction_mut(transfer.direction);
        stats.transferred_bytes = stats.transferred_bytes.saturating_add(transfer.delta_bytes);
        stats.speed = 0;
    }

    /// Clears every total when nothing is pending in either direction
    ///
    /// Returns true if the totals were reset.
    pub fn reset_if_idle(&mut self, pending_uploads: usize, pending_downloads: usize) -> bool {
        if pending_uploads == 0 && pending_downloads == 0 {
            *self = Self::default();
            return true;
        }
        false
    }
}

/// A recently transferred file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentFile {
    pub name: String,
    pub handle: NodeHandle,
    pub local_path: Option<PathBuf>,
}

/// Most recent files first, bounded
#[derive(Debug, Clone)]
pub struct RecentFiles {
    items: VecDeque<RecentFile>,
    capacity: usize,
}

impl RecentFiles {
    pub const DEFAULT_CAPACITY: usize = 3;

    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Adds a file, replacing an older entry for the same node
    pub fn push(&mut self, file: RecentFile) {
        self.items.retain(|f| f.handle != file.handle);
        self.items.push_front(file);
        self.items.truncate(self.capacity);
    }

    pub fn to_vec(&self) -> Vec<RecentFile> {
        self.items.iter().cloned().collect()
    }
}

impl Default for RecentFiles {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
