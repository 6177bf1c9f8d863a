//! Platform integration port
//!
//! File-manager integration: overlay icons and sidebar bookmarks for synced
//! folders. The orchestration layer only tells it when a folder stops being
//! synced and when an item's sync status may have changed.

use std::path::Path;

/// Port trait for desktop/file-manager integration
pub trait IPlatformIntegration: Send {
    /// A local folder is no longer synced
    fn sync_folder_removed(&mut self, local: &Path, name: &str);

    /// The sync status of a local item may have changed
    fn notify_item_change(&mut self, path: &Path);
}
