//! Log-backed adapters for the presentation-side ports
//!
//! The daemon has no desktop session to draw on, so file-manager updates and
//! user notices become structured log records.

use std::path::Path;

use cloudmirror_core::ports::{
    INotificationService, IPlatformIntegration, Notification, NotificationPriority,
};
use tracing::{debug, error, info, warn};

/// [`IPlatformIntegration`] that only logs
#[derive(Debug, Default)]
pub struct LogPlatform;

impl IPlatformIntegration for LogPlatform {
    fn sync_folder_removed(&mut self, local: &Path, name: &str) {
        info!(local = %local.display(), name, "Sync folder no longer synced");
    }

    fn notify_item_change(&mut self, path: &Path) {
        debug!(path = %path.display(), "Item sync status changed");
    }
}

/// [`INotificationService`] writing one log record per notice
///
/// The record level follows the notice priority.
#[derive(Debug, Default)]
pub struct LogNotifier {
    delivered: u64,
}

impl LogNotifier {
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl INotificationService for LogNotifier {
    fn notify(&mut self, notification: &Notification) -> anyhow::Result<()> {
        let category = notification.category;
        let title = notification.title.as_str();
        let body = notification.body.as_str();
        match notification.priority {
            NotificationPriority::Critical => {
                error!(target: "cloudmirror::notice", ?category, title, body, "Notice")
            }
            NotificationPriority::High => {
                warn!(target: "cloudmirror::notice", ?category, title, body, "Notice")
            }
            NotificationPriority::Normal => {
                info!(target: "cloudmirror::notice", ?category, title, body, "Notice")
            }
            NotificationPriority::Low => {
                debug!(target: "cloudmirror::notice", ?category, title, body, "Notice")
            }
        }
        self.delivered += 1;
        Ok(())
    }
}
