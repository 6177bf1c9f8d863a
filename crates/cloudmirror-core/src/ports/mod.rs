//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the orchestration core
//! depends on, but whose implementations live in adapter code.
//!
//! ## Ports Overview
//!
//! - [`IEngine`] - The external sync/storage engine
//! - [`IPreferencesStore`] - Persisted user preferences
//! - [`IPlatformIntegration`] - File-manager integration
//! - [`INotificationService`] - User-facing notices

pub mod engine;
pub mod notification;
pub mod platform;
pub mod preferences;

pub use engine::IEngine;
pub use notification::{
    INotificationService, Notification, NotificationCategory, NotificationPriority,
};
pub use platform::IPlatformIntegration;
pub use preferences::{IPreferencesStore, PreferencesError};

/// The set of collaborators handed to every orchestration component
pub struct Ports {
    pub engine: Box<dyn IEngine>,
    pub preferences: Box<dyn IPreferencesStore>,
    pub platform: Box<dyn IPlatformIntegration>,
    pub notifier: Box<dyn INotificationService>,
}

impl Ports {
    pub fn new(
        engine: Box<dyn IEngine>,
        preferences: Box<dyn IPreferencesStore>,
        platform: Box<dyn IPlatformIntegration>,
        notifier: Box<dyn INotificationService>,
    ) -> Self {
        Self {
            engine,
            preferences,
            platform,
            notifier,
        }
    }

    /// Sends a notification, logging a failed delivery
    pub fn notify(&mut self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification) {
            tracing::warn!(error = %e, title = %notification.title, "Failed to deliver notification");
        }
    }
}
