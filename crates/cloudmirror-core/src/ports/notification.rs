//! Notification service port (driven/secondary port)
//!
//! This module defines the interface for surfacing notices to the user.
//! Rendering belongs to the presentation layer; implementations may use
//! desktop notifications, a tray balloon, or just a log line.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because notification delivery is adapter-specific.
//! - Notifications are fire-and-forget; the caller does not wait for
//!   user interaction and logs a failed delivery instead of propagating it.

use serde::{Deserialize, Serialize};

// ============================================================================
// Notification struct and NotificationPriority enum
// ============================================================================

/// Priority level for a notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    /// Superseded by the next status update
    Low,
    #[default]
    Normal,
    High,
    /// Persists until acknowledged
    Critical,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
            NotificationPriority::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Category used by the presentation layer to pick styling and grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Info,
    Warning,
    Error,
    /// Temporary transfer/request problem
    Transient,
    /// Account storage quota exceeded
    OverQuota,
}

/// A notice to surface to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Title of the notification (short, descriptive)
    pub title: String,
    /// Body text with details about the event
    pub body: String,
    pub priority: NotificationPriority,
    pub category: NotificationCategory,
}

impl Notification {
    /// Creates an informational notification with `Normal` priority
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: NotificationPriority::Normal,
            category: NotificationCategory::Info,
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_category(mut self, category: NotificationCategory) -> Self {
        self.category = category;
        self
    }

    pub fn info(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
    }

    pub fn warning(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body).with_category(NotificationCategory::Warning)
    }

    /// Creates an error notification with High priority
    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::High)
            .with_category(NotificationCategory::Error)
    }

    /// Creates a transient notice with Low priority
    pub fn transient(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(title, body)
            .with_priority(NotificationPriority::Low)
            .with_category(NotificationCategory::Transient)
    }

    /// Creates the over-quota suspension notice
    pub fn over_quota(body: impl Into<String>) -> Self {
        Self::new("Storage full", body)
            .with_priority(NotificationPriority::Critical)
            .with_category(NotificationCategory::OverQuota)
    }
}

// ============================================================================
// INotificationService trait
// ============================================================================

/// Port trait for user-facing notices
pub trait INotificationService: Send {
    /// Sends a notification to the user
    fn notify(&mut self, notification: &Notification) -> anyhow::Result<()>;
}
