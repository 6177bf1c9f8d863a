//! Account quota and credentials
//!
//! This module defines the account's storage and bandwidth accounting and
//! the stored login credentials.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage and bandwidth figures returned by an account-details request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDetails {
    pub storage_max: u64,
    pub storage_used: u64,
    pub transfer_max: u64,
    pub transfer_used: u64,
}

/// Quota state of the logged-in account
///
/// Updated by the event dispatcher from account-details and over-quota
/// callbacks; read by the quota guard and published in the status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountQuotaState {
    pub over_quota: bool,
    pub last_stats_request_at: Option<DateTime<Utc>>,
    pub storage_max: u64,
    pub storage_used: u64,
    pub transfer_max: u64,
    pub transfer_used: u64,
}

impl AccountQuotaState {
    /// Replaces the figures with a fresh account-details response
    pub fn apply_details(&mut self, details: &AccountDetails) {
        self.storage_max = details.storage_max;
        self.storage_used = details.storage_used;
        self.transfer_max = details.transfer_max;
        self.transfer_used = details.transfer_used;
    }

    /// Accounts for a finished upload until the next refresh
    pub fn add_storage_used(&mut self, bytes: u64) {
        self.storage_used = self.storage_used.saturating_add(bytes);
    }
}

/// Stored login credentials, used when no resumable session exists
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password_hash: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_details_replaces_figures() {
        let mut quota = AccountQuotaState {
            storage_used: 5,
            ..Default::default()
        };
        quota.apply_details(&AccountDetails {
            storage_max: 100,
            storage_used: 40,
            transfer_max: 10,
            transfer_used: 1,
        });
        assert_eq!(quota.storage_used, 40);
        assert_eq!(quota.storage_max, 100);
        assert_eq!(quota.transfer_max, 10);
    }

    #[test]
    fn test_storage_accounting_saturates() {
        let mut quota = AccountQuotaState {
            storage_used: u64::MAX - 1,
            ..Default::default()
        };
        quota.add_storage_used(10);
        assert_eq!(quota.storage_used, u64::MAX);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials {
            email: "user@example.com".into(),
            password_hash: "abcdef".into(),
        };
        let debug = format!("{creds:?}");
        assert!(debug.contains("user@example.com"));
        assert!(!debug.contains("abcdef"));
    }
}
