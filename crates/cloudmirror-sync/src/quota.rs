//! Account quota guard
//!
//! Owns the over-quota suspension: entering it once per episode, keeping at
//! most one suspension notice outstanding, and lifting it when fresh account
//! details show free space again. Also rate-limits account-details requests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cloudmirror_core::domain::AccountQuotaState;
use cloudmirror_core::ports::{Notification, Ports};

const OVER_QUOTA_MESSAGE: &str = "You have exceeded your space quota. Your syncs and uploads \
have been disabled. Free up space or upgrade your account to resume.";

/// Over-quota suspension and stats rate limiting
#[derive(Debug)]
pub struct QuotaGuard {
    min_stats_interval: Duration,
    notice_outstanding: bool,
}

impl QuotaGuard {
    pub fn new(min_stats_interval: Duration) -> Self {
        Self {
            min_stats_interval,
            notice_outstanding: false,
        }
    }

    pub fn notice_outstanding(&self) -> bool {
        self.notice_outstanding
    }

    /// Marks the account over quota
    ///
    /// Returns true only on the transition into suspension, so the caller
    /// runs the disable/cancel sequence once per episode.
    pub fn enter_suspension(&mut self, quota: &mut AccountQuotaState) -> bool {
        if quota.over_quota {
            debug!("Already suspended for over quota");
            return false;
        }
        warn!("Account over quota, suspending syncs and uploads");
        quota.over_quota = true;
        true
    }

    /// Raises the suspension notice unless one is already outstanding
    pub fn raise_notice(&mut self, ports: &mut Ports) -> bool {
        if self.notice_outstanding {
            debug!("Over-quota notice already shown");
            return false;
        }
        self.notice_outstanding = true;
        ports.notify(Notification::over_quota(OVER_QUOTA_MESSAGE));
        true
    }

    /// The user closed the suspension notice
    pub fn notice_dismissed(&mut self) {
        self.notice_outstanding = false;
    }

    /// Lifts the suspension if the account has room again
    ///
    /// Syncs disabled by the suspension stay disabled until re-enabled.
    pub fn reassess(&mut self, quota: &mut AccountQuotaState) -> bool {
        let storage_room = quota.storage_max > 0 && quota.storage_used < quota.storage_max;
        let transfer_room = quota.transfer_max == 0 || quota.transfer_used < quota.transfer_max;
        if quota.over_quota && storage_room && transfer_room {
            info!(
                used = quota.storage_used,
                max = quota.storage_max,
                transfer_used = quota.transfer_used,
                transfer_max = quota.transfer_max,
                "Quota available again, lifting over-quota suspension"
            );
            quota.over_quota = false;
            return true;
        }
        false
    }

    /// Requests account details unless one was sent within the interval
    ///
    /// Returns true if a request was issued.
    pub fn request_stats(
        &mut self,
        now: DateTime<Utc>,
        quota: &mut AccountQuotaState,
        ports: &mut Ports,
    ) -> bool {
        let last = quota
            .last_stats_request_at
            .max(ports.preferences.last_stats_request());

        let due = match last {
            None => true,
            Some(at) => (now - at)
                .to_std()
                .map_or(false, |elapsed| elapsed > self.min_stats_interval),
        };
        if !due {
            debug!("Account details requested recently, skipping");
            return false;
        }

        quota.last_stats_request_at = Some(now);
        ports.preferences.set_last_stats_request(now);
        ports.engine.request_account_details();
        true
    }
}
