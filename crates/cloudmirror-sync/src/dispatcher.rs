//! Engine event dispatcher
//!
//! The [`Dispatcher`] is the single funnel for engine callbacks and
//! presentation-layer commands. It owns the orchestration context (the
//! ports, the sync lifecycle, the transfer queue, quota state, running
//! totals and the upload tag cache) and is driven one [`Message`] at a time
//! by the orchestration loop, so no component is ever entered concurrently.
//!
//! ## Login sequence
//!
//! ```text
//! start ─→ login ─(ok)─→ fetch_nodes ─(ok)─→ post-login setup ─→ start_all
//!            │                 │
//!          (err)             (err / no root)
//!            └───────→ logout and reset ─→ (logout finished) ─→ start
//! ```
//!
//! A login or tree fetch that runs longer than the configured limit makes
//! [`Dispatcher::on_login_timeout`] hand back a [`ProbeRequest`]; the probe
//! outcome only ever produces a notice.
//!
//! ## Over quota
//!
//! Any request or transfer callback carrying an over-quota error cancels
//! uploads and disables every registered pair once per episode; the
//! suspension notice is never raised twice while it is outstanding.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use cloudmirror_core::config::{Config, ConnectivityConfig};
use cloudmirror_core::domain::{
    AccountDetails, AccountQuotaState, DisableReason, DomainError, EngineError, EngineErrorCode,
    NodeHandle, NodeInfo, ProxyEndpoint, SessionState, TransferDirection, TransferInfo,
    UploadLimit,
};
use cloudmirror_core::ports::{IEngine, Notification, Ports};

use crate::events::{EngineEvent, FinishedRequest, Message, RequestKind, UiCommand};
use crate::lifecycle::SyncLifecycleManager;
use crate::network::{NetworkWatcher, PollOutcome};
use crate::probe::{ProbeOutcome, ProbeRequest};
use crate::quota::QuotaGuard;
use crate::stats::{RecentFile, RecentFiles, TransferStats};
use crate::status::{GlobalSyncState, PairStatus, StatusSnapshot};
use crate::tag_cache::PendingUploads;
use crate::transfer_queue::{Enqueued, QueueError, TransferQueue};

/// What the orchestration loop does after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// Leave the loop; the exit sequence already ran
    Exit,
    /// Leave the loop and restart the process to apply an update
    Restart,
}

fn elapsed(now: DateTime<Utc>, since: DateTime<Utc>) -> Option<Duration> {
    (now - since).to_std().ok()
}

/// Orchestration context and event router
pub struct Dispatcher {
    ports: Ports,
    session: SessionState,
    lifecycle: SyncLifecycleManager,
    queue: TransferQueue,
    quota_guard: QuotaGuard,
    quota: AccountQuotaState,
    stats: TransferStats,
    recent: RecentFiles,
    pending_uploads: PendingUploads,
    global: GlobalSyncState,
    connectivity: ConnectivityConfig,
    max_login_time: Duration,
    min_foreign_nodes_interval: Duration,
    login_started_at: Option<DateTime<Utc>>,
    probe_running: bool,
    last_foreign_notice: Option<DateTime<Utc>>,
    restart_pending: bool,
    last_exported_link: Option<String>,
}

impl Dispatcher {
    pub fn new(config: &Config, ports: Ports) -> Self {
        Self {
            ports,
            session: SessionState::default(),
            lifecycle: SyncLifecycleManager::new(),
            queue: TransferQueue::new(),
            quota_guard: QuotaGuard::new(config.quota.min_stats_interval()),
            quota: AccountQuotaState::default(),
            stats: TransferStats::default(),
            recent: RecentFiles::default(),
            pending_uploads: PendingUploads::new(
                config.transfers.tag_capacity,
                config.transfers.tag_ttl(),
            ),
            global: GlobalSyncState::default(),
            connectivity: config.connectivity.clone(),
            max_login_time: config.login.max_login_time(),
            min_foreign_nodes_interval: config.notifications.min_foreign_nodes_interval(),
            login_started_at: None,
            probe_running: false,
            last_foreign_notice: None,
            restart_pending: false,
            last_exported_link: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn session(&self) -> SessionState {
        self.session
    }

    pub fn lifecycle(&self) -> &SyncLifecycleManager {
        &self.lifecycle
    }

    pub fn quota(&self) -> &AccountQuotaState {
        &self.quota
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn recent_files(&self) -> Vec<RecentFile> {
        self.recent.to_vec()
    }

    pub fn pending_uploads(&self) -> &PendingUploads {
        &self.pending_uploads
    }

    pub fn global_state(&self) -> GlobalSyncState {
        self.global
    }

    pub fn ports_mut(&mut self) -> &mut Ports {
        &mut self.ports
    }

    /// Time left before a hung login triggers the connectivity check
    pub fn login_timer_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.login_started_at?;
        let spent = elapsed(now, started).unwrap_or(Duration::ZERO);
        Some(self.max_login_time.saturating_sub(spent))
    }

    /// Current state for the presentation layer
    pub fn snapshot(&self) -> StatusSnapshot {
        let pairs = self
            .ports
            .preferences
            .sync_pairs()
            .into_iter()
            .enumerate()
            .map(|(index, pair)| PairStatus {
                name: pair.name,
                local_folder: pair.local_folder,
                state: self.lifecycle.state(index).cloned().unwrap_or_default(),
            })
            .collect();

        StatusSnapshot {
            session: self.session,
            global: self.global,
            pairs,
            stats: self.stats,
            recent_files: self.recent.to_vec(),
            awaiting_destination: self.queue.awaiting_destination(),
            over_quota: self.quota.over_quota,
            storage_used: self.quota.storage_used,
            storage_max: self.quota.storage_max,
            last_exported_link: self.last_exported_link.clone(),
        }
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Applies the proxy and logs in with the stored account
    ///
    /// Without a stored account the dispatcher waits for `SetupFinished`.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.apply_proxy();
        if !self.ports.preferences.has_account() {
            info!("No account configured, waiting for setup");
            self.session = SessionState::SetupRequired;
            return;
        }
        self.login(now);
        self.flush();
    }

    /// Handles one queued message
    pub fn handle(&mut self, message: Message, now: DateTime<Utc>) -> Control {
        let mut control = match message {
            Message::Engine(event) => {
                self.handle_engine(event, now);
                Control::Continue
            }
            Message::Ui(command) => self.handle_ui(command, now),
            Message::ProbeFinished(outcome) => {
                self.on_probe_finished(outcome);
                Control::Continue
            }
        };

        if control == Control::Continue && self.restart_pending && self.can_restart() {
            info!("Transfers finished, restarting to apply the pending update");
            self.shutdown(now);
            control = Control::Restart;
        }

        self.flush();
        control
    }

    /// Polls the network watcher against the engine
    pub fn poll_network(&mut self, watcher: &mut NetworkWatcher, now: DateTime<Utc>) -> PollOutcome {
        watcher.poll(now, self.ports.engine.as_mut())
    }

    /// Disarms an expired login timer and returns the diagnostic to run
    pub fn on_login_timeout(&mut self, now: DateTime<Utc>) -> Option<ProbeRequest> {
        let started = self.login_started_at?;
        let spent = elapsed(now, started)?;
        if spent < self.max_login_time {
            return None;
        }
        self.login_started_at = None;

        if self.probe_running {
            debug!("Connectivity check already running");
            return None;
        }
        warn!(
            elapsed_ms = spent.as_millis() as u64,
            session = %self.session,
            "Login is taking too long, checking connectivity"
        );
        let proxy = match self.resolve_proxy() {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!(error = %e, "Invalid proxy settings, probing without proxy");
                None
            }
        };
        self.probe_running = true;
        Some(ProbeRequest::from_config(&self.connectivity, proxy))
    }

    fn flush(&mut self) {
        if let Err(e) = self.ports.preferences.flush() {
            error!(error = %e, "Failed to save preferences");
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    fn login(&mut self, now: DateTime<Utc>) {
        let crashed = self.ports.preferences.crashed();
        if crashed {
            self.ports.preferences.set_crashed(false);
        }
        let session = self.ports.preferences.session();
        let credentials = self.ports.preferences.credentials();

        match (crashed, session, credentials) {
            (true, _, Some(credentials)) | (false, None, Some(credentials)) => {
                info!(email = %credentials.email, full_reload = crashed, "Logging in with credentials");
                self.ports.engine.login_with_credentials(&credentials);
            }
            (_, Some(session), _) => {
                info!(full_reload = crashed, "Resuming stored session");
                self.ports.engine.login_with_session(&session);
            }
            (_, None, None) => {
                warn!("Account has neither a session nor credentials, setup required");
                self.session = SessionState::SetupRequired;
                return;
            }
        }
        self.session = SessionState::LoggingIn;
        self.login_started_at = Some(now);
    }

    /// Logs out after a failed login or tree fetch and forgets the account
    fn logout_and_reset(&mut self) {
        info!("Logging out and resetting the stored account");
        self.stop_syncs_for_logout();
        self.ports.preferences.unlink();
        self.session = SessionState::LoggingOut;
        self.ports.engine.logout();
    }

    /// Stops the running syncs and releases their folders
    ///
    /// Runs before the account is unlinked, while the pairs are still known.
    /// A no-op once the lifecycle has been reset.
    fn stop_syncs_for_logout(&mut self) {
        if self.lifecycle.states().is_empty() {
            return;
        }
        self.lifecycle.shutdown(&mut self.ports);
        self.lifecycle.reset();
    }

    fn reset_session_state(&mut self) {
        self.lifecycle.reset();
        for direction in TransferDirection::ALL {
            if self.queue.len(direction) > 0 {
                self.queue.cancel(direction);
            }
        }
        self.stats = TransferStats::default();
        self.pending_uploads.clear();
        self.quota = AccountQuotaState::default();
        self.quota_guard.notice_dismissed();
        self.global = GlobalSyncState::default();
        self.login_started_at = None;
    }

    fn on_login_finished(&mut self, error: Option<&EngineError>) {
        if self.session == SessionState::SetupRequired {
            debug!("Login completion during setup, ignoring");
            return;
        }

        if let Some(e) = error {
            self.login_started_at = None;
            error!(error = %e, "Login failed");
            let notice = if e.code == EngineErrorCode::Blocked {
                Notification::error(
                    "Account blocked",
                    "Your account has been blocked. Please contact support.",
                )
            } else {
                Notification::error("Login failed", format!("Unable to log in: {}", e.message))
            };
            self.ports.notify(notice);
            self.logout_and_reset();
            return;
        }

        let Some(session) = self.ports.engine.dump_session() else {
            self.login_started_at = None;
            error!("Login succeeded without a resumable session");
            self.logout_and_reset();
            return;
        };
        self.ports.preferences.set_session(Some(session));
        info!("Logged in, fetching nodes");
        self.session = SessionState::FetchingNodes;
        self.ports.engine.fetch_nodes();
    }

    fn on_logout_finished(&mut self, error: Option<&EngineError>, now: DateTime<Utc>) {
        self.stop_syncs_for_logout();
        match error {
            Some(e) if e.code == EngineErrorCode::InvalidSession => {
                warn!("Session is no longer valid");
                self.ports.notify(Notification::error(
                    "Logged out",
                    "You have been logged out because your session is no longer valid. \
                     Please log in again.",
                ));
                self.ports.preferences.unlink();
            }
            Some(e) => warn!(error = %e, "Logout reported an error"),
            None => {}
        }

        info!("Logged out");
        self.reset_session_state();
        self.session = SessionState::LoggedOut;
        self.start(now);
    }

    fn on_fetch_nodes_finished(&mut self, error: Option<&EngineError>, now: DateTime<Utc>) {
        if self.session == SessionState::SetupRequired {
            debug!("Fetch completion during setup, ignoring");
            return;
        }
        self.login_started_at = None;

        if let Some(e) = error {
            error!(error = %e, "Fetching the node tree failed");
        } else if !self.ports.engine.has_root_node() {
            error!("Fetched node tree has no root, the next start reloads from scratch");
            self.ports.preferences.set_crashed(true);
        } else {
            info!("Node tree loaded");
            self.session = SessionState::LoggedIn;
            self.after_login(now);
            return;
        }

        self.ports.notify(Notification::error(
            "Unable to load your files",
            "Your files could not be loaded from the server. Please log in again.",
        ));
        self.logout_and_reset();
    }

    fn after_login(&mut self, now: DateTime<Utc>) {
        self.ports.preferences.set_last_execution(now);

        let rules = self.ports.preferences.exclusions();
        self.ports
            .engine
            .set_exclusion_rules(&rules.names, rules.lower_bytes(), rules.upper_bytes());

        let limit = UploadLimit::from_kib_setting(self.ports.preferences.upload_limit_kib());
        self.ports.engine.set_upload_limit(limit.bytes_per_second());

        self.quota_guard
            .request_stats(now, &mut self.quota, &mut self.ports);

        if self.ports.preferences.was_paused() {
            info!("Transfers were paused at last exit, pausing again");
            self.ports.engine.pause_transfers(true);
        }

        self.lifecycle.start_all(&mut self.ports);
        self.refresh_global_state();
    }

    fn on_setup_finished(&mut self, now: DateTime<Utc>) {
        if self.session != SessionState::SetupRequired {
            debug!(session = %self.session, "Setup finished outside of setup, ignoring");
            return;
        }
        info!("Setup finished");
        self.session = SessionState::LoggedOut;
        self.start(now);
    }

    // ========================================================================
    // Proxy and connectivity
    // ========================================================================

    fn resolve_proxy(&self) -> Result<Option<ProxyEndpoint>, DomainError> {
        let auto = self.ports.engine.auto_proxy();
        self.ports.preferences.proxy().resolve(auto.as_deref())
    }

    fn apply_proxy(&mut self) {
        match self.resolve_proxy() {
            Ok(endpoint) => {
                info!(proxy = ?endpoint.as_ref().map(ProxyEndpoint::url), "Applying proxy settings");
                self.ports.engine.set_proxy(endpoint.as_ref());
            }
            Err(e) => {
                warn!(error = %e, "Invalid proxy settings, connecting directly");
                self.ports.engine.set_proxy(None);
                self.ports.notify(Notification::warning(
                    "Proxy settings",
                    format!("The proxy settings are invalid ({e}). Connecting directly."),
                ));
            }
        }
    }

    fn on_probe_finished(&mut self, outcome: ProbeOutcome) {
        self.probe_running = false;
        match outcome {
            Ok(()) => debug!("Network reachable, login is just slow"),
            Err(e) => {
                warn!(error = %e, "Connectivity check failed");
                self.ports.notify(Notification::warning(
                    "Connection problem",
                    "Unable to connect. Please check your Internet connectivity \
                     and firewall configuration.",
                ));
            }
        }
    }

    // ========================================================================
    // Engine events
    // ========================================================================

    fn handle_engine(&mut self, event: EngineEvent, now: DateTime<Utc>) {
        match event {
            EngineEvent::RequestStarted(kind) => {
                debug!(%kind, "Request started");
                if matches!(kind, RequestKind::Login | RequestKind::FetchNodes)
                    && self.session != SessionState::SetupRequired
                {
                    self.login_started_at = Some(now);
                }
            }
            EngineEvent::RequestFinished { request, error } => {
                self.on_request_finished(request, error, now)
            }
            EngineEvent::RequestTemporaryError { kind, error } => {
                if error.is_over_quota() {
                    self.enter_over_quota(now);
                } else {
                    warn!(%kind, %error, "Temporary request error");
                    self.refresh_global_state();
                }
            }
            EngineEvent::TransferStarted(transfer) => {
                debug!(tag = %transfer.tag, direction = %transfer.direction, total = transfer.total_bytes, "Transfer started");
                self.stats.on_start(&transfer);
            }
            EngineEvent::TransferUpdated(transfer) => self.stats.on_update(&transfer),
            EngineEvent::TransferFinished { transfer, error } => {
                self.on_transfer_finished(transfer, error, now)
            }
            EngineEvent::TransferTemporaryError { transfer, error } => {
                self.on_transfer_temporary_error(&transfer, &error, now)
            }
            EngineEvent::GlobalStateChanged => self.refresh_global_state(),
            EngineEvent::NodesUpdated(nodes) => self.on_nodes_updated(nodes, now),
            EngineEvent::UsersUpdated => {
                if self.session.is_logged_in() {
                    self.quota_guard
                        .request_stats(now, &mut self.quota, &mut self.ports);
                }
            }
            EngineEvent::ReloadNeeded => {
                warn!("Engine requested a full reload, flagging it for the next start");
                self.ports.preferences.set_crashed(true);
            }
        }
    }

    fn on_request_finished(
        &mut self,
        request: FinishedRequest,
        error: Option<EngineError>,
        now: DateTime<Utc>,
    ) {
        let kind = request.kind();
        match &error {
            Some(e) => {
                debug!(%kind, error = %e, "Request failed");
                if e.is_over_quota() {
                    self.enter_over_quota(now);
                }
            }
            None => debug!(%kind, "Request finished"),
        }

        match request {
            FinishedRequest::Login => self.on_login_finished(error.as_ref()),
            FinishedRequest::Logout => self.on_logout_finished(error.as_ref(), now),
            FinishedRequest::FetchNodes => self.on_fetch_nodes_finished(error.as_ref(), now),
            FinishedRequest::Export { node, link } => {
                self.on_export_finished(node, link, error.as_ref())
            }
            FinishedRequest::AccountDetails(details) => {
                self.on_account_details(details, error.as_ref())
            }
            FinishedRequest::PauseTransfers { paused } => match &error {
                Some(e) => {
                    warn!(paused, error = %e, "Pause request failed");
                    self.ports.notify(Notification::warning(
                        "Transfers",
                        format!("Unable to change the pause state: {}", e.message),
                    ));
                }
                None => {
                    info!(paused, "Transfer pause state changed");
                    self.ports.preferences.set_was_paused(paused);
                    self.refresh_global_state();
                }
            },
            FinishedRequest::AddSync {
                local,
                remote,
                fingerprint,
            } => {
                let result = match &error {
                    None => Ok(fingerprint),
                    Some(e) => Err(e),
                };
                self.lifecycle
                    .on_add_sync_finished(&local, remote, result, &mut self.ports);
            }
            FinishedRequest::RemoveSync { remote, local } => self.lifecycle.on_remove_sync_finished(
                remote,
                local.as_deref(),
                error.as_ref(),
                &mut self.ports,
            ),
        }
    }

    fn on_export_finished(
        &mut self,
        node: NodeHandle,
        link: Option<String>,
        error: Option<&EngineError>,
    ) {
        match (error, link) {
            (None, Some(link)) => {
                info!(%node, "Public link created");
                self.ports.notify(Notification::info("Link copied", link.clone()));
                self.last_exported_link = Some(link);
            }
            (Some(e), _) => {
                warn!(%node, error = %e, "Export failed");
                self.ports.notify(Notification::error(
                    "Link not created",
                    format!("Unable to get the link: {}", e.message),
                ));
            }
            (None, None) => {
                warn!(%node, "Export finished without a link");
                self.ports.notify(Notification::error(
                    "Link not created",
                    "The server did not return a link",
                ));
            }
        }
    }

    fn on_account_details(&mut self, details: Option<AccountDetails>, error: Option<&EngineError>) {
        if let Some(e) = error {
            warn!(error = %e, "Account details request failed");
            self.ports.notify(Notification::transient(
                "Account",
                "Unable to refresh the account details",
            ));
            return;
        }
        let Some(details) = details else {
            debug!("Account details finished without a payload");
            return;
        };

        self.quota.apply_details(&details);
        info!(
            storage_used = details.storage_used,
            storage_max = details.storage_max,
            transfer_used = details.transfer_used,
            transfer_max = details.transfer_max,
            "Account details updated"
        );
        if self.quota_guard.reassess(&mut self.quota) {
            self.ports.notify(Notification::info(
                "Storage available",
                "You have free storage again. Re-enable your syncs to resume them.",
            ));
        }
    }

    fn on_transfer_finished(
        &mut self,
        transfer: TransferInfo,
        error: Option<EngineError>,
        now: DateTime<Utc>,
    ) {
        self.stats.on_finish(&transfer);

        match &error {
            Some(e) if e.is_over_quota() => {
                warn!(tag = %transfer.tag, direction = %transfer.direction, "Transfer failed: over quota");
                self.enter_over_quota(now);
            }
            Some(e) if e.code == EngineErrorCode::Cancelled => {
                debug!(tag = %transfer.tag, "Transfer cancelled");
            }
            Some(e) => {
                warn!(tag = %transfer.tag, file = %transfer.file_name, error = %e, "Transfer failed");
                self.ports.notify(Notification::error(
                    "Transfer failed",
                    format!("{}: {}", transfer.file_name, e.message),
                ));
            }
            None => self.on_transfer_succeeded(&transfer, now),
        }

        let uploads = self.ports.engine.pending_transfers(TransferDirection::Upload);
        let downloads = self.ports.engine.pending_transfers(TransferDirection::Download);
        if self.stats.reset_if_idle(uploads, downloads) {
            debug!("No transfers pending, totals reset");
        }
    }

    fn on_transfer_succeeded(&mut self, transfer: &TransferInfo, now: DateTime<Utc>) {
        match transfer.direction {
            TransferDirection::Download => {
                if let Some(handle) = transfer.node_handle {
                    self.recent.push(RecentFile {
                        name: transfer.file_name.clone(),
                        handle,
                        local_path: transfer.path.clone(),
                    });
                }
            }
            TransferDirection::Upload => {
                self.quota.add_storage_used(transfer.total_bytes);
                if transfer.is_sync {
                    return;
                }
                if let Some(path) = &transfer.path {
                    debug!(tag = %transfer.tag, path = %path.display(), "Remembering upload for node correlation");
                    self.pending_uploads.insert(transfer.tag, path.clone(), now);
                }
            }
        }
    }

    fn on_transfer_temporary_error(
        &mut self,
        transfer: &TransferInfo,
        error: &EngineError,
        now: DateTime<Utc>,
    ) {
        if error.is_over_quota() {
            self.enter_over_quota(now);
            return;
        }
        if transfer.num_retry == 1 {
            warn!(tag = %transfer.tag, %error, "Temporary transfer error");
            self.ports.notify(Notification::transient(
                "Temporary transmission error",
                format!("{}: {}", transfer.file_name, error.message),
            ));
        } else {
            debug!(tag = %transfer.tag, retry = transfer.num_retry, "Transfer still retrying");
            self.refresh_global_state();
        }
    }

    fn refresh_global_state(&mut self) {
        self.global = GlobalSyncState {
            indexing: self.ports.engine.is_scanning(),
            waiting: self.ports.engine.is_waiting(),
            paused: self.ports.preferences.was_paused(),
        };
        debug!(
            indexing = self.global.indexing,
            waiting = self.global.waiting,
            paused = self.global.paused,
            "Global sync state"
        );
    }

    // ========================================================================
    // Node updates
    // ========================================================================

    fn on_nodes_updated(&mut self, nodes: Option<Vec<NodeInfo>>, now: DateTime<Utc>) {
        let Some(nodes) = nodes else {
            debug!("Full tree reload reported");
            return;
        };
        if !self.session.is_logged_in() {
            debug!(count = nodes.len(), "Node update before login completed, ignoring");
            return;
        }

        self.lifecycle.check_moved_folders(&nodes, &mut self.ports);
        self.correlate_uploads(&nodes, now);
        self.detect_foreign_nodes(&nodes, now);
    }

    /// Recovers the local origin of nodes created by our own uploads
    ///
    /// Works whichever of the node update and the transfer completion comes
    /// first: a missing cache entry just leaves the path unknown.
    fn correlate_uploads(&mut self, nodes: &[NodeInfo], now: DateTime<Utc>) {
        for node in nodes
            .iter()
            .filter(|n| n.is_file() && !n.removed && !n.sync_deleted)
        {
            let Some(tag) = node.tag else {
                continue;
            };
            let cached = self.pending_uploads.take(tag, now);
            let local_path: Option<PathBuf> = node.local_path.clone().or(cached);
            if local_path.is_none() {
                debug!(%tag, handle = %node.handle, "No local path known for uploaded node");
            }
            self.recent.push(RecentFile {
                name: node.name.clone(),
                handle: node.handle,
                local_path,
            });
        }
    }

    fn detect_foreign_nodes(&mut self, nodes: &[NodeInfo], now: DateTime<Utc>) {
        let Some(last_exit) = self.ports.preferences.last_exit() else {
            return;
        };
        let foreign = nodes.iter().filter(|n| n.is_foreign(last_exit)).count();
        if foreign == 0 {
            return;
        }

        info!(foreign, "Nodes added by another client");
        self.quota_guard
            .request_stats(now, &mut self.quota, &mut self.ports);

        let due = self.last_foreign_notice.map_or(true, |at| {
            elapsed(now, at).is_some_and(|e| e > self.min_foreign_nodes_interval)
        });
        if due {
            self.last_foreign_notice = Some(now);
            self.ports.notify(Notification::info(
                "New files",
                "You have new or updated files in your account",
            ));
        } else {
            debug!("Foreign node notice shown recently, skipping");
        }
    }

    // ========================================================================
    // Over quota
    // ========================================================================

    fn enter_over_quota(&mut self, now: DateTime<Utc>) {
        if self.quota_guard.enter_suspension(&mut self.quota) {
            self.ports.engine.cancel_transfers(TransferDirection::Upload);
            let disabled = self
                .lifecycle
                .disable_all(DisableReason::OverQuota, &mut self.ports);
            info!(disabled, "Syncs and uploads suspended");
            self.refresh_global_state();
            self.quota_guard
                .request_stats(now, &mut self.quota, &mut self.ports);
        }
        self.quota_guard.raise_notice(&mut self.ports);
    }

    // ========================================================================
    // UI commands
    // ========================================================================

    fn handle_ui(&mut self, command: UiCommand, now: DateTime<Utc>) -> Control {
        match command {
            UiCommand::EnqueueUpload(paths) => self.enqueue_upload(paths),
            UiCommand::EnqueueDownload(handles) => self.enqueue_download(handles),
            UiCommand::UploadDestinationResolved(parent) => self.resolve_upload(parent),
            UiCommand::DownloadDestinationResolved(destination) => {
                self.resolve_download(&destination)
            }
            UiCommand::DestinationCancelled(direction) => {
                self.queue.cancel(direction);
            }
            UiCommand::PauseTransfers(pause) => {
                info!(pause, "Pause requested");
                self.ports.engine.pause_transfers(pause);
            }
            UiCommand::SetUploadLimit(kib) => {
                let limit = UploadLimit::from_kib_setting(kib);
                info!(limit = ?limit, "Upload limit changed");
                self.ports.preferences.set_upload_limit_kib(kib);
                self.ports.engine.set_upload_limit(limit.bytes_per_second());
            }
            UiCommand::ApplyProxy(settings) => {
                self.ports.preferences.set_proxy(settings);
                self.apply_proxy();
                self.ports.engine.retry_pending_connections(true);
            }
            UiCommand::SetupFinished => self.on_setup_finished(now),
            UiCommand::DisableSync(index) => {
                self.lifecycle.disable_pair(index, &mut self.ports);
            }
            UiCommand::EnableSync(index) => self.enable_sync(index),
            UiCommand::ExportNode(node) => {
                if self.session.is_logged_in() {
                    self.ports.engine.export_node(node);
                } else {
                    debug!(%node, "Export requested while logged out, ignoring");
                }
            }
            UiCommand::OverQuotaNoticeDismissed => self.quota_guard.notice_dismissed(),
            UiCommand::RestartForUpdate => return self.request_restart(now),
            UiCommand::Exit => {
                info!("Exit requested");
                self.shutdown(now);
                return Control::Exit;
            }
        }
        Control::Continue
    }

    fn enqueue_upload(&mut self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        if self.quota.over_quota {
            warn!(count = paths.len(), "Upload refused while over quota");
            self.quota_guard.raise_notice(&mut self.ports);
            return;
        }
        if self.queue.enqueue_upload(paths) == Enqueued::NeedsDestination {
            if let Some(parent) = self.ports.preferences.default_upload_folder() {
                debug!(%parent, "Using the default upload folder");
                self.resolve_upload(parent);
            }
        }
    }

    fn enqueue_download(&mut self, handles: Vec<NodeHandle>) {
        if handles.is_empty() {
            return;
        }
        if self.queue.enqueue_download(handles) == Enqueued::NeedsDestination {
            if let Some(destination) = self.ports.preferences.default_download_folder() {
                debug!(destination = %destination.display(), "Using the default download folder");
                self.resolve_download(&destination);
            }
        }
    }

    fn resolve_upload(&mut self, parent: NodeHandle) {
        let engine: &mut dyn IEngine = self.ports.engine.as_mut();
        if let Err(e) = self.queue.resolve_upload(parent, engine) {
            self.report_queue_error(e);
        }
    }

    fn resolve_download(&mut self, destination: &Path) {
        let engine: &mut dyn IEngine = self.ports.engine.as_mut();
        if let Err(e) = self.queue.resolve_download(destination, engine) {
            self.report_queue_error(e);
        }
    }

    fn report_queue_error(&mut self, e: QueueError) {
        match e {
            QueueError::NothingPending(direction) => {
                debug!(%direction, "Destination resolved with nothing pending");
            }
            other => self
                .ports
                .notify(Notification::error("Transfer not started", other.to_string())),
        }
    }

    fn enable_sync(&mut self, index: usize) {
        if self.quota.over_quota {
            warn!(index, "Sync cannot be enabled while over quota");
            self.quota_guard.raise_notice(&mut self.ports);
            return;
        }
        if !self.session.is_logged_in() {
            debug!(index, session = %self.session, "Sync can only be enabled while logged in");
            return;
        }
        self.lifecycle.enable_pair(index, &mut self.ports);
    }

    // ========================================================================
    // Restart / exit
    // ========================================================================

    fn can_restart(&self) -> bool {
        self.ports.engine.pending_transfers(TransferDirection::Upload) == 0
            && self.ports.engine.pending_transfers(TransferDirection::Download) == 0
            && !self.ports.engine.is_waiting()
    }

    fn request_restart(&mut self, now: DateTime<Utc>) -> Control {
        if self.can_restart() {
            info!("Restarting to apply update");
            self.shutdown(now);
            return Control::Restart;
        }
        if !self.restart_pending {
            self.restart_pending = true;
            info!("Update deferred until transfers finish");
            self.ports.notify(Notification::info(
                "Update ready",
                "The update will be installed when all transfers have finished",
            ));
        }
        Control::Continue
    }

    fn shutdown(&mut self, now: DateTime<Utc>) {
        self.lifecycle.shutdown(&mut self.ports);
        self.ports.preferences.set_last_exit(now);
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use cloudmirror_core::domain::{Credentials, NodeKind, SessionToken, TransferTag};
    use cloudmirror_core::store::PreferencesData;

    use super::*;
    use crate::testing::TestHarness;

    fn config() -> Config {
        Config::default()
    }

    fn logged_in_data() -> PreferencesData {
        PreferencesData {
            session: Some(SessionToken::new("sess").unwrap()),
            ..Default::default()
        }
    }

    fn finished(request: FinishedRequest) -> Message {
        Message::Engine(EngineEvent::RequestFinished {
            request,
            error: None,
        })
    }

    #[test]
    fn test_start_without_account_waits_for_setup() {
        let h = TestHarness::new();
        let (ports, engine, _, _) = h.split();
        let mut d = Dispatcher::new(&config(), ports);

        d.start(Utc::now());
        assert_eq!(d.session(), SessionState::SetupRequired);
        assert_eq!(engine.commands(), vec!["set_proxy(none)".to_string()]);

        // Login callbacks during setup are ignored
        let err = EngineError::new(EngineErrorCode::Other(-9), "bad password");
        d.handle(
            Message::Engine(EngineEvent::RequestFinished {
                request: FinishedRequest::Login,
                error: Some(err),
            }),
            Utc::now(),
        );
        assert_eq!(engine.count("logout"), 0);
    }

    #[test]
    fn test_login_sequence_reaches_logged_in() {
        let h = TestHarness::with_preferences(logged_in_data());
        h.engine.with_state(|s| {
            s.has_root = true;
            s.session = Some(SessionToken::new("fresh").unwrap());
        });
        let (ports, engine, _, _) = h.split();
        let mut d = Dispatcher::new(&config(), ports);
        let now = Utc::now();

        d.start(now);
        assert_eq!(d.session(), SessionState::LoggingIn);
        assert_eq!(engine.count("login_with_session"), 1);

        d.handle(finished(FinishedRequest::Login), now);
        assert_eq!(d.session(), SessionState::FetchingNodes);
        assert_eq!(engine.count("fetch_nodes"), 1);

        d.handle(finished(FinishedRequest::FetchNodes), now);
        assert_eq!(d.session(), SessionState::LoggedIn);
        assert_eq!(engine.count("set_exclusion_rules"), 1);
        assert_eq!(engine.count("set_upload_limit(unlimited)"), 1);
        assert_eq!(engine.count("request_account_details"), 1);
        assert_eq!(
            d.ports_mut().preferences.session().map(|s| s.as_str().to_string()),
            Some("fresh".to_string())
        );
        assert_eq!(d.ports_mut().preferences.last_execution(), Some(now));
        assert_eq!(d.login_timer_remaining(now), None);
    }

    #[test]
    fn test_crashed_flag_prefers_credentials() {
        let data = PreferencesData {
            session: Some(SessionToken::new("sess").unwrap()),
            credentials: Some(Credentials {
                email: "me@example.com".into(),
                password_hash: "h".into(),
            }),
            crashed: true,
            ..Default::default()
        };
        let (ports, engine, _, _) = TestHarness::with_preferences(data).split();
        let mut d = Dispatcher::new(&config(), ports);

        d.start(Utc::now());
        assert_eq!(engine.count("login_with_credentials(me@example.com)"), 1);
        assert_eq!(engine.count("login_with_session"), 0);
        assert!(!d.ports_mut().preferences.crashed());
    }

    #[test]
    fn test_login_failure_logs_out_and_restarts_setup() {
        let (ports, engine, _, notifier) = TestHarness::with_preferences(logged_in_data()).split();
        let mut d = Dispatcher::new(&config(), ports);
        let now = Utc::now();
        d.start(now);

        let err = EngineError::new(EngineErrorCode::Blocked, "blocked");
        d.handle(
            Message::Engine(EngineEvent::RequestFinished {
                request: FinishedRequest::Login,
                error: Some(err),
            }),
            now,
        );
        assert_eq!(engine.count("logout"), 1);
        assert_eq!(notifier.sent()[0].title, "Account blocked");

        d.handle(finished(FinishedRequest::Logout), now);
        assert_eq!(d.session(), SessionState::SetupRequired);
        assert_eq!(engine.count("login_with_session"), 1);
    }

    #[test]
    fn test_login_without_session_unlinks_account() {
        let h = TestHarness::with_preferences(logged_in_data());
        let (ports, engine, _, _) = h.split();
        let mut d = Dispatcher::new(&config(), ports);
        let now = Utc::now();
        d.start(now);
        engine.with_state(|s| s.session = None);

        d.handle(finished(FinishedRequest::Login), now);
        assert_eq!(d.session(), SessionState::LoggingOut);
        assert_eq!(engine.count("fetch_nodes"), 0);
        assert_eq!(engine.count("logout"), 1);
        assert!(d.ports_mut().preferences.session().is_none());
        assert_eq!(d.login_timer_remaining(now), None);

        d.handle(finished(FinishedRequest::Logout), now);
        assert_eq!(d.session(), SessionState::SetupRequired);
    }

    #[test]
    fn test_fetch_without_root_sets_crashed() {
        let (ports, engine, _, _) = TestHarness::with_preferences(logged_in_data()).split();
        let mut d = Dispatcher::new(&config(), ports);
        let now = Utc::now();
        d.start(now);
        d.handle(finished(FinishedRequest::Login), now);
        d.handle(finished(FinishedRequest::FetchNodes), now);

        assert!(d.ports_mut().preferences.crashed());
        assert_eq!(engine.count("logout"), 1);
    }

    #[test]
    fn test_login_timeout_produces_single_probe() {
        let (ports, _, _, notifier) = TestHarness::with_preferences(logged_in_data()).split();
        let mut d = Dispatcher::new(&config(), ports);
        let now = Utc::now();
        d.start(now);

        assert!(d.on_login_timeout(now + chrono::Duration::seconds(5)).is_none());
        let probe = d.on_login_timeout(now + chrono::Duration::seconds(31));
        assert!(probe.is_some());
        assert!(d.on_login_timeout(now + chrono::Duration::seconds(62)).is_none());

        d.handle(
            Message::ProbeFinished(Err(crate::probe::ProbeError::UnexpectedBody)),
            now,
        );
        assert_eq!(notifier.len(), 1);
        assert_eq!(notifier.sent()[0].title, "Connection problem");
    }

    #[test]
    fn test_upload_then_node_update_recovers_path() {
        let h = TestHarness::with_preferences(logged_in_data());
        h.engine.with_state(|s| s.has_root = true);
        let (ports, _, _, _) = h.split();
        let mut d = Dispatcher::new(&config(), ports);
        let now = Utc::now();
        d.start(now);
        d.handle(finished(FinishedRequest::Login), now);
        d.handle(finished(FinishedRequest::FetchNodes), now);

        let mut transfer = TransferInfo::new(TransferTag::new(7), TransferDirection::Upload);
        transfer.path = Some("/a/b.txt".into());
        transfer.total_bytes = 10;
        d.handle(
            Message::Engine(EngineEvent::TransferFinished {
                transfer,
                error: None,
            }),
            now,
        );
        assert_eq!(d.quota().storage_used, 10);

        let mut node = NodeInfo::new(NodeHandle::new(99), "b.txt", NodeKind::File);
        node.tag = Some(TransferTag::new(7));
        d.handle(
            Message::Engine(EngineEvent::NodesUpdated(Some(vec![node]))),
            now,
        );

        let recent = d.recent_files();
        assert_eq!(recent[0].local_path, Some(PathBuf::from("/a/b.txt")));
        assert!(d.pending_uploads().is_empty());
    }

    #[test]
    fn test_restart_deferred_until_idle() {
        let h = TestHarness::new();
        h.engine.with_state(|s| s.pending_downloads = 1);
        let (ports, engine, _, notifier) = h.split();
        let mut d = Dispatcher::new(&config(), ports);
        let now = Utc::now();

        assert_eq!(d.handle(Message::Ui(UiCommand::RestartForUpdate), now), Control::Continue);
        assert_eq!(d.handle(Message::Ui(UiCommand::RestartForUpdate), now), Control::Continue);
        assert_eq!(notifier.len(), 1);

        engine.with_state(|s| s.pending_downloads = 0);
        let transfer = TransferInfo::new(TransferTag::new(1), TransferDirection::Download);
        let control = d.handle(
            Message::Engine(EngineEvent::TransferFinished {
                transfer,
                error: None,
            }),
            now,
        );
        assert_eq!(control, Control::Restart);
        assert_eq!(d.ports_mut().preferences.last_exit(), Some(now));
    }

    #[test]
    fn test_exit_persists_last_exit() {
        let (ports, engine, _, _) = TestHarness::new().split();
        let mut d = Dispatcher::new(&config(), ports);
        let now = Utc::now();

        assert_eq!(d.handle(Message::Ui(UiCommand::Exit), now), Control::Exit);
        assert_eq!(engine.count("remove_all_syncs"), 1);
        assert_eq!(d.ports_mut().preferences.last_exit(), Some(now));
    }
}
