//! Test doubles for the ports
//!
//! Recording implementations of [`IEngine`], [`IPlatformIntegration`] and
//! [`INotificationService`]. Each is a cheap handle over shared state, so a
//! test keeps one clone while the other is boxed into [`Ports`].
//! [`StaticInterfaces`] feeds the network watcher a fixed interface list.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use cloudmirror_core::domain::{
    Credentials, LocalFingerprint, NodeHandle, NodeInfo, ProxyEndpoint, SessionToken,
    TransferDirection,
};
use cloudmirror_core::ports::{
    IEngine, INotificationService, IPlatformIntegration, Notification, Ports,
};
use cloudmirror_core::store::{PreferencesData, YamlPreferences};

use crate::network::{InterfaceAddress, InterfaceSource};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// RecordingEngine
// ============================================================================

/// Engine state a test can script
#[derive(Debug, Default)]
pub struct EngineState {
    /// Every command issued, formatted as `name(args)`
    pub commands: Vec<String>,
    pub nodes: HashMap<NodeHandle, NodeInfo>,
    pub paths: HashMap<NodeHandle, String>,
    pub has_root: bool,
    /// Session handed out by `dump_session`; a login fills it when empty
    pub session: Option<SessionToken>,
    pub pending_uploads: usize,
    pub pending_downloads: usize,
    pub active_syncs: usize,
    pub scanning: bool,
    pub waiting: bool,
    pub auto_proxy: Option<String>,
}

/// Engine that records commands and answers queries from [`EngineState`]
#[derive(Debug, Clone, Default)]
pub struct RecordingEngine {
    state: Arc<Mutex<EngineState>>,
}

impl RecordingEngine {
    /// Runs `f` with mutable access to the scripted state
    pub fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        f(&mut lock(&self.state))
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    /// Number of commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.state)
            .commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Makes `node` resolvable at `path`
    pub fn add_node(&self, node: NodeInfo, path: &str) {
        let mut state = lock(&self.state);
        state.paths.insert(node.handle, path.to_string());
        state.nodes.insert(node.handle, node);
    }

    /// Changes the path a node resolves to; `None` removes the node
    pub fn move_node(&self, handle: NodeHandle, path: Option<&str>) {
        let mut state = lock(&self.state);
        match path {
            Some(p) => {
                state.paths.insert(handle, p.to_string());
            }
            None => {
                state.paths.remove(&handle);
                state.nodes.remove(&handle);
            }
        }
    }

    fn record(&self, command: String) {
        lock(&self.state).commands.push(command);
    }
}

impl IEngine for RecordingEngine {
    fn login_with_session(&mut self, session: &SessionToken) {
        self.record("login_with_session".into());
        lock(&self.state)
            .session
            .get_or_insert_with(|| session.clone());
    }

    fn login_with_credentials(&mut self, credentials: &Credentials) {
        self.record(format!("login_with_credentials({})", credentials.email));
        let mut state = lock(&self.state);
        if state.session.is_none() {
            state.session = SessionToken::new("recorded-session").ok();
        }
    }

    fn logout(&mut self) {
        self.record("logout".into());
        lock(&self.state).session = None;
    }

    fn fetch_nodes(&mut self) {
        self.record("fetch_nodes".into());
    }

    fn dump_session(&self) -> Option<SessionToken> {
        lock(&self.state).session.clone()
    }

    fn sync_folder(&mut self, local: &Path, remote: NodeHandle) {
        self.record(format!("sync_folder({}, {remote})", local.display()));
        lock(&self.state).active_syncs += 1;
    }

    fn resume_sync(&mut self, local: &Path, remote: NodeHandle, fingerprint: LocalFingerprint) {
        self.record(format!(
            "resume_sync({}, {remote}, {fingerprint})",
            local.display()
        ));
        lock(&self.state).active_syncs += 1;
    }

    fn remove_sync(&mut self, remote: NodeHandle) {
        self.record(format!("remove_sync({remote})"));
        let mut state = lock(&self.state);
        state.active_syncs = state.active_syncs.saturating_sub(1);
    }

    fn remove_all_syncs(&mut self) {
        self.record("remove_all_syncs".into());
        lock(&self.state).active_syncs = 0;
    }

    fn active_sync_count(&self) -> usize {
        lock(&self.state).active_syncs
    }

    fn start_upload(&mut self, local: &Path, parent: NodeHandle) {
        self.record(format!("start_upload({}, {parent})", local.display()));
    }

    fn start_download(&mut self, node: NodeHandle, destination: &Path) {
        self.record(format!("start_download({node}, {})", destination.display()));
    }

    fn pause_transfers(&mut self, pause: bool) {
        self.record(format!("pause_transfers({pause})"));
    }

    fn cancel_transfers(&mut self, direction: TransferDirection) {
        self.record(format!("cancel_transfers({direction})"));
    }

    fn set_upload_limit(&mut self, bytes_per_second: Option<u64>) {
        match bytes_per_second {
            Some(limit) => self.record(format!("set_upload_limit({limit})")),
            None => self.record("set_upload_limit(unlimited)".into()),
        }
    }

    fn pending_transfers(&self, direction: TransferDirection) -> usize {
        let state = lock(&self.state);
        match direction {
            TransferDirection::Upload => state.pending_uploads,
            TransferDirection::Download => state.pending_downloads,
        }
    }

    fn set_exclusion_rules(&mut self, names: &[String], lower_bytes: u64, upper_bytes: u64) {
        self.record(format!(
            "set_exclusion_rules({}, {lower_bytes}, {upper_bytes})",
            names.len()
        ));
    }

    fn set_proxy(&mut self, proxy: Option<&ProxyEndpoint>) {
        match proxy {
            Some(p) => self.record(format!("set_proxy({})", p.url())),
            None => self.record("set_proxy(none)".into()),
        }
    }

    fn auto_proxy(&self) -> Option<String> {
        lock(&self.state).auto_proxy.clone()
    }

    fn retry_pending_connections(&mut self, disconnect: bool) {
        self.record(format!("retry_pending_connections({disconnect})"));
    }

    fn refresh_connection_pool(&mut self) {
        self.record("refresh_connection_pool".into());
    }

    fn request_account_details(&mut self) {
        self.record("request_account_details".into());
    }

    fn export_node(&mut self, node: NodeHandle) {
        self.record(format!("export_node({node})"));
    }

    fn node(&self, handle: NodeHandle) -> Option<NodeInfo> {
        lock(&self.state).nodes.get(&handle).cloned()
    }

    fn node_path(&self, handle: NodeHandle) -> Option<String> {
        lock(&self.state).paths.get(&handle).cloned()
    }

    fn has_root_node(&self) -> bool {
        lock(&self.state).has_root
    }

    fn is_scanning(&self) -> bool {
        lock(&self.state).scanning
    }

    fn is_waiting(&self) -> bool {
        lock(&self.state).waiting
    }
}

// ============================================================================
// RecordingPlatform / RecordingNotifier
// ============================================================================

/// Platform integration that records every call
#[derive(Debug, Clone, Default)]
pub struct RecordingPlatform {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingPlatform {
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

impl IPlatformIntegration for RecordingPlatform {
    fn sync_folder_removed(&mut self, local: &Path, name: &str) {
        lock(&self.calls).push(format!("sync_folder_removed({}, {name})", local.display()));
    }

    fn notify_item_change(&mut self, path: &Path) {
        lock(&self.calls).push(format!("notify_item_change({})", path.display()));
    }
}

/// Notification service that keeps every notification
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        lock(&self.sent).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl INotificationService for RecordingNotifier {
    fn notify(&mut self, notification: &Notification) -> anyhow::Result<()> {
        lock(&self.sent).push(notification.clone());
        Ok(())
    }
}

/// Interface source that always reports the same addresses
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<InterfaceAddress>);

impl InterfaceSource for StaticInterfaces {
    fn interfaces(&mut self) -> std::io::Result<Vec<InterfaceAddress>> {
        Ok(self.0.clone())
    }
}

// ============================================================================
// TestHarness
// ============================================================================

/// [`Ports`] wired to recording doubles, with handles to inspect them
pub struct TestHarness {
    pub ports: Ports,
    pub engine: RecordingEngine,
    pub platform: RecordingPlatform,
    pub notifier: RecordingNotifier,
}

impl TestHarness {
    /// Harness with empty in-memory preferences
    pub fn new() -> Self {
        Self::with_preferences(PreferencesData::default())
    }

    pub fn with_preferences(data: PreferencesData) -> Self {
        let engine = RecordingEngine::default();
        let platform = RecordingPlatform::default();
        let notifier = RecordingNotifier::default();
        let ports = Ports::new(
            Box::new(engine.clone()),
            Box::new(YamlPreferences::in_memory(data)),
            Box::new(platform.clone()),
            Box::new(notifier.clone()),
        );
        Self {
            ports,
            engine,
            platform,
            notifier,
        }
    }

    /// Splits the harness into the boxed ports and the inspection handles
    pub fn split(self) -> (Ports, RecordingEngine, RecordingPlatform, RecordingNotifier) {
        (self.ports, self.engine, self.platform, self.notifier)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a directory under `root` and returns its path
pub fn local_folder(root: &Path, name: &str) -> std::io::Result<PathBuf> {
    let path = root.join(name);
    std::fs::create_dir_all(&path)?;
    Ok(path)
}
