//! Loopback engine adapter (secondary/driven adapter)
//!
//! Implements [`IEngine`] over a local directory that stands in for the
//! remote account, so the daemon runs end to end without the real engine.
//!
//! ## Design Decisions
//!
//! - **Worker thread**: commands are queued to a dedicated thread which
//!   performs them on the filesystem and posts callbacks on the
//!   orchestration queue from that thread, like a real engine does.
//! - **Shared tree**: queries read the node tree under a mutex and never
//!   touch the filesystem.
//! - **Registrations only**: sync pairs are validated and recorded, their
//!   content is not mirrored.
//! - **Trash**: the `.trash` folder at the root is reported under the
//!   engine's trash path, so remote folders moved there read as trashed.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cloudmirror_core::{
    config::LoopbackConfig,
    domain::{
        AccountDetails, Credentials, EngineError, EngineErrorCode, LocalFingerprint, NodeHandle,
        NodeInfo, NodeKind, ProxyEndpoint, SessionToken, TransferDirection, TransferInfo,
        TransferTag, DEFAULT_TRASH_ROOT,
    },
    ports::IEngine,
};
use cloudmirror_sync::events::{EngineEvent, FinishedRequest, Message, RequestKind};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

const TRASH_DIR: &str = ".trash";
const ROOT_HANDLE: NodeHandle = NodeHandle::new(1);
const SESSION_PREFIX: &str = "loopback:";

// ============================================================================
// Node tree
// ============================================================================

#[derive(Debug, Clone)]
struct TreeEntry {
    info: NodeInfo,
    /// Path below the remote root, empty for the root itself
    relative: PathBuf,
}

/// Snapshot of the remote root, rebuilt on every tree fetch
///
/// Handles are keyed by relative path and survive rescans.
#[derive(Debug, Default)]
struct NodeTree {
    nodes: HashMap<NodeHandle, TreeEntry>,
    handles: HashMap<PathBuf, NodeHandle>,
    last_handle: u64,
}

impl NodeTree {
    fn handle_for(&mut self, relative: &Path) -> NodeHandle {
        if relative.as_os_str().is_empty() {
            return ROOT_HANDLE;
        }
        if let Some(handle) = self.handles.get(relative) {
            return *handle;
        }
        self.last_handle = self.last_handle.max(ROOT_HANDLE.as_u64()) + 1;
        let handle = NodeHandle::new(self.last_handle);
        self.handles.insert(relative.to_path_buf(), handle);
        handle
    }

    fn insert(&mut self, relative: &Path, metadata: &fs::Metadata) -> NodeInfo {
        let handle = self.handle_for(relative);
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = if metadata.is_dir() {
            NodeKind::Folder
        } else {
            NodeKind::File
        };

        let mut info = NodeInfo::new(handle, name, kind);
        if metadata.is_file() {
            info.size = metadata.len();
        }
        if let Ok(created) = metadata.created().or_else(|_| metadata.modified()) {
            info.created_at = DateTime::<Utc>::from(created);
        }

        self.nodes.insert(
            handle,
            TreeEntry {
                info: info.clone(),
                relative: relative.to_path_buf(),
            },
        );
        info
    }

    /// Walks the root directory and replaces the node set
    fn rescan(&mut self, root: &Path) -> io::Result<()> {
        self.nodes.clear();
        let metadata = fs::metadata(root)?;
        self.insert(Path::new(""), &metadata);

        let mut pending = vec![PathBuf::new()];
        while let Some(relative) = pending.pop() {
            for entry in fs::read_dir(root.join(&relative))? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                let child = relative.join(entry.file_name());
                if !(metadata.is_dir() || metadata.is_file()) {
                    continue;
                }
                self.insert(&child, &metadata);
                if metadata.is_dir() {
                    pending.push(child);
                }
            }
        }
        Ok(())
    }

    fn entry(&self, handle: NodeHandle) -> Option<&TreeEntry> {
        self.nodes.get(&handle)
    }

    fn storage_used(&self) -> u64 {
        self.nodes
            .values()
            .filter(|e| e.info.is_file())
            .map(|e| e.info.size)
            .sum()
    }

    /// Remote path of a node; entries under `.trash` map to the trash root
    fn remote_path(&self, handle: NodeHandle) -> Option<String> {
        let entry = self.entry(handle)?;
        let parts: Vec<String> = entry
            .relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        let path = match parts.split_first() {
            None => "/".to_string(),
            Some((first, rest)) if first == TRASH_DIR => {
                let mut path = DEFAULT_TRASH_ROOT.to_string();
                for part in rest {
                    path.push('/');
                    path.push_str(part);
                }
                path
            }
            Some(_) => format!("/{}", parts.join("/")),
        };
        Some(path)
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// State read by queries and written by the worker
#[derive(Debug, Default)]
struct LoopbackState {
    tree: NodeTree,
    logged_in: bool,
    session: Option<SessionToken>,
    syncs: HashMap<NodeHandle, PathBuf>,
    paused: bool,
    pending: HashMap<TransferDirection, usize>,
    /// Bumped on cancel; queued transfers from an older generation are dropped
    generation: HashMap<TransferDirection, u64>,
}

impl LoopbackState {
    fn generation(&self, direction: TransferDirection) -> u64 {
        self.generation.get(&direction).copied().unwrap_or(0)
    }

    fn transfer_done(&mut self, direction: TransferDirection) {
        let pending = self.pending.entry(direction).or_default();
        *pending = pending.saturating_sub(1);
    }
}

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug)]
enum LoginMode {
    Session(SessionToken),
    Credentials(String),
}

#[derive(Debug)]
enum TransferKind {
    Upload { local: PathBuf, parent: NodeHandle },
    Download { node: NodeHandle, destination: PathBuf },
}

impl TransferKind {
    fn direction(&self) -> TransferDirection {
        match self {
            TransferKind::Upload { .. } => TransferDirection::Upload,
            TransferKind::Download { .. } => TransferDirection::Download,
        }
    }
}

#[derive(Debug)]
struct TransferJob {
    tag: TransferTag,
    generation: u64,
    kind: TransferKind,
}

impl TransferJob {
    fn info(&self) -> TransferInfo {
        let mut info = TransferInfo::new(self.tag, self.kind.direction());
        match &self.kind {
            TransferKind::Upload { local, .. } => {
                info.path = Some(local.clone());
                info.file_name = file_name(local);
            }
            TransferKind::Download { destination, .. } => {
                info.path = Some(destination.clone());
            }
        }
        info
    }
}

#[derive(Debug)]
enum Job {
    Login(LoginMode),
    Logout,
    FetchNodes,
    AddSync {
        local: PathBuf,
        remote: NodeHandle,
        fingerprint: Option<LocalFingerprint>,
    },
    RemoveSync(NodeHandle),
    Transfer(TransferJob),
    Cancel(TransferDirection),
    Pause(bool),
    AccountDetails,
    Export(NodeHandle),
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn failed(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorCode::Failed, message)
}

/// Resume token of a local folder, derived from its inode
fn fingerprint_of(local: &Path) -> io::Result<LocalFingerprint> {
    let metadata = fs::metadata(local)?;
    #[cfg(unix)]
    let raw = {
        use std::os::unix::fs::MetadataExt;
        metadata.ino() as i64
    };
    #[cfg(not(unix))]
    let raw = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(LocalFingerprint::new(raw))
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    root: PathBuf,
    quota: u64,
    state: Arc<Mutex<LoopbackState>>,
    events: UnboundedSender<Message>,
    /// Transfers received while paused
    held: VecDeque<TransferJob>,
}

impl Worker {
    fn run(mut self, jobs: std_mpsc::Receiver<Job>) {
        debug!("Loopback worker started");
        while let Ok(job) = jobs.recv() {
            if !self.execute(job) {
                break;
            }
        }
        debug!("Loopback worker stopped");
    }

    /// Returns `false` once the orchestration queue is gone
    fn execute(&mut self, job: Job) -> bool {
        match job {
            Job::Login(mode) => self.login(mode),
            Job::Logout => {
                {
                    let mut state = lock(&self.state);
                    state.logged_in = false;
                    state.session = None;
                    state.syncs.clear();
                    state.tree = NodeTree::default();
                }
                self.finish(FinishedRequest::Logout, None)
            }
            Job::FetchNodes => self.fetch_nodes(),
            Job::AddSync {
                local,
                remote,
                fingerprint,
            } => self.add_sync(local, remote, fingerprint),
            Job::RemoveSync(remote) => {
                let local = lock(&self.state).syncs.remove(&remote);
                self.finish(FinishedRequest::RemoveSync { remote, local }, None)
            }
            Job::Transfer(job) => {
                if lock(&self.state).paused {
                    self.held.push_back(job);
                    true
                } else {
                    self.transfer(job)
                }
            }
            Job::Cancel(direction) => {
                let (cancelled, kept): (Vec<_>, Vec<_>) = self
                    .held
                    .drain(..)
                    .partition(|job| job.kind.direction() == direction);
                self.held = kept.into();
                cancelled.into_iter().all(|job| self.cancelled(job))
            }
            Job::Pause(paused) => {
                lock(&self.state).paused = paused;
                if !self.finish(FinishedRequest::PauseTransfers { paused }, None) {
                    return false;
                }
                if paused {
                    return true;
                }
                let held: Vec<_> = self.held.drain(..).collect();
                held.into_iter().all(|job| self.transfer(job))
            }
            Job::AccountDetails => {
                let used = lock(&self.state).tree.storage_used();
                let details = AccountDetails {
                    storage_max: self.quota,
                    storage_used: used,
                    transfer_max: 0,
                    transfer_used: 0,
                };
                self.finish(FinishedRequest::AccountDetails(Some(details)), None)
            }
            Job::Export(node) => {
                let target = lock(&self.state)
                    .tree
                    .entry(node)
                    .map(|e| self.root.join(&e.relative));
                match target {
                    Some(path) => self.finish(
                        FinishedRequest::Export {
                            node,
                            link: Some(format!("file://{}", path.display())),
                        },
                        None,
                    ),
                    None => self.finish(
                        FinishedRequest::Export { node, link: None },
                        Some(failed("node not found")),
                    ),
                }
            }
        }
    }

    fn post(&self, event: EngineEvent) -> bool {
        self.events.send(Message::Engine(event)).is_ok()
    }

    fn finish(&self, request: FinishedRequest, error: Option<EngineError>) -> bool {
        let kind = request.kind();
        self.post(EngineEvent::RequestStarted(kind))
            && self.post(EngineEvent::RequestFinished { request, error })
    }

    fn login(&self, mode: LoginMode) -> bool {
        if !self.post(EngineEvent::RequestStarted(RequestKind::Login)) {
            return false;
        }
        let result = match mode {
            LoginMode::Session(token) if token.as_str().starts_with(SESSION_PREFIX) => Ok(token),
            LoginMode::Session(_) => Err(EngineError::new(
                EngineErrorCode::InvalidSession,
                "session was not issued by this engine",
            )),
            LoginMode::Credentials(email) => SessionToken::new(format!("{SESSION_PREFIX}{email}"))
                .map_err(|e| failed(e.to_string())),
        };
        let result = result.and_then(|token| {
            if self.root.is_dir() {
                Ok(token)
            } else {
                Err(failed(format!("{} is not a directory", self.root.display())))
            }
        });

        let error = match result {
            Ok(token) => {
                let mut state = lock(&self.state);
                state.logged_in = true;
                state.session = Some(token);
                None
            }
            Err(e) => Some(e),
        };
        info!(ok = error.is_none(), "Loopback login finished");
        self.post(EngineEvent::RequestFinished {
            request: FinishedRequest::Login,
            error,
        })
    }

    fn fetch_nodes(&self) -> bool {
        if !self.post(EngineEvent::RequestStarted(RequestKind::FetchNodes)) {
            return false;
        }
        let error = {
            let mut state = lock(&self.state);
            if !state.logged_in {
                Some(EngineError::new(EngineErrorCode::InvalidSession, "not logged in"))
            } else {
                match state.tree.rescan(&self.root) {
                    Ok(()) => {
                        debug!(nodes = state.tree.nodes.len(), "Loopback tree scanned");
                        None
                    }
                    Err(e) => {
                        state.tree.nodes.clear();
                        Some(failed(format!("scan of {} failed: {e}", self.root.display())))
                    }
                }
            }
        };
        self.post(EngineEvent::RequestFinished {
            request: FinishedRequest::FetchNodes,
            error,
        })
    }

    fn add_sync(
        &self,
        local: PathBuf,
        remote: NodeHandle,
        resume: Option<LocalFingerprint>,
    ) -> bool {
        let result = self.check_sync(&local, remote, resume);
        let (fingerprint, error) = match result {
            Ok(fingerprint) => {
                lock(&self.state).syncs.insert(remote, local.clone());
                info!(local = %local.display(), %remote, "Loopback sync registered");
                (Some(fingerprint), None)
            }
            Err(e) => (None, Some(e)),
        };
        self.finish(
            FinishedRequest::AddSync {
                local,
                remote,
                fingerprint,
            },
            error,
        )
    }

    fn check_sync(
        &self,
        local: &Path,
        remote: NodeHandle,
        resume: Option<LocalFingerprint>,
    ) -> Result<LocalFingerprint, EngineError> {
        {
            let state = lock(&self.state);
            match state.tree.entry(remote) {
                Some(entry) if entry.info.kind == NodeKind::Folder => {}
                Some(_) => return Err(failed("remote node is not a folder")),
                None => return Err(failed("remote folder not found")),
            }
        }
        if !local.is_dir() {
            return Err(failed(format!("{} is not a directory", local.display())));
        }
        let fingerprint = fingerprint_of(local).map_err(|e| failed(e.to_string()))?;
        match resume {
            Some(expected) if expected != fingerprint => {
                Err(failed("local folder fingerprint changed"))
            }
            _ => Ok(fingerprint),
        }
    }

    fn cancelled(&self, job: TransferJob) -> bool {
        let info = job.info();
        lock(&self.state).transfer_done(info.direction);
        self.post(EngineEvent::TransferFinished {
            transfer: info,
            error: Some(EngineError::new(EngineErrorCode::Cancelled, "cancelled")),
        })
    }

    fn transfer(&self, job: TransferJob) -> bool {
        let direction = job.kind.direction();
        if lock(&self.state).generation(direction) != job.generation {
            return self.cancelled(job);
        }

        let mut info = job.info();
        let result = match &job.kind {
            TransferKind::Upload { local, parent } => self.upload(&mut info, local, *parent),
            TransferKind::Download { node, destination } => {
                self.download(&mut info, *node, destination)
            }
        };
        lock(&self.state).transfer_done(direction);

        let created = match result {
            Ok(created) => created,
            Err(error) => {
                return self.post(EngineEvent::TransferFinished {
                    transfer: info,
                    error: Some(error),
                })
            }
        };

        info.transferred_bytes = info.total_bytes;
        info.delta_bytes = info.total_bytes;
        if !self.post(EngineEvent::TransferStarted(info.clone()))
            || !self.post(EngineEvent::TransferFinished {
                transfer: info,
                error: None,
            })
        {
            return false;
        }
        match created {
            Some(node) => self.post(EngineEvent::NodesUpdated(Some(vec![node]))),
            None => true,
        }
    }

    /// Copies a local file into a remote folder and returns the new node
    fn upload(
        &self,
        info: &mut TransferInfo,
        local: &Path,
        parent: NodeHandle,
    ) -> Result<Option<NodeInfo>, EngineError> {
        let metadata = fs::metadata(local).map_err(|e| failed(e.to_string()))?;
        if !metadata.is_file() {
            return Err(failed("only files can be uploaded"));
        }
        info.total_bytes = metadata.len();

        let relative = {
            let state = lock(&self.state);
            let parent = state
                .tree
                .entry(parent)
                .filter(|e| e.info.kind == NodeKind::Folder)
                .ok_or_else(|| failed("destination folder not found"))?;
            if state.tree.storage_used().saturating_add(info.total_bytes) > self.quota {
                return Err(EngineError::new(
                    EngineErrorCode::OverQuota,
                    "storage quota exceeded",
                ));
            }
            parent.relative.join(&info.file_name)
        };

        fs::copy(local, self.root.join(&relative)).map_err(|e| failed(e.to_string()))?;
        let metadata = fs::metadata(self.root.join(&relative)).map_err(|e| failed(e.to_string()))?;

        let mut state = lock(&self.state);
        let mut node = state.tree.insert(&relative, &metadata);
        node.tag = Some(info.tag);
        info.node_handle = Some(node.handle);
        Ok(Some(node))
    }

    fn download(
        &self,
        info: &mut TransferInfo,
        node: NodeHandle,
        destination: &Path,
    ) -> Result<Option<NodeInfo>, EngineError> {
        let entry = lock(&self.state)
            .tree
            .entry(node)
            .cloned()
            .ok_or_else(|| failed("node not found"))?;
        if !entry.info.is_file() {
            return Err(failed("only files can be downloaded"));
        }
        info.file_name = entry.info.name.clone();
        info.total_bytes = entry.info.size;
        info.node_handle = Some(node);

        let target = destination.join(&entry.info.name);
        fs::copy(self.root.join(&entry.relative), &target).map_err(|e| failed(e.to_string()))?;
        info.path = Some(target);
        Ok(None)
    }
}

// ============================================================================
// LoopbackEngine
// ============================================================================

/// [`IEngine`] over a local directory
pub struct LoopbackEngine {
    state: Arc<Mutex<LoopbackState>>,
    jobs: std_mpsc::Sender<Job>,
    last_tag: i64,
}

impl LoopbackEngine {
    /// Creates the root directory if needed and starts the worker thread
    ///
    /// Callbacks are posted on `events` from the worker.
    pub fn spawn(config: &LoopbackConfig, events: UnboundedSender<Message>) -> Result<Self> {
        fs::create_dir_all(&config.remote_root).with_context(|| {
            format!(
                "Failed to create loopback root {}",
                config.remote_root.display()
            )
        })?;

        let state = Arc::new(Mutex::new(LoopbackState::default()));
        let (jobs, receiver) = std_mpsc::channel();
        let worker = Worker {
            root: config.remote_root.clone(),
            quota: config.storage_quota_bytes,
            state: Arc::clone(&state),
            events,
            held: VecDeque::new(),
        };
        thread::Builder::new()
            .name("loopback-engine".into())
            .spawn(move || worker.run(receiver))
            .context("Failed to start the loopback engine thread")?;

        info!(
            root = %config.remote_root.display(),
            quota = config.storage_quota_bytes,
            "Loopback engine started"
        );
        Ok(Self {
            state,
            jobs,
            last_tag: 0,
        })
    }

    fn submit(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!("Loopback worker is gone, dropping command");
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        lock(&self.state)
    }

    fn queue_transfer(&mut self, kind: TransferKind) {
        self.last_tag += 1;
        let tag = TransferTag::new(self.last_tag);
        let direction = kind.direction();
        let generation = {
            let mut state = self.state();
            *state.pending.entry(direction).or_default() += 1;
            state.generation(direction)
        };
        self.submit(Job::Transfer(TransferJob {
            tag,
            generation,
            kind,
        }));
    }
}

impl IEngine for LoopbackEngine {
    fn login_with_session(&mut self, session: &SessionToken) {
        self.submit(Job::Login(LoginMode::Session(session.clone())));
    }

    fn login_with_credentials(&mut self, credentials: &Credentials) {
        self.submit(Job::Login(LoginMode::Credentials(credentials.email.clone())));
    }

    fn logout(&mut self) {
        self.submit(Job::Logout);
    }

    fn fetch_nodes(&mut self) {
        self.submit(Job::FetchNodes);
    }

    fn dump_session(&self) -> Option<SessionToken> {
        self.state().session.clone()
    }

    fn sync_folder(&mut self, local: &Path, remote: NodeHandle) {
        self.submit(Job::AddSync {
            local: local.to_path_buf(),
            remote,
            fingerprint: None,
        });
    }

    fn resume_sync(&mut self, local: &Path, remote: NodeHandle, fingerprint: LocalFingerprint) {
        self.submit(Job::AddSync {
            local: local.to_path_buf(),
            remote,
            fingerprint: Some(fingerprint),
        });
    }

    fn remove_sync(&mut self, remote: NodeHandle) {
        self.submit(Job::RemoveSync(remote));
    }

    fn remove_all_syncs(&mut self) {
        let removed = std::mem::take(&mut self.state().syncs);
        debug!(count = removed.len(), "Loopback syncs removed");
    }

    fn active_sync_count(&self) -> usize {
        self.state().syncs.len()
    }

    fn start_upload(&mut self, local: &Path, parent: NodeHandle) {
        self.queue_transfer(TransferKind::Upload {
            local: local.to_path_buf(),
            parent,
        });
    }

    fn start_download(&mut self, node: NodeHandle, destination: &Path) {
        self.queue_transfer(TransferKind::Download {
            node,
            destination: destination.to_path_buf(),
        });
    }

    fn pause_transfers(&mut self, pause: bool) {
        self.submit(Job::Pause(pause));
    }

    fn cancel_transfers(&mut self, direction: TransferDirection) {
        *self.state().generation.entry(direction).or_default() += 1;
        self.submit(Job::Cancel(direction));
    }

    fn set_upload_limit(&mut self, bytes_per_second: Option<u64>) {
        debug!(?bytes_per_second, "Loopback upload limit ignored");
    }

    fn pending_transfers(&self, direction: TransferDirection) -> usize {
        self.state().pending.get(&direction).copied().unwrap_or(0)
    }

    fn set_exclusion_rules(&mut self, names: &[String], lower_bytes: u64, upper_bytes: u64) {
        debug!(
            names = names.len(),
            lower_bytes, upper_bytes, "Loopback exclusion rules ignored"
        );
    }

    fn set_proxy(&mut self, proxy: Option<&ProxyEndpoint>) {
        debug!(proxy = ?proxy.map(ProxyEndpoint::url), "Loopback proxy ignored");
    }

    fn auto_proxy(&self) -> Option<String> {
        None
    }

    fn retry_pending_connections(&mut self, disconnect: bool) {
        debug!(disconnect, "Loopback reconnect requested");
    }

    fn refresh_connection_pool(&mut self) {}

    fn request_account_details(&mut self) {
        self.submit(Job::AccountDetails);
    }

    fn export_node(&mut self, node: NodeHandle) {
        self.submit(Job::Export(node));
    }

    fn node(&self, handle: NodeHandle) -> Option<NodeInfo> {
        self.state().tree.entry(handle).map(|e| e.info.clone())
    }

    fn node_path(&self, handle: NodeHandle) -> Option<String> {
        self.state().tree.remote_path(handle)
    }

    fn has_root_node(&self) -> bool {
        self.state().tree.entry(ROOT_HANDLE).is_some()
    }

    fn is_scanning(&self) -> bool {
        false
    }

    fn is_waiting(&self) -> bool {
        false
    }
}

// ============================================================================
// Tests
// ============================================================================
