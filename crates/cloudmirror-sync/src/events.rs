//! Messages consumed by the orchestration loop
//!
//! Every engine callback and every presentation-layer command becomes one
//! [`Message`] on a single-consumer queue. Request and transfer kinds are sum
//! types, so each handler is checked for exhaustiveness.

use std::fmt;
use std::path::PathBuf;

use cloudmirror_core::domain::{
    AccountDetails, EngineError, LocalFingerprint, NodeHandle, NodeInfo, ProxySettings,
    TransferDirection, TransferInfo,
};

use crate::probe::ProbeOutcome;

/// Kind of an engine request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Login,
    Logout,
    FetchNodes,
    Export,
    AccountDetails,
    PauseTransfers,
    AddSync,
    RemoveSync,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestKind::Login => "login",
            RequestKind::Logout => "logout",
            RequestKind::FetchNodes => "fetch_nodes",
            RequestKind::Export => "export",
            RequestKind::AccountDetails => "account_details",
            RequestKind::PauseTransfers => "pause_transfers",
            RequestKind::AddSync => "add_sync",
            RequestKind::RemoveSync => "remove_sync",
        };
        write!(f, "{s}")
    }
}

/// A finished request and its kind-specific payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishedRequest {
    Login,
    Logout,
    FetchNodes,
    Export {
        node: NodeHandle,
        /// Public link, present on success
        link: Option<String>,
    },
    AccountDetails(Option<AccountDetails>),
    PauseTransfers {
        paused: bool,
    },
    AddSync {
        local: PathBuf,
        remote: NodeHandle,
        /// Resume token returned on success
        fingerprint: Option<LocalFingerprint>,
    },
    RemoveSync {
        remote: NodeHandle,
        local: Option<PathBuf>,
    },
}

impl FinishedRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            FinishedRequest::Login => RequestKind::Login,
            FinishedRequest::Logout => RequestKind::Logout,
            FinishedRequest::FetchNodes => RequestKind::FetchNodes,
            FinishedRequest::Export { .. } => RequestKind::Export,
            FinishedRequest::AccountDetails(_) => RequestKind::AccountDetails,
            FinishedRequest::PauseTransfers { .. } => RequestKind::PauseTransfers,
            FinishedRequest::AddSync { .. } => RequestKind::AddSync,
            FinishedRequest::RemoveSync { .. } => RequestKind::RemoveSync,
        }
    }
}

/// Callback delivered by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    RequestStarted(RequestKind),
    RequestFinished {
        request: FinishedRequest,
        error: Option<EngineError>,
    },
    /// A request failed temporarily and will be retried by the engine
    RequestTemporaryError {
        kind: RequestKind,
        error: EngineError,
    },
    TransferStarted(TransferInfo),
    TransferUpdated(TransferInfo),
    TransferFinished {
        transfer: TransferInfo,
        error: Option<EngineError>,
    },
    TransferTemporaryError {
        transfer: TransferInfo,
        error: EngineError,
    },
    GlobalStateChanged,
    /// Changed nodes; `None` means the whole tree was reloaded
    NodesUpdated(Option<Vec<NodeInfo>>),
    UsersUpdated,
    ReloadNeeded,
}

/// Command from the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    EnqueueUpload(Vec<PathBuf>),
    EnqueueDownload(Vec<NodeHandle>),
    UploadDestinationResolved(NodeHandle),
    DownloadDestinationResolved(PathBuf),
    DestinationCancelled(TransferDirection),
    PauseTransfers(bool),
    /// Upload limit in KiB/s; negative means unlimited
    SetUploadLimit(i64),
    ApplyProxy(ProxySettings),
    /// First-run setup stored an account
    SetupFinished,
    DisableSync(usize),
    EnableSync(usize),
    ExportNode(NodeHandle),
    OverQuotaNoticeDismissed,
    RestartForUpdate,
    Exit,
}

/// Single item type of the orchestration queue
#[derive(Debug)]
pub enum Message {
    Engine(EngineEvent),
    Ui(UiCommand),
    /// Outcome of a connectivity diagnostic started by the loop
    ProbeFinished(ProbeOutcome),
}

impl From<EngineEvent> for Message {
    fn from(event: EngineEvent) -> Self {
        Message::Engine(event)
    }
}

impl From<UiCommand> for Message {
    fn from(command: UiCommand) -> Self {
        Message::Ui(command)
    }
}
