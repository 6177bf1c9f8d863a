//! Sync engine port (driven/secondary port)
//!
//! The engine is the external collaborator that performs login, remote-tree
//! reconciliation, encryption and byte transfer. This trait is the command
//! and query surface the orchestration layer uses.
//!
//! ## Design Notes
//!
//! - Commands are fire-and-forget. Their outcome arrives later as an engine
//!   event on the orchestration queue, which is why they return `()`.
//! - Queries are answered synchronously from the engine's local state and
//!   must not block on the network.
//! - The trait is synchronous: every call is made from the single
//!   orchestration thread.

use std::path::Path;

use crate::domain::{
    Credentials, LocalFingerprint, NodeHandle, NodeInfo, ProxyEndpoint, SessionToken,
    TransferDirection, DEFAULT_TRASH_ROOT,
};

/// Port trait for the sync/storage engine
pub trait IEngine: Send {
    // ========================================================================
    // Session
    // ========================================================================

    /// Resumes a previously dumped session
    fn login_with_session(&mut self, session: &SessionToken);

    /// Logs in with stored credentials
    fn login_with_credentials(&mut self, credentials: &Credentials);

    fn logout(&mut self);

    /// Downloads the remote node tree
    fn fetch_nodes(&mut self);

    /// Returns a resumable session for the current login
    fn dump_session(&self) -> Option<SessionToken>;

    // ========================================================================
    // Sync registrations
    // ========================================================================

    /// Registers a new sync pair
    fn sync_folder(&mut self, local: &Path, remote: NodeHandle);

    /// Re-registers a sync pair from its resume fingerprint
    fn resume_sync(&mut self, local: &Path, remote: NodeHandle, fingerprint: LocalFingerprint);

    /// Removes the registration for the given remote folder
    fn remove_sync(&mut self, remote: NodeHandle);

    fn remove_all_syncs(&mut self);

    fn active_sync_count(&self) -> usize;

    // ========================================================================
    // Transfers
    // ========================================================================

    fn start_upload(&mut self, local: &Path, parent: NodeHandle);

    fn start_download(&mut self, node: NodeHandle, destination: &Path);

    fn pause_transfers(&mut self, pause: bool);

    /// Cancels every queued and running transfer in one direction
    fn cancel_transfers(&mut self, direction: TransferDirection);

    /// Sets the upload cap in bytes per second, `None` for unlimited
    fn set_upload_limit(&mut self, bytes_per_second: Option<u64>);

    fn pending_transfers(&self, direction: TransferDirection) -> usize;

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Replaces the exclusion rules; a size bound of `0` disables it
    fn set_exclusion_rules(&mut self, names: &[String], lower_bytes: u64, upper_bytes: u64);

    fn set_proxy(&mut self, proxy: Option<&ProxyEndpoint>);

    /// Proxy detected from the system, as `scheme://host:port`
    fn auto_proxy(&self) -> Option<String>;

    // ========================================================================
    // Connectivity
    // ========================================================================

    /// Retries stalled requests, optionally dropping every open connection
    fn retry_pending_connections(&mut self, disconnect: bool);

    /// Recycles idle pooled connections
    fn refresh_connection_pool(&mut self);

    // ========================================================================
    // Account and nodes
    // ========================================================================

    fn request_account_details(&mut self);

    /// Creates a public link for a node
    fn export_node(&mut self, node: NodeHandle);

    fn node(&self, handle: NodeHandle) -> Option<NodeInfo>;

    /// Current remote path of a node
    fn node_path(&self, handle: NodeHandle) -> Option<String>;

    fn has_root_node(&self) -> bool;

    /// Path prefix of the trash root
    fn trash_root_path(&self) -> String {
        DEFAULT_TRASH_ROOT.to_string()
    }

    // ========================================================================
    // Global state
    // ========================================================================

    /// The engine is scanning local folders
    fn is_scanning(&self) -> bool;

    /// The engine is waiting on the network or a locked file
    fn is_waiting(&self) -> bool;
}
