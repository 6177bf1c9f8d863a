//! Sync pair lifecycle
//!
//! The [`SyncLifecycleManager`] owns the runtime state of every configured
//! sync pair. It starts and stops registrations with the engine, classifies
//! failed registrations into a [`DisableReason`], and is the only writer of a
//! pair's `active` flag and resume fingerprint.
//!
//! ## State machine
//!
//! ```text
//!            start_all / enable_pair
//! Inactive ─────────────────────────→ Starting ──(add-sync ok)──→ Active
//!    ↑                                   │                          │
//!    │                          (add-sync failed)             disable_pair
//!    │                                   ↓                          ↓
//!    │                           Disabled(reason) ←──(moved)── Disabling
//!    └──────────────────(remove-sync finished)──────────────────────┘
//! ```
//!
//! Every disable path flips `active=false` in the preferences and tells the
//! platform integration the folder is no longer synced. A pair in
//! `Disabled(_)` is skipped by [`SyncLifecycleManager::start_all`] until the
//! user re-enables it.

use std::path::Path;

use tracing::{debug, info, warn};

use cloudmirror_core::domain::{
    DisableReason, EngineError, LocalFingerprint, NodeHandle, NodeInfo, SyncFailureContext,
    SyncPairConfig, SyncPairState,
};
use cloudmirror_core::ports::{Notification, Ports};

/// Runtime state of every configured sync pair, indexed like the preferences
#[derive(Debug, Default)]
pub struct SyncLifecycleManager {
    states: Vec<SyncPairState>,
}

impl SyncLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> &[SyncPairState] {
        &self.states
    }

    pub fn state(&self, index: usize) -> Option<&SyncPairState> {
        self.states.get(index)
    }

    /// Number of pairs registered with the engine or being registered
    pub fn registered_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_registered()).count()
    }

    fn set_state(&mut self, index: usize, state: SyncPairState) {
        if index >= self.states.len() {
            self.states.resize(index + 1, SyncPairState::Inactive);
        }
        debug!(index, from = %self.states[index], to = %state, "Sync pair state change");
        self.states[index] = state;
    }

    /// Matches the pair count to the preferences, keeping known states
    fn sync_with(&mut self, pairs: &[SyncPairConfig]) {
        self.states.resize(pairs.len(), SyncPairState::Inactive);
    }

    // ========================================================================
    // Start / stop
    // ========================================================================

    /// Registers every active pair with the engine
    ///
    /// Existing registrations are dropped first. Pairs whose remote folder
    /// does not resolve (or resolves into the trash or elsewhere) and pairs
    /// whose local folder is not a directory are disabled without contacting
    /// the engine.
    pub fn start_all(&mut self, ports: &mut Ports) {
        if ports.engine.active_sync_count() != 0 {
            info!("Engine still holds registrations, stopping them first");
            self.stop_all(ports);
        }

        let pairs = ports.preferences.sync_pairs();
        self.sync_with(&pairs);
        info!(count = pairs.len(), "Starting sync pairs");

        for (index, pair) in pairs.iter().enumerate() {
            if !pair.active {
                if !matches!(self.states[index], SyncPairState::Disabled(_)) {
                    self.states[index] = SyncPairState::Inactive;
                }
                debug!(index, name = %pair.name, "Sync pair not active, skipping");
                continue;
            }
            self.start_pair(index, pair, ports);
        }
    }

    fn start_pair(&mut self, index: usize, pair: &SyncPairConfig, ports: &mut Ports) {
        let resolvable = ports
            .engine
            .node(pair.remote_handle)
            .is_some_and(|node| !node.removed);
        if !resolvable {
            self.disable(index, DisableReason::RemoteFolderMissing, ports);
            return;
        }

        if !pair.local_folder.is_dir() {
            self.disable(index, DisableReason::LocalFolderMissing, ports);
            return;
        }

        let resolved = ports.engine.node_path(pair.remote_handle);
        let trash_root = ports.engine.trash_root_path();
        if let Some(reason) =
            DisableReason::classify_remote(resolved.as_deref(), &pair.remote_path, &trash_root)
        {
            self.disable(index, reason, ports);
            return;
        }

        self.set_state(index, SyncPairState::Starting);
        match pair.fingerprint {
            Some(fingerprint) => {
                info!(index, name = %pair.name, %fingerprint, "Resuming sync");
                ports
                    .engine
                    .resume_sync(&pair.local_folder, pair.remote_handle, fingerprint);
            }
            None => {
                info!(index, name = %pair.name, "Starting sync");
                ports.engine.sync_folder(&pair.local_folder, pair.remote_handle);
            }
        }
    }

    /// Drops every registration; disabled pairs keep their reason
    pub fn stop_all(&mut self, ports: &mut Ports) {
        ports.engine.remove_all_syncs();
        for state in &mut self.states {
            if !matches!(state, SyncPairState::Disabled(_)) {
                *state = SyncPairState::Inactive;
            }
        }
        info!("All syncs stopped");
    }

    /// Forgets every runtime state, e.g. after logout
    pub fn reset(&mut self) {
        self.states.clear();
    }

    // ========================================================================
    // Engine completions
    // ========================================================================

    /// Handles the completion of a sync registration
    ///
    /// Completions for pairs that are no longer `Starting` (removed or
    /// suspended in the meantime) are ignored.
    pub fn on_add_sync_finished(
        &mut self,
        local: &Path,
        remote: NodeHandle,
        result: Result<Option<LocalFingerprint>, &EngineError>,
        ports: &mut Ports,
    ) {
        let pairs = ports.preferences.sync_pairs();
        let Some(index) = self.find(&pairs, remote, Some(local), SyncPairState::Starting) else {
            debug!(%remote, local = %local.display(), "Add-sync completion for no starting pair");
            return;
        };
        let pair = &pairs[index];

        match result {
            Ok(fingerprint) => {
                self.set_state(index, SyncPairState::Active);
                info!(index, name = %pair.name, "Sync active");
                if let Some(fingerprint) = fingerprint {
                    if let Err(e) = ports.preferences.set_sync_fingerprint(index, fingerprint) {
                        warn!(index, error = %e, "Failed to store resume fingerprint");
                    }
                }
            }
            Err(error) => {
                let resolved = ports.engine.node_path(remote);
                let trash_root = ports.engine.trash_root_path();
                let reason = DisableReason::classify(&SyncFailureContext {
                    local_is_dir: pair.local_folder.is_dir(),
                    resolved_remote_path: resolved.as_deref(),
                    configured_remote_path: &pair.remote_path,
                    trash_root: &trash_root,
                    error,
                });
                warn!(index, name = %pair.name, %error, %reason, "Sync registration failed");
                self.disable(index, reason, ports);
            }
        }
    }

    /// Handles the completion of a registration removal
    pub fn on_remove_sync_finished(
        &mut self,
        remote: NodeHandle,
        local: Option<&Path>,
        error: Option<&EngineError>,
        ports: &mut Ports,
    ) {
        let pairs = ports.preferences.sync_pairs();
        let index = self.find(&pairs, remote, local, SyncPairState::Disabling);

        if let Some(index) = index {
            self.set_state(index, SyncPairState::Inactive);
        }

        let folder = local
            .map(Path::to_path_buf)
            .or_else(|| index.map(|i| pairs[i].local_folder.clone()));
        if let Some(folder) = &folder {
            ports.platform.notify_item_change(folder);
        }

        match error {
            None => info!(%remote, index = ?index, "Sync removed"),
            Some(e) => {
                warn!(%remote, error = %e, "Sync removal failed");
                ports.notify(Notification::warning(
                    "Sync removal failed",
                    format!("Unable to stop syncing the folder: {}", e.message),
                ));
            }
        }
    }

    fn find(
        &self,
        pairs: &[SyncPairConfig],
        remote: NodeHandle,
        local: Option<&Path>,
        state: SyncPairState,
    ) -> Option<usize> {
        pairs.iter().enumerate().position(|(index, pair)| {
            pair.remote_handle == remote
                && local.map_or(true, |l| pair.local_folder == l)
                && self.states.get(index) == Some(&state)
        })
    }

    // ========================================================================
    // Disable / enable
    // ========================================================================

    /// Disables a pair because of a failure
    ///
    /// The registration is removed if one exists, the pair is marked
    /// inactive in the preferences and the platform integration is told.
    /// The pair stays `Disabled` until [`Self::enable_pair`].
    pub fn disable(&mut self, index: usize, reason: DisableReason, ports: &mut Ports) {
        let Some(pair) = ports.preferences.sync_pair(index) else {
            warn!(index, "Disable requested for unknown sync pair");
            return;
        };

        let registered = self.states.get(index).is_some_and(SyncPairState::is_registered);
        if registered {
            ports.engine.remove_sync(pair.remote_handle);
        }
        warn!(index, name = %pair.name, %reason, "Disabling sync");
        self.set_state(index, SyncPairState::Disabled(reason.clone()));
        persist_active(ports, index, false);
        ports.platform.sync_folder_removed(&pair.local_folder, &pair.name);

        // Over quota raises its own single notice for every pair
        if reason != DisableReason::OverQuota {
            ports.notify(Notification::error(
                "Sync disabled",
                format!("Your sync \"{}\" has been disabled because {reason}", pair.name),
            ));
        }
    }

    /// Disables every registered pair with one shared reason
    ///
    /// Returns how many pairs were disabled.
    pub fn disable_all(&mut self, reason: DisableReason, ports: &mut Ports) -> usize {
        let registered: Vec<usize> = self
            .states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_registered())
            .map(|(i, _)| i)
            .collect();
        for &index in &registered {
            self.disable(index, reason.clone(), ports);
        }
        registered.len()
    }

    /// Removes a pair at the user's request
    ///
    /// A registered pair goes through `Disabling` until the engine confirms
    /// the removal; an unregistered pair becomes `Inactive` immediately.
    pub fn disable_pair(&mut self, index: usize, ports: &mut Ports) -> bool {
        let Some(pair) = ports.preferences.sync_pair(index) else {
            warn!(index, "Unknown sync pair");
            return false;
        };

        if self.states.get(index).is_some_and(SyncPairState::is_registered) {
            self.set_state(index, SyncPairState::Disabling);
            ports.engine.remove_sync(pair.remote_handle);
        } else {
            self.set_state(index, SyncPairState::Inactive);
        }
        info!(index, name = %pair.name, "Sync disabled by user");
        persist_active(ports, index, false);
        ports.platform.sync_folder_removed(&pair.local_folder, &pair.name);
        true
    }

    /// Re-enables a pair and starts it
    pub fn enable_pair(&mut self, index: usize, ports: &mut Ports) -> bool {
        if ports.preferences.sync_pair(index).is_none() {
            warn!(index, "Unknown sync pair");
            return false;
        }
        if self.states.get(index).is_some_and(SyncPairState::is_registered) {
            debug!(index, "Sync pair already running");
            return false;
        }
        persist_active(ports, index, true);
        self.set_state(index, SyncPairState::Inactive);

        // Re-read after the flag change so the pair is started as stored
        let Some(pair) = ports.preferences.sync_pair(index) else {
            return false;
        };
        info!(index, name = %pair.name, "Sync enabled by user");
        self.start_pair(index, &pair, ports);
        true
    }

    // ========================================================================
    // Node updates
    // ========================================================================

    /// Disables registered pairs whose remote folder moved, was renamed or
    /// was deleted
    ///
    /// Returns how many pairs were disabled.
    pub fn check_moved_folders(&mut self, nodes: &[NodeInfo], ports: &mut Ports) -> usize {
        let pairs = ports.preferences.sync_pairs();
        let trash_root = ports.engine.trash_root_path();
        let mut disabled = 0;

        for node in nodes.iter().filter(|n| !n.is_file()) {
            for (index, pair) in pairs.iter().enumerate() {
                if pair.remote_handle != node.handle
                    || !self.states.get(index).is_some_and(SyncPairState::is_registered)
                {
                    continue;
                }
                let resolved = if node.removed {
                    None
                } else {
                    ports.engine.node_path(node.handle)
                };
                if let Some(reason) =
                    DisableReason::classify_remote(resolved.as_deref(), &pair.remote_path, &trash_root)
                {
                    info!(index, name = %pair.name, path = ?resolved, "Remote sync folder moved");
                    self.disable(index, reason, ports);
                    ports.platform.notify_item_change(&pair.local_folder);
                    disabled += 1;
                }
            }
        }
        disabled
    }

    // ========================================================================
    // Exit
    // ========================================================================

    /// Stops every sync and tells the platform about each configured folder
    pub fn shutdown(&mut self, ports: &mut Ports) {
        self.stop_all(ports);
        for pair in ports.preferences.sync_pairs() {
            ports.platform.sync_folder_removed(&pair.local_folder, &pair.name);
        }
    }
}

fn persist_active(ports: &mut Ports, index: usize, active: bool) {
    if let Err(e) = ports.preferences.set_sync_active(index, active) {
        warn!(index, active, error = %e, "Failed to update sync pair");
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use cloudmirror_core::domain::{EngineErrorCode, NodeKind};
    use cloudmirror_core::store::PreferencesData;

    use super::*;
    use crate::testing::{local_folder, TestHarness};

    const REMOTE: NodeHandle = NodeHandle::new(0x10);

    fn harness(local: PathBuf) -> TestHarness {
        let data = PreferencesData {
            sync_pairs: vec![SyncPairConfig::new("Docs", local, REMOTE, "/Docs")],
            ..Default::default()
        };
        let h = TestHarness::with_preferences(data);
        h.engine
            .add_node(NodeInfo::new(REMOTE, "Docs", NodeKind::Folder), "/Docs");
        h
    }

    #[test]
    fn test_start_all_registers_active_pair() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_folder(dir.path(), "docs").unwrap();
        let mut h = harness(local.clone());
        let mut lifecycle = SyncLifecycleManager::new();

        lifecycle.start_all(&mut h.ports);

        assert_eq!(lifecycle.states(), &[SyncPairState::Starting]);
        assert_eq!(
            h.engine.commands(),
            vec![format!("sync_folder({}, {REMOTE})", local.display())]
        );

        lifecycle.on_add_sync_finished(&local, REMOTE, Ok(Some(LocalFingerprint::new(77))), &mut h.ports);
        assert_eq!(lifecycle.states(), &[SyncPairState::Active]);
        assert_eq!(
            h.ports.preferences.sync_pair(0).unwrap().fingerprint,
            Some(LocalFingerprint::new(77))
        );
    }

    #[test]
    fn test_start_all_resumes_from_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_folder(dir.path(), "docs").unwrap();
        let mut h = harness(local);
        h.ports
            .preferences
            .set_sync_fingerprint(0, LocalFingerprint::new(5))
            .unwrap();
        let mut lifecycle = SyncLifecycleManager::new();

        lifecycle.start_all(&mut h.ports);
        assert_eq!(h.engine.count("resume_sync"), 1);
        assert_eq!(h.engine.count("sync_folder"), 0);
    }

    #[test]
    fn test_missing_local_folder_disables_without_engine() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(dir.path().join("gone"));
        let mut lifecycle = SyncLifecycleManager::new();

        lifecycle.start_all(&mut h.ports);

        assert_eq!(
            lifecycle.states(),
            &[SyncPairState::Disabled(DisableReason::LocalFolderMissing)]
        );
        assert!(h.engine.commands().is_empty());
        assert!(!h.ports.preferences.sync_pair(0).unwrap().active);
        assert_eq!(h.platform.count("sync_folder_removed"), 1);
        assert_eq!(h.notifier.len(), 1);
    }

    #[test]
    fn test_unresolvable_remote_disables() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_folder(dir.path(), "docs").unwrap();
        let mut h = harness(local);
        h.engine.move_node(REMOTE, None);
        let mut lifecycle = SyncLifecycleManager::new();

        lifecycle.start_all(&mut h.ports);
        assert_eq!(
            lifecycle.states(),
            &[SyncPairState::Disabled(DisableReason::RemoteFolderMissing)]
        );
        assert_eq!(h.engine.count("sync_folder"), 0);
    }

    #[test]
    fn test_disabled_pair_not_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_folder(dir.path(), "docs").unwrap();
        let mut h = harness(local);
        h.engine.move_node(REMOTE, Some("//bin/Docs"));
        let mut lifecycle = SyncLifecycleManager::new();

        lifecycle.start_all(&mut h.ports);
        lifecycle.start_all(&mut h.ports);
        assert_eq!(
            lifecycle.states(),
            &[SyncPairState::Disabled(DisableReason::RemoteFolderInTrash)]
        );
        assert_eq!(h.engine.count("sync_folder"), 0);

        h.engine.move_node(REMOTE, Some("/Docs"));
        assert!(lifecycle.enable_pair(0, &mut h.ports));
        assert_eq!(h.engine.count("sync_folder"), 1);
        assert_eq!(lifecycle.states(), &[SyncPairState::Starting]);
    }

    #[test]
    fn test_failed_registration_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_folder(dir.path(), "docs").unwrap();
        let mut h = harness(local.clone());
        let mut lifecycle = SyncLifecycleManager::new();
        lifecycle.start_all(&mut h.ports);

        let error = EngineError::new(EngineErrorCode::Failed, "Failed");
        lifecycle.on_add_sync_finished(&local, REMOTE, Err(&error), &mut h.ports);

        assert_eq!(
            lifecycle.states(),
            &[SyncPairState::Disabled(DisableReason::LocalFolderChanged)]
        );
        assert_eq!(h.engine.count("remove_sync"), 1);
        assert!(!h.ports.preferences.sync_pair(0).unwrap().active);
    }

    #[test]
    fn test_user_disable_goes_through_disabling() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_folder(dir.path(), "docs").unwrap();
        let mut h = harness(local.clone());
        let mut lifecycle = SyncLifecycleManager::new();
        lifecycle.start_all(&mut h.ports);
        lifecycle.on_add_sync_finished(&local, REMOTE, Ok(None), &mut h.ports);

        assert!(lifecycle.disable_pair(0, &mut h.ports));
        assert_eq!(lifecycle.states(), &[SyncPairState::Disabling]);
        assert_eq!(h.engine.count("remove_sync"), 1);

        lifecycle.on_remove_sync_finished(REMOTE, Some(&local), None, &mut h.ports);
        assert_eq!(lifecycle.states(), &[SyncPairState::Inactive]);
        assert_eq!(h.platform.count("notify_item_change"), 1);
        assert!(h.notifier.is_empty());
    }

    #[test]
    fn test_moved_remote_folder_disables_pair() {
        let dir = tempfile::tempdir().unwrap();
        let local = local_folder(dir.path(), "docs").unwrap();
        let mut h = harness(local.clone());
        let mut lifecycle = SyncLifecycleManager::new();
        lifecycle.start_all(&mut h.ports);
        lifecycle.on_add_sync_finished(&local, REMOTE, Ok(None), &mut h.ports);

        h.engine.move_node(REMOTE, Some("/Archive/Docs"));
        let node = NodeInfo::new(REMOTE, "Docs", NodeKind::Folder);
        assert_eq!(lifecycle.check_moved_folders(&[node.clone()], &mut h.ports), 1);
        assert_eq!(
            lifecycle.states(),
            &[SyncPairState::Disabled(DisableReason::RemoteFolderMissing)]
        );

        // Already disabled pairs are not checked again
        assert_eq!(lifecycle.check_moved_folders(&[node], &mut h.ports), 0);
    }

    #[test]
    fn test_stop_all_keeps_disable_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(dir.path().join("gone"));
        let mut lifecycle = SyncLifecycleManager::new();
        lifecycle.start_all(&mut h.ports);

        lifecycle.stop_all(&mut h.ports);
        assert_eq!(
            lifecycle.states(),
            &[SyncPairState::Disabled(DisableReason::LocalFolderMissing)]
        );
        assert_eq!(h.engine.count("remove_all_syncs"), 1);
    }
}
