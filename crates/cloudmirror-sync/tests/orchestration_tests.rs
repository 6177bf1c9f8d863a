//! End-to-end behaviour of the dispatcher against recording ports

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use cloudmirror_core::config::Config;
use cloudmirror_core::domain::{
    AccountDetails, DisableReason, EngineError, EngineErrorCode, LocalFingerprint, NodeHandle,
    NodeInfo, NodeKind, SessionToken, SyncPairConfig, SyncPairState, TransferDirection,
    TransferInfo, TransferTag,
};
use cloudmirror_core::ports::NotificationCategory;
use cloudmirror_core::store::PreferencesData;
use cloudmirror_sync::network::{InterfaceAddress, NetworkSnapshot};
use cloudmirror_sync::testing::{
    local_folder, RecordingEngine, RecordingNotifier, RecordingPlatform, TestHarness,
};
use cloudmirror_sync::{Dispatcher, EngineEvent, FinishedRequest, Message, UiCommand};

const DOCS: NodeHandle = NodeHandle::new(0x100);
const PHOTOS: NodeHandle = NodeHandle::new(0x200);
const UPLOADS: NodeHandle = NodeHandle::new(0x300);

struct Fixture {
    dispatcher: Dispatcher,
    engine: RecordingEngine,
    platform: RecordingPlatform,
    notifier: RecordingNotifier,
    now: DateTime<Utc>,
}

impl Fixture {
    /// Logs in through the full session/fetch sequence
    fn logged_in(pairs: Vec<SyncPairConfig>) -> Self {
        let data = PreferencesData {
            session: Some(SessionToken::new("stored-session").unwrap()),
            sync_pairs: pairs,
            last_exit: Some(Utc::now() - Duration::hours(1)),
            ..Default::default()
        };
        let h = TestHarness::with_preferences(data);
        h.engine.with_state(|s| s.has_root = true);
        h.engine
            .add_node(NodeInfo::new(DOCS, "Docs", NodeKind::Folder), "/Docs");
        h.engine
            .add_node(NodeInfo::new(PHOTOS, "Photos", NodeKind::Folder), "/Photos");
        h.engine
            .add_node(NodeInfo::new(UPLOADS, "Uploads", NodeKind::Folder), "/Uploads");
        let (ports, engine, platform, notifier) = h.split();

        let now = Utc::now();
        let mut dispatcher = Dispatcher::new(&Config::default(), ports);
        dispatcher.start(now);
        dispatcher.handle(finished(FinishedRequest::Login, None), now);
        dispatcher.handle(finished(FinishedRequest::FetchNodes, None), now);

        Self {
            dispatcher,
            engine,
            platform,
            notifier,
            now,
        }
    }

    fn send(&mut self, message: impl Into<Message>) {
        self.dispatcher.handle(message.into(), self.now);
    }

    fn upload_commands(&self) -> Vec<String> {
        self.engine
            .commands()
            .into_iter()
            .filter(|c| c.starts_with("start_upload"))
            .collect()
    }
}

fn finished(request: FinishedRequest, error: Option<EngineError>) -> Message {
    Message::Engine(EngineEvent::RequestFinished { request, error })
}

fn over_quota() -> EngineError {
    EngineError::new(EngineErrorCode::OverQuota, "Over quota")
}

fn upload(tag: i64, path: &str) -> TransferInfo {
    let mut transfer = TransferInfo::new(TransferTag::new(tag), TransferDirection::Upload);
    transfer.path = Some(PathBuf::from(path));
    transfer.file_name = "b.txt".into();
    transfer.total_bytes = 1024;
    transfer
}

fn add_sync_ok(local: &Path, remote: NodeHandle) -> Message {
    finished(
        FinishedRequest::AddSync {
            local: local.to_path_buf(),
            remote,
            fingerprint: Some(LocalFingerprint::new(1)),
        },
        None,
    )
}

// ============================================================================
// Network snapshots
// ============================================================================

fn addr(name: &str, last: u8) -> InterfaceAddress {
    InterfaceAddress {
        name: name.into(),
        addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, last)),
        up: true,
        loopback: false,
    }
}

#[test]
fn test_snapshot_change_is_symmetric_and_reflexive() {
    let snapshots = vec![
        NetworkSnapshot::default(),
        NetworkSnapshot::from_addresses(&[addr("eth0", 2)]),
        NetworkSnapshot::from_addresses(&[addr("eth0", 3)]),
        NetworkSnapshot::from_addresses(&[addr("eth0", 2), addr("eth0", 3)]),
        NetworkSnapshot::from_addresses(&[addr("wlan0", 2)]),
        NetworkSnapshot::from_addresses(&[addr("eth0", 2), addr("wlan0", 9)]),
    ];

    for a in &snapshots {
        assert!(!a.changed(a));
        for b in &snapshots {
            assert_eq!(a.changed(b), b.changed(a));
        }
    }
}

// ============================================================================
// Transfer queue
// ============================================================================

#[test]
fn test_uploads_submitted_in_enqueue_order() {
    let mut f = Fixture::logged_in(vec![]);

    f.send(UiCommand::EnqueueUpload(vec!["/p1".into(), "/p2".into()]));
    assert!(f.upload_commands().is_empty());
    f.send(UiCommand::UploadDestinationResolved(UPLOADS));
    f.send(UiCommand::EnqueueUpload(vec!["/p3".into()]));
    f.send(UiCommand::UploadDestinationResolved(UPLOADS));

    assert_eq!(
        f.upload_commands(),
        vec![
            format!("start_upload(/p1, {UPLOADS})"),
            format!("start_upload(/p2, {UPLOADS})"),
            format!("start_upload(/p3, {UPLOADS})"),
        ]
    );
}

#[test]
fn test_cancelled_destination_submits_nothing() {
    let mut f = Fixture::logged_in(vec![]);

    f.send(UiCommand::EnqueueUpload(vec!["/p1".into(), "/p2".into()]));
    assert_eq!(
        f.dispatcher.snapshot().awaiting_destination,
        vec![TransferDirection::Upload]
    );
    f.send(UiCommand::DestinationCancelled(TransferDirection::Upload));
    f.send(UiCommand::UploadDestinationResolved(UPLOADS));

    assert!(f.upload_commands().is_empty());
    assert!(f.dispatcher.snapshot().awaiting_destination.is_empty());
}

#[test]
fn test_upload_to_missing_folder_reports_error() {
    let mut f = Fixture::logged_in(vec![]);

    f.send(UiCommand::EnqueueUpload(vec!["/p1".into()]));
    f.send(UiCommand::UploadDestinationResolved(NodeHandle::new(0xdead)));

    assert!(f.upload_commands().is_empty());
    assert_eq!(f.notifier.sent()[0].category, NotificationCategory::Error);
}

// ============================================================================
// Sync lifecycle
// ============================================================================

#[test]
fn test_trashed_remote_folder_disables_pair_until_reenabled() {
    let dir = tempfile::tempdir().unwrap();
    let local = local_folder(dir.path(), "docs").unwrap();
    let data_pair = SyncPairConfig::new("Docs", &local, DOCS, "/Docs");

    // The folder is already in the trash when the tree is fetched
    let data = PreferencesData {
        session: Some(SessionToken::new("s").unwrap()),
        sync_pairs: vec![data_pair],
        ..Default::default()
    };
    let h = TestHarness::with_preferences(data);
    h.engine.with_state(|s| s.has_root = true);
    h.engine
        .add_node(NodeInfo::new(DOCS, "Docs", NodeKind::Folder), "//bin/Docs");
    let (ports, engine, platform, _) = h.split();
    let now = Utc::now();
    let mut d = Dispatcher::new(&Config::default(), ports);
    d.start(now);
    d.handle(finished(FinishedRequest::Login, None), now);
    d.handle(finished(FinishedRequest::FetchNodes, None), now);

    assert_eq!(
        d.lifecycle().states(),
        &[SyncPairState::Disabled(DisableReason::RemoteFolderInTrash)]
    );
    assert_eq!(platform.count("sync_folder_removed"), 1);

    // A node update for the folder does not bring it back
    let node = NodeInfo::new(DOCS, "Docs", NodeKind::Folder);
    d.handle(
        Message::Engine(EngineEvent::NodesUpdated(Some(vec![node]))),
        now,
    );
    assert_eq!(engine.count("sync_folder"), 0);
    assert_eq!(engine.count("resume_sync"), 0);

    engine.move_node(DOCS, Some("/Docs"));
    d.handle(Message::Ui(UiCommand::EnableSync(0)), now);
    assert_eq!(engine.count("sync_folder"), 1);
    assert_eq!(d.lifecycle().states(), &[SyncPairState::Starting]);
}

#[test]
fn test_remote_folder_renamed_while_active() {
    let dir = tempfile::tempdir().unwrap();
    let local = local_folder(dir.path(), "docs").unwrap();
    let mut f = Fixture::logged_in(vec![SyncPairConfig::new("Docs", &local, DOCS, "/Docs")]);
    f.send(add_sync_ok(&local, DOCS));
    assert_eq!(f.dispatcher.lifecycle().states(), &[SyncPairState::Active]);

    f.engine.move_node(DOCS, Some("/Documents"));
    f.send(EngineEvent::NodesUpdated(Some(vec![NodeInfo::new(
        DOCS,
        "Documents",
        NodeKind::Folder,
    )])));

    assert_eq!(
        f.dispatcher.lifecycle().states(),
        &[SyncPairState::Disabled(DisableReason::RemoteFolderMissing)]
    );
    assert_eq!(f.engine.count("remove_sync"), 1);
    assert_eq!(f.platform.count("notify_item_change"), 1);
}

#[test]
fn test_local_folder_removed_before_registration_completes() {
    let dir = tempfile::tempdir().unwrap();
    let local = local_folder(dir.path(), "docs").unwrap();
    let mut f = Fixture::logged_in(vec![SyncPairConfig::new("Docs", &local, DOCS, "/Docs")]);

    std::fs::remove_dir(&local).unwrap();
    f.send(finished(
        FinishedRequest::AddSync {
            local: local.clone(),
            remote: DOCS,
            fingerprint: None,
        },
        Some(EngineError::new(EngineErrorCode::Other(-9), "Not found")),
    ));

    assert_eq!(
        f.dispatcher.lifecycle().states(),
        &[SyncPairState::Disabled(DisableReason::LocalFolderMissing)]
    );
    let notice = &f.notifier.sent()[0];
    assert!(notice.body.contains("Docs"));
}

// ============================================================================
// Over quota
// ============================================================================

#[test]
fn test_over_quota_burst_suspends_once() {
    let dir = tempfile::tempdir().unwrap();
    let docs = local_folder(dir.path(), "docs").unwrap();
    let photos = local_folder(dir.path(), "photos").unwrap();
    let mut f = Fixture::logged_in(vec![
        SyncPairConfig::new("Docs", &docs, DOCS, "/Docs"),
        SyncPairConfig::new("Photos", &photos, PHOTOS, "/Photos"),
    ]);
    f.send(add_sync_ok(&docs, DOCS));
    f.send(add_sync_ok(&photos, PHOTOS));

    for tag in 1..=3 {
        f.send(EngineEvent::TransferFinished {
            transfer: upload(tag, "/x"),
            error: Some(over_quota()),
        });
    }

    assert!(f
        .dispatcher
        .lifecycle()
        .states()
        .iter()
        .all(SyncPairState::is_inactive));
    assert_eq!(f.engine.count("cancel_transfers(upload)"), 1);
    let suspension_notices = f
        .notifier
        .sent()
        .iter()
        .filter(|n| n.category == NotificationCategory::OverQuota)
        .count();
    assert_eq!(suspension_notices, 1);
    assert_eq!(f.platform.count("sync_folder_removed"), 2);
    assert!(f.dispatcher.snapshot().over_quota);
}

#[test]
fn test_over_quota_lifted_by_account_details() {
    let mut f = Fixture::logged_in(vec![]);
    f.send(finished(FinishedRequest::PauseTransfers { paused: false }, Some(over_quota())));
    assert!(f.dispatcher.quota().over_quota);

    f.send(UiCommand::EnqueueUpload(vec!["/p1".into()]));
    assert!(f.dispatcher.snapshot().awaiting_destination.is_empty());

    f.send(finished(
        FinishedRequest::AccountDetails(Some(AccountDetails {
            storage_max: 100,
            storage_used: 50,
            transfer_max: 0,
            transfer_used: 0,
        })),
        None,
    ));
    assert!(!f.dispatcher.quota().over_quota);
}

#[test]
fn test_transfer_quota_error_after_details_suspends_once() {
    let mut f = Fixture::logged_in(vec![]);
    f.send(EngineEvent::TransferFinished {
        transfer: upload(1, "/x"),
        error: Some(over_quota()),
    });
    assert_eq!(f.engine.count("cancel_transfers(upload)"), 1);

    // Storage has room but the transfer allowance is used up
    f.send(finished(
        FinishedRequest::AccountDetails(Some(AccountDetails {
            storage_max: 100,
            storage_used: 10,
            transfer_max: 50,
            transfer_used: 50,
        })),
        None,
    ));
    assert!(f.dispatcher.quota().over_quota);

    f.send(EngineEvent::TransferFinished {
        transfer: upload(2, "/y"),
        error: Some(over_quota()),
    });
    assert_eq!(f.engine.count("cancel_transfers(upload)"), 1);
    assert!(f.dispatcher.quota().over_quota);
}

// ============================================================================
// Upload tag correlation
// ============================================================================

#[test]
fn test_node_update_recovers_upload_path() {
    let mut f = Fixture::logged_in(vec![]);

    f.send(EngineEvent::TransferFinished {
        transfer: upload(7, "/a/b.txt"),
        error: None,
    });
    let mut node = NodeInfo::new(NodeHandle::new(0x77), "b.txt", NodeKind::File);
    node.tag = Some(TransferTag::new(7));
    f.send(EngineEvent::NodesUpdated(Some(vec![node])));

    let recent = f.dispatcher.recent_files();
    assert_eq!(recent[0].local_path, Some(PathBuf::from("/a/b.txt")));
    assert!(f.dispatcher.pending_uploads().is_empty());
}

#[test]
fn test_node_update_before_transfer_finish_is_tolerated() {
    let mut f = Fixture::logged_in(vec![]);

    let mut node = NodeInfo::new(NodeHandle::new(0x77), "b.txt", NodeKind::File);
    node.tag = Some(TransferTag::new(7));
    f.send(EngineEvent::NodesUpdated(Some(vec![node])));
    f.send(EngineEvent::TransferFinished {
        transfer: upload(7, "/a/b.txt"),
        error: None,
    });

    assert_eq!(f.dispatcher.recent_files()[0].local_path, None);
    assert_eq!(f.dispatcher.pending_uploads().len(), 1);
}

#[test]
fn test_deleted_node_does_not_claim_upload() {
    let mut f = Fixture::logged_in(vec![]);
    f.send(EngineEvent::TransferFinished {
        transfer: upload(7, "/a/b.txt"),
        error: None,
    });

    let mut node = NodeInfo::new(NodeHandle::new(0x77), "b.txt", NodeKind::File);
    node.tag = Some(TransferTag::new(7));
    node.sync_deleted = true;
    f.send(EngineEvent::NodesUpdated(Some(vec![node])));

    assert!(f.dispatcher.recent_files().is_empty());
    assert_eq!(f.dispatcher.pending_uploads().len(), 1);
}

#[test]
fn test_sync_uploads_are_not_cached() {
    let mut f = Fixture::logged_in(vec![]);
    let mut transfer = upload(9, "/synced/file");
    transfer.is_sync = true;

    f.send(EngineEvent::TransferFinished {
        transfer,
        error: None,
    });
    assert!(f.dispatcher.pending_uploads().is_empty());
    assert_eq!(f.dispatcher.quota().storage_used, 1024);
}

// ============================================================================
// Account details and foreign nodes
// ============================================================================

#[test]
fn test_account_details_rate_limited() {
    let mut f = Fixture::logged_in(vec![]);
    // Login already requested them once
    assert_eq!(f.engine.count("request_account_details"), 1);

    f.send(EngineEvent::UsersUpdated);
    f.send(EngineEvent::UsersUpdated);
    assert_eq!(f.engine.count("request_account_details"), 1);

    f.now = f.now + Duration::minutes(6);
    f.send(EngineEvent::UsersUpdated);
    assert_eq!(f.engine.count("request_account_details"), 2);
}

#[test]
fn test_foreign_nodes_notice_throttled() {
    let mut f = Fixture::logged_in(vec![]);
    let foreign = || {
        let mut node = NodeInfo::new(NodeHandle::new(0x999), "shared.pdf", NodeKind::File);
        node.created_at = Utc::now();
        EngineEvent::NodesUpdated(Some(vec![node]))
    };

    f.send(foreign());
    f.send(foreign());
    let notices = |notifier: &RecordingNotifier| {
        notifier
            .sent()
            .iter()
            .filter(|n| n.body.contains("new or updated files"))
            .count()
    };
    assert_eq!(notices(&f.notifier), 1);

    f.now = f.now + Duration::minutes(2);
    f.send(foreign());
    assert_eq!(notices(&f.notifier), 2);
}

// ============================================================================
// Transfers and session
// ============================================================================

#[test]
fn test_stats_reset_when_idle() {
    let mut f = Fixture::logged_in(vec![]);
    f.engine.with_state(|s| s.pending_uploads = 1);

    let mut started = upload(1, "/a");
    started.total_bytes = 500;
    f.send(EngineEvent::TransferStarted(started));
    assert_eq!(f.dispatcher.stats().upload.total_bytes, 500);

    f.engine.with_state(|s| s.pending_uploads = 0);
    f.send(EngineEvent::TransferFinished {
        transfer: upload(1, "/a"),
        error: None,
    });
    assert_eq!(f.dispatcher.stats().upload.total_bytes, 0);
}

#[test]
fn test_first_retry_raises_transient_notice() {
    let mut f = Fixture::logged_in(vec![]);
    let error = EngineError::new(EngineErrorCode::Other(-3), "Try again");

    for retry in 1..=3 {
        let mut transfer = upload(4, "/a");
        transfer.num_retry = retry;
        f.send(EngineEvent::TransferTemporaryError {
            transfer,
            error: error.clone(),
        });
    }

    let transient: Vec<_> = f
        .notifier
        .sent()
        .into_iter()
        .filter(|n| n.category == NotificationCategory::Transient)
        .collect();
    assert_eq!(transient.len(), 1);
}

#[test]
fn test_paused_state_restored_after_login() {
    let data = PreferencesData {
        session: Some(SessionToken::new("s").unwrap()),
        was_paused: true,
        upload_limit_kib: 100,
        ..Default::default()
    };
    let h = TestHarness::with_preferences(data);
    h.engine.with_state(|s| s.has_root = true);
    let (ports, engine, _, _) = h.split();
    let now = Utc::now();
    let mut d = Dispatcher::new(&Config::default(), ports);
    d.start(now);
    d.handle(finished(FinishedRequest::Login, None), now);
    d.handle(finished(FinishedRequest::FetchNodes, None), now);

    assert_eq!(engine.count("pause_transfers(true)"), 1);
    assert_eq!(engine.count("set_upload_limit(102400)"), 1);
    assert!(d.snapshot().global.paused);
}

#[test]
fn test_invalid_session_logout_resets_to_setup() {
    let mut f = Fixture::logged_in(vec![]);

    f.send(finished(
        FinishedRequest::Logout,
        Some(EngineError::new(EngineErrorCode::InvalidSession, "Expired")),
    ));

    assert_eq!(
        f.dispatcher.session(),
        cloudmirror_core::domain::SessionState::SetupRequired
    );
    assert_eq!(f.notifier.sent()[0].title, "Logged out");
}

#[test]
fn test_invalid_session_logout_stops_running_syncs() {
    let dir = tempfile::tempdir().unwrap();
    let docs = local_folder(dir.path(), "docs").unwrap();
    let mut f = Fixture::logged_in(vec![SyncPairConfig::new("Docs", &docs, DOCS, "/Docs")]);
    f.send(add_sync_ok(&docs, DOCS));
    assert_eq!(f.dispatcher.lifecycle().registered_count(), 1);

    f.send(finished(
        FinishedRequest::Logout,
        Some(EngineError::new(EngineErrorCode::InvalidSession, "Expired")),
    ));

    assert_eq!(f.engine.count("remove_all_syncs"), 1);
    assert_eq!(
        f.platform.calls(),
        vec![format!("sync_folder_removed({}, Docs)", docs.display())]
    );
    assert_eq!(f.dispatcher.lifecycle().registered_count(), 0);
    assert!(f.dispatcher.ports_mut().preferences.sync_pairs().is_empty());
}

#[test]
fn test_fetch_failure_stops_running_syncs_once() {
    let dir = tempfile::tempdir().unwrap();
    let docs = local_folder(dir.path(), "docs").unwrap();
    let mut f = Fixture::logged_in(vec![SyncPairConfig::new("Docs", &docs, DOCS, "/Docs")]);
    f.send(add_sync_ok(&docs, DOCS));

    f.send(finished(
        FinishedRequest::FetchNodes,
        Some(EngineError::new(EngineErrorCode::Other(-3), "Fetch failed")),
    ));
    f.send(finished(FinishedRequest::Logout, None));

    assert_eq!(f.engine.count("remove_all_syncs"), 1);
    assert_eq!(f.platform.count("sync_folder_removed"), 1);
    assert_eq!(
        f.dispatcher.session(),
        cloudmirror_core::domain::SessionState::SetupRequired
    );
}

#[test]
fn test_export_link_published() {
    let mut f = Fixture::logged_in(vec![]);
    let node = NodeHandle::new(0x55);

    f.send(UiCommand::ExportNode(node));
    f.send(finished(
        FinishedRequest::Export {
            node,
            link: Some("https://example.com/#!abc".into()),
        },
        None,
    ));

    assert_eq!(f.engine.count("export_node"), 1);
    assert_eq!(
        f.dispatcher.snapshot().last_exported_link.as_deref(),
        Some("https://example.com/#!abc")
    );
}

#[test]
fn test_exit_notifies_platform_for_every_pair() {
    let dir = tempfile::tempdir().unwrap();
    let docs = local_folder(dir.path(), "docs").unwrap();
    let photos = local_folder(dir.path(), "photos").unwrap();
    let mut f = Fixture::logged_in(vec![
        SyncPairConfig::new("Docs", &docs, DOCS, "/Docs"),
        SyncPairConfig::new("Photos", &photos, PHOTOS, "/Photos"),
    ]);

    let control = f.dispatcher.handle(Message::Ui(UiCommand::Exit), f.now);
    assert_eq!(control, cloudmirror_sync::Control::Exit);
    assert_eq!(f.platform.count("sync_folder_removed"), 2);
    assert_eq!(
        f.dispatcher.ports_mut().preferences.last_exit(),
        Some(f.now)
    );
}
