//! Integration tests for the backup and recovery engine

use serde_json::json;
use session_guard::backup::{
    codec, BackupKind, BackupRecoveryEngine, HealthStatus, RecoverySelector, RestoreOutcome,
    StoreStateSaver,
};
use session_guard::clock::{Clock, ManualClock};
use session_guard::config::{BackupConfig, StorageConfig};
use session_guard::experiment::{ExperimentState, SessionRecord, SessionStartInfo};
use session_guard::store::{DurableStore, MemoryStore};
use std::rc::Rc;

const NOW: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;

struct Harness {
    clock: Rc<ManualClock>,
    store: Rc<MemoryStore>,
    engine: BackupRecoveryEngine,
    state: ExperimentState,
}

fn harness(storage: StorageConfig) -> Harness {
    let clock = Rc::new(ManualClock::at_millis(NOW));
    let store = Rc::new(MemoryStore::new());
    let engine = BackupRecoveryEngine::new(
        BackupConfig::default(),
        storage,
        store.clone(),
        clock.clone(),
    );
    let mut state = ExperimentState::for_user("alice");
    state.session_order = (0..9).collect();
    Harness {
        clock,
        store,
        engine,
        state,
    }
}

fn backup_at(h: &Harness, kind: BackupKind, at_ms: i64) {
    h.clock
        .set(chrono::DateTime::from_timestamp_millis(at_ms).unwrap());
    assert!(h.engine.create_backup(kind, &h.state));
}

#[test]
fn test_standard_cleanup_drops_expired_then_oldest() {
    let h = harness(StorageConfig::default());
    backup_at(&h, BackupKind::Session, NOW - 8 * DAY);
    for i in 0..52 {
        backup_at(&h, BackupKind::Event, NOW - HOUR + i);
    }
    h.clock
        .set(chrono::DateTime::from_timestamp_millis(NOW).unwrap());

    let removed = h.engine.standard_cleanup("alice");

    assert_eq!(removed.len(), 3);
    assert!(removed[0].starts_with("session_backup_alice_"));
    let remaining = h.engine.list_backups("alice");
    assert_eq!(remaining.len(), 50);
    assert_eq!(remaining[0].timestamp, NOW - HOUR + 2);
}

#[test]
fn test_standard_cleanup_keeps_recent_backups_under_limit() {
    let h = harness(StorageConfig::default());
    backup_at(&h, BackupKind::Session, NOW - 6 * DAY);
    backup_at(&h, BackupKind::Periodic, NOW - 2 * DAY);

    assert!(h.engine.standard_cleanup("alice").is_empty());
    assert_eq!(h.engine.list_backups("alice").len(), 2);
}

#[test]
fn test_warning_level_runs_standard_cleanup() {
    let storage = StorageConfig {
        max_capacity_bytes: 40_000,
        ..StorageConfig::default()
    };
    let h = harness(storage);
    backup_at(&h, BackupKind::Session, NOW - 10 * DAY);
    backup_at(&h, BackupKind::Periodic, NOW - 2 * DAY);
    h.clock
        .set(chrono::DateTime::from_timestamp_millis(NOW).unwrap());

    let used = h.engine.health("alice").total_bytes;
    let target = 40_000 * 80 / 100;
    h.store
        .set("pad", &"p".repeat((target - used) / 2))
        .unwrap();

    let check = h.engine.check_health_and_evict("alice");
    assert_eq!(check.health.status, HealthStatus::Warning);
    assert_eq!(check.evicted.len(), 1);
    let kinds: Vec<BackupKind> = h
        .engine
        .list_backups("alice")
        .iter()
        .map(|b| b.kind)
        .collect();
    assert_eq!(kinds, vec![BackupKind::Periodic]);
}

#[test]
fn test_recovered_snapshot_restores_fresh_state() {
    let mut h = harness(StorageConfig::default());
    let mut session = SessionRecord::new(
        "alice",
        SessionStartInfo::new(2, json!({"paddle": 0.8})),
        h.clock.now(),
    );
    session.record_event("point_scored", json!({"side": "left"}), h.clock.now());
    h.state.current_session = Some(session);
    assert!(h.engine.create_backup(BackupKind::Emergency, &h.state));

    let snapshot = h
        .engine
        .recover("alice", &RecoverySelector::Kind(BackupKind::Emergency))
        .unwrap();
    let mut restored = ExperimentState::for_user("alice");
    let saver = StoreStateSaver::new(h.store.clone());

    assert_eq!(
        h.engine.restore(snapshot, &mut restored, &saver),
        RestoreOutcome::Saved
    );
    assert_eq!(restored.session_order, h.state.session_order);
    assert_eq!(restored.current_session, h.state.current_session);
    assert!(restored.metrics.is_empty());
}

#[test]
fn test_restore_reports_unsaved_when_save_fails() {
    let h = harness(StorageConfig::default());
    assert!(h.engine.create_backup(BackupKind::Session, &h.state));
    let snapshot = h
        .engine
        .recover("alice", &RecoverySelector::Latest)
        .unwrap();

    let mut state = ExperimentState::for_user("alice");
    h.store.fail_next_write();
    let saver = StoreStateSaver::new(h.store.clone());
    let outcome = h.engine.restore(snapshot, &mut state, &saver);
    assert_eq!(outcome, RestoreOutcome::Unsaved);
    assert!(outcome.is_applied());
    assert_eq!(state.session_order, h.state.session_order);
}

#[test]
fn test_undecodable_backup_recovers_nothing() {
    let h = harness(StorageConfig::default());
    h.store
        .set(
            "session_backup_alice_5",
            r#"{"kind":"session","userId":"alice","timestamp":5,"payload":"@@@"}"#,
        )
        .unwrap();

    assert_eq!(h.engine.list_backups("alice").len(), 1);
    assert!(h
        .engine
        .recover("alice", &RecoverySelector::Latest)
        .is_none());
}

#[test]
fn test_quota_exhaustion_surfaces_as_false() {
    let clock = Rc::new(ManualClock::at_millis(NOW));
    let store = Rc::new(MemoryStore::with_quota(64));
    let engine = BackupRecoveryEngine::new(
        BackupConfig::default(),
        StorageConfig::default(),
        store.clone(),
        clock,
    );
    let state = ExperimentState::for_user("alice");

    assert!(!engine.create_backup(BackupKind::Session, &state));
    assert!(store.is_empty());
}

#[test]
fn test_codec_handles_full_snapshot() {
    let value = json!({
        "userId": "alice",
        "sessionOrder": [6, 8, 0, 1, 4, 5, 2, 7, 3],
        "currentSession": {"events": [], "note": "  padded  "},
    });
    let blob = codec::encode(&value);
    assert_ne!(blob, value.to_string());
    assert_eq!(codec::decode(&blob), Some(value));
}
