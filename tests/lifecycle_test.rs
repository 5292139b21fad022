//! Integration tests for the session lifecycle tracker

use serde_json::json;
use session_guard::bus::Event;
use session_guard::clock::{Clock, ManualClock};
use session_guard::config::LifecycleConfig;
use session_guard::experiment::{ExperimentState, SessionStartInfo};
use session_guard::lifecycle::{assign_order, is_valid_order, SessionLifecycleTracker};
use session_guard::store::{DurableStore, MemoryStore};
use std::rc::Rc;

const T0: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;

fn tracker(store: &Rc<MemoryStore>, clock: &Rc<ManualClock>) -> SessionLifecycleTracker {
    SessionLifecycleTracker::new(LifecycleConfig::default(), store.clone(), clock.clone())
}

#[test]
fn test_order_is_independent_of_store_and_instance() {
    let clock = Rc::new(ManualClock::at_millis(T0));
    let store = Rc::new(MemoryStore::new());
    store.set("noise", "x").unwrap();

    let first = tracker(&store, &clock).assign_order("alice");
    store.clear();
    let second = tracker(&Rc::new(MemoryStore::new()), &clock).assign_order("alice");

    assert_eq!(first, second);
    assert_eq!(first, assign_order("alice", 9));
    assert!(is_valid_order(&first, 9));
}

#[test]
fn test_orders_differ_between_users() {
    assert_ne!(assign_order("alice", 9), assign_order("bob", 9));
}

#[test]
fn test_full_session_history_and_analytics() {
    let clock = Rc::new(ManualClock::at_millis(T0));
    let store = Rc::new(MemoryStore::new());
    let mut tracker = tracker(&store, &clock);
    let mut state = ExperimentState::for_user("alice");

    for (id, minutes, completed) in [(1, 4, true), (2, 6, true), (3, 1, false)] {
        tracker.on_session_start(&mut state, SessionStartInfo::new(id, json!({ "v": id })));
        let session = state.current_session.as_mut().unwrap();
        session.record_event("point_scored", json!({}), clock.now());
        clock.advance_millis(minutes * MINUTE);
        tracker.on_session_end(&mut state, completed);
    }

    let analytics = tracker.analytics();
    assert_eq!(analytics.total_sessions, 3);
    assert_eq!(analytics.completed_sessions, 2);
    assert_eq!(analytics.incomplete_sessions, 1);
    assert!((analytics.average_duration - 5.0 * MINUTE as f64).abs() < 1e-9);
    assert_eq!(analytics.total_events, 3);
    assert_eq!(state.completed_sessions(), 2);
    assert_eq!(state.metrics.len(), 3);
}

#[test]
fn test_idle_and_timeout_thresholds_are_strict() {
    let clock = Rc::new(ManualClock::at_millis(T0));
    let store = Rc::new(MemoryStore::new());
    let mut tracker = tracker(&store, &clock);
    let mut state = ExperimentState::for_user("alice");
    tracker.on_session_start(&mut state, SessionStartInfo::new(1, json!({})));

    clock.advance_millis(5 * MINUTE);
    assert!(tracker.check_activity(&state).is_empty());

    clock.advance_millis(1);
    let events = tracker.check_activity(&state);
    assert_eq!(
        events,
        vec![Event::Idle {
            idle_time_ms: 5 * MINUTE + 1
        }]
    );

    clock.advance_millis(25 * MINUTE - 1);
    tracker.record_activity();
    assert!(tracker.check_activity(&state).is_empty());

    clock.advance_millis(1);
    assert_eq!(
        tracker.check_activity(&state),
        vec![Event::Timeout {
            session_time_ms: 30 * MINUTE + 1
        }]
    );
}

#[test]
fn test_resume_window_boundary() {
    let clock = Rc::new(ManualClock::at_millis(T0));
    let store = Rc::new(MemoryStore::new());
    let mut tracker = tracker(&store, &clock);
    let mut state = ExperimentState::for_user("alice");
    tracker.on_session_start(&mut state, SessionStartInfo::new(1, json!({})));
    tracker.on_page_suspend(&mut state);

    clock.advance_millis(60 * MINUTE);
    assert!(tracker.has_resumable("alice"));
    assert!(tracker.load_resumable("alice").is_some());

    clock.advance_millis(1);
    assert!(tracker.load_resumable("alice").is_none());
    assert!(!tracker.has_resumable("alice"));
}

#[test]
fn test_saved_state_for_another_user_is_not_resumed() {
    let clock = Rc::new(ManualClock::at_millis(T0));
    let store = Rc::new(MemoryStore::new());
    let mut tracker = tracker(&store, &clock);
    let mut state = ExperimentState::for_user("alice");
    tracker.on_session_start(&mut state, SessionStartInfo::new(1, json!({})));

    assert!(tracker.load_resumable("bob").is_none());
    assert!(tracker.load_resumable("alice").is_some());
}

#[test]
fn test_corrupt_history_is_treated_as_empty() {
    let clock = Rc::new(ManualClock::at_millis(T0));
    let store = Rc::new(MemoryStore::new());
    store.set("session_history_alice", "{not json").unwrap();

    let mut tracker = tracker(&store, &clock);
    tracker.load_history("alice");

    assert!(tracker.history().is_empty());
}
