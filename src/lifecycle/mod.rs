//! Session Lifecycle Tracker
//!
//! Owns session start/end detection, activity/idle/timeout monitoring and
//! the seeded presentation order.
//!
//! ## Persistence
//!
//! Every milestone rewrites the resumable snapshot under
//! `session_state_<userId>`; finalized sessions are appended to
//! `session_history_<userId>`. A saved snapshot older than the resume
//! window is discarded rather than resumed.
//!
//! ## Usage
//!
//! ```rust
//! use std::rc::Rc;
//! use serde_json::json;
//! use session_guard::clock::ManualClock;
//! use session_guard::config::LifecycleConfig;
//! use session_guard::experiment::{ExperimentState, SessionStartInfo};
//! use session_guard::lifecycle::SessionLifecycleTracker;
//! use session_guard::store::MemoryStore;
//!
//! let clock = Rc::new(ManualClock::at_millis(0));
//! let mut tracker = SessionLifecycleTracker::new(
//!     LifecycleConfig::default(),
//!     Rc::new(MemoryStore::new()),
//!     clock.clone(),
//! );
//! let mut state = ExperimentState::for_user("alice");
//! state.session_order = tracker.assign_order("alice");
//!
//! tracker.on_session_start(&mut state, SessionStartInfo::new(1, json!({"ball": 1})));
//! clock.advance_millis(5 * 60 * 1000);
//! let finished = tracker.on_session_end(&mut state, true);
//! assert!(finished.is_some());
//! assert_eq!(state.completed_sessions(), 1);
//! ```

mod analytics;
mod ordering;
mod persistence;

pub use analytics::SessionAnalytics;
pub use ordering::{
    assign_order, is_valid_order, order_distribution, seed_from_user_id, SeededRng,
};
pub use persistence::{session_history_key, session_state_key, SavedSessionState, SessionHistory};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::bus::Event;
use crate::clock::{elapsed_millis, Clock};
use crate::config::LifecycleConfig;
use crate::experiment::{ExperimentState, SessionMetrics, SessionRecord, SessionStartInfo};
use crate::store::DurableStore;
use crate::Result;

/// Tracks the lifecycle of the active session.
pub struct SessionLifecycleTracker {
    config: LifecycleConfig,
    store: Rc<dyn DurableStore>,
    clock: Rc<dyn Clock>,
    last_activity: DateTime<Utc>,
    session_start: Option<DateTime<Utc>>,
    history: Vec<SessionRecord>,
}

impl SessionLifecycleTracker {
    /// Create a tracker. Activity time starts at the clock's current instant.
    #[must_use]
    pub fn new(config: LifecycleConfig, store: Rc<dyn DurableStore>, clock: Rc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            config,
            store,
            clock,
            last_activity: now,
            session_start: None,
            history: Vec::new(),
        }
    }

    /// Deterministic presentation order for `user_id`.
    ///
    /// Logs the first-position distribution of the result for diagnostics.
    #[must_use]
    pub fn assign_order(&self, user_id: &str) -> Vec<usize> {
        let order = assign_order(user_id, self.config.session_count);
        let distribution = order_distribution([order.as_slice()]);
        debug!(user_id, ?order, ?distribution, "assigned session order");
        order
    }

    /// Finalized sessions for the loaded participant, oldest first.
    #[must_use]
    pub fn history(&self) -> &[SessionRecord] {
        &self.history
    }

    /// Aggregates over [`history`](Self::history).
    #[must_use]
    pub fn analytics(&self) -> SessionAnalytics {
        SessionAnalytics::from_history(&self.history)
    }

    /// Last activity signal.
    #[must_use]
    pub const fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Start of the active session, if any.
    #[must_use]
    pub const fn session_start(&self) -> Option<DateTime<Utc>> {
        self.session_start
    }

    /// Load session history for `user_id` from the store.
    ///
    /// A missing or unreadable history leaves the tracker with an empty one.
    pub fn load_history(&mut self, user_id: &str) {
        self.history = match self.read_history(user_id) {
            Ok(Some(history)) => history.sessions,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(user_id, error = %e, "failed to load session history");
                Vec::new()
            }
        };
    }

    fn read_history(&self, user_id: &str) -> Result<Option<SessionHistory>> {
        match self.store.get(&session_history_key(user_id))? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Refresh the activity timestamp.
    pub fn record_activity(&mut self) {
        self.last_activity = self.clock.now();
    }

    /// Open a new session record in `state` and persist it.
    pub fn on_session_start(&mut self, state: &mut ExperimentState, info: SessionStartInfo) {
        let now = self.clock.now();
        let mut session = SessionRecord::new(state.user_id(), info, now);
        session.add_milestone(
            "session_started",
            now,
            fields(json!({ "speedConfig": session.speed_config.clone() })),
        );
        info!(
            user_id = state.user_id(),
            session_id = session.session_id,
            "session started"
        );

        self.session_start = Some(now);
        self.last_activity = now;
        state.current_session = Some(session);
        self.persist_active(state);
    }

    /// Finalize the active session, append it to history and metrics, and
    /// clear active-session state.
    ///
    /// Returns the finalized record, or `None` if no session was active.
    pub fn on_session_end(
        &mut self,
        state: &mut ExperimentState,
        completed: bool,
    ) -> Option<SessionRecord> {
        let now = self.clock.now();
        let mut session = state.current_session.take()?;
        let duration = session.session_time(now);
        session.add_milestone(
            "session_ended",
            now,
            fields(json!({
                "eventCount": session.events.len(),
                "duration": duration,
                "completed": completed,
            })),
        );
        session.finalize(now, completed);
        info!(
            user_id = %session.user_id,
            session_id = session.session_id,
            duration_ms = duration,
            completed,
            "session ended"
        );

        state.metrics.push(SessionMetrics::from_session(&session));
        self.history.push(session.clone());
        self.session_start = None;

        let user_id = state.user_id().to_string();
        if let Err(e) = self.write_history(&user_id, now) {
            warn!(user_id = %user_id, error = %e, "failed to persist session history");
        }
        if let Err(e) = self.store.remove(&session_state_key(&user_id)) {
            warn!(user_id = %user_id, error = %e, "failed to clear saved session state");
        }
        Some(session)
    }

    /// Mark the page as going away without finalizing the session.
    pub fn on_page_suspend(&mut self, state: &mut ExperimentState) {
        let now = self.clock.now();
        let Some(session) = state.current_session.as_mut() else {
            return;
        };
        session.add_milestone(
            "page_unload",
            now,
            fields(json!({ "eventCount": session.events.len() })),
        );
        self.persist_active(state);
    }

    /// Record a tab visibility change. Becoming visible counts as activity.
    pub fn on_visibility_change(&mut self, state: &mut ExperimentState, hidden: bool) {
        let now = self.clock.now();
        if !hidden {
            self.last_activity = now;
        }
        let Some(session) = state.current_session.as_mut() else {
            return;
        };
        let kind = if hidden { "tab_hidden" } else { "tab_visible" };
        session.add_milestone(kind, now, Map::new());
        self.persist_active(state);
    }

    /// Evaluate idle and timeout conditions.
    ///
    /// `idle` is re-emitted on every check while the participant stays
    /// inactive. `timeout` is only evaluated while a session is active.
    #[must_use]
    pub fn check_activity(&self, state: &ExperimentState) -> Vec<Event> {
        let now = self.clock.now();
        let mut events = Vec::new();

        let idle_ms = elapsed_millis(self.last_activity, now);
        if idle_ms > self.config.idle_threshold_ms {
            debug!(idle_ms, "participant idle");
            events.push(Event::Idle {
                idle_time_ms: idle_ms,
            });
        }

        if let (Some(start), true) = (self.session_start, state.has_active_session()) {
            let session_ms = elapsed_millis(start, now);
            if session_ms > self.config.max_session_duration_ms {
                warn!(session_ms, "session exceeded maximum duration");
                events.push(Event::Timeout {
                    session_time_ms: session_ms,
                });
            }
        }
        events
    }

    /// Write the resumable snapshot of the active session.
    ///
    /// Returns false if there is nothing to save or the write failed.
    pub fn persist_active(&self, state: &ExperimentState) -> bool {
        let Some(session) = state.current_session.as_ref() else {
            return false;
        };
        let saved = SavedSessionState {
            user_id: state.user_id().to_string(),
            session: session.clone(),
            last_activity_time: self.last_activity,
            last_saved: self.clock.now(),
        };
        let result = serde_json::to_string(&saved)
            .map_err(crate::Error::from)
            .and_then(|text| self.store.set(&session_state_key(&saved.user_id), &text));
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id = %saved.user_id, error = %e, "failed to persist session state");
                false
            }
        }
    }

    /// Saved session state for `user_id`, if present and fresh.
    ///
    /// Stale or unreadable snapshots are removed and `None` is returned.
    pub fn load_resumable(&self, user_id: &str) -> Option<SavedSessionState> {
        let key = session_state_key(user_id);
        let text = match self.store.get(&key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id, error = %e, "failed to read saved session state");
                return None;
            }
        };
        let saved: SavedSessionState = match serde_json::from_str(&text) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(user_id, error = %e, "discarding unreadable session state");
                self.discard(&key);
                return None;
            }
        };
        if saved.user_id != user_id
            || !saved.is_fresh(self.clock.now(), self.config.resume_window_ms)
        {
            info!(user_id, last_saved = %saved.last_saved, "discarding stale session state");
            self.discard(&key);
            return None;
        }
        Some(saved)
    }

    /// Whether a fresh resumable session exists, without discarding stale ones.
    #[must_use]
    pub fn has_resumable(&self, user_id: &str) -> bool {
        let Ok(Some(text)) = self.store.get(&session_state_key(user_id)) else {
            return false;
        };
        serde_json::from_str::<SavedSessionState>(&text).is_ok_and(|saved| {
            saved.user_id == user_id
                && saved.is_fresh(self.clock.now(), self.config.resume_window_ms)
        })
    }

    /// Reinstate a saved session as the active one.
    pub fn resume(&mut self, state: &mut ExperimentState, saved: SavedSessionState) {
        let now = self.clock.now();
        let mut session = saved.session;
        session.add_milestone(
            "session_resumed",
            now,
            fields(json!({ "lastSaved": saved.last_saved })),
        );
        self.session_start = Some(session.start_time);
        self.last_activity = now;
        state.current_session = Some(session);
        self.persist_active(state);
    }

    /// Align session timing with a session adopted from elsewhere, e.g. a
    /// restored backup.
    pub fn adopt(&mut self, state: &ExperimentState) {
        self.session_start = state.current_session.as_ref().map(|s| s.start_time);
        self.last_activity = self.clock.now();
    }

    /// Forget history and saved state for `user_id`.
    pub fn clear(&mut self, user_id: &str) {
        self.history.clear();
        self.session_start = None;
        for key in [session_history_key(user_id), session_state_key(user_id)] {
            if let Err(e) = self.store.remove(&key) {
                warn!(user_id, key = %key, error = %e, "failed to remove lifecycle data");
            }
        }
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!(key, error = %e, "failed to discard saved session state");
        }
    }

    fn write_history(&self, user_id: &str, now: DateTime<Utc>) -> Result<()> {
        let history = SessionHistory {
            user_id: user_id.to_string(),
            sessions: self.history.clone(),
            last_updated: now,
        };
        let text = serde_json::to_string(&history)?;
        self.store.set(&session_history_key(user_id), &text)
    }
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
