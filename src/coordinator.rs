//! Experiment Coordinator
//!
//! Composition root that owns the shared [`ExperimentState`], the three
//! engines, the timer wheel and the event bus, and exposes the host-facing
//! API.
//!
//! Inbound events enter through [`ExperimentCoordinator::handle`], or
//! through the bus once [`ExperimentCoordinator::attach`] has subscribed the
//! coordinator to the [`Topic::CONSUMED`] topics. Each reaction runs to
//! completion; events it produces (`idle`, `timeout`, `force-end-session`)
//! are published on the bus and then reacted to, in the order produced.
//! Events the host publishes while a reaction is running are queued and
//! handled right after it. Timers fire from [`ExperimentCoordinator::tick`].
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//! use serde_json::json;
//! use session_guard::bus::{Event, LocalBus};
//! use session_guard::clock::ManualClock;
//! use session_guard::config::ExperimentConfig;
//! use session_guard::coordinator::ExperimentCoordinator;
//! use session_guard::experiment::SessionStartInfo;
//! use session_guard::store::MemoryStore;
//! use session_guard::validation::{Action, ProgressPhase};
//!
//! # fn main() -> session_guard::Result<()> {
//! let clock = Rc::new(ManualClock::at_millis(1_700_000_000_000));
//! let mut coordinator = ExperimentCoordinator::new(
//!     ExperimentConfig::default(),
//!     Rc::new(MemoryStore::new()),
//!     Rc::new(LocalBus::new()),
//!     clock.clone(),
//! )?;
//! coordinator.initialize("alice");
//!
//! assert!(coordinator.validate_action(Action::StartSession).allowed);
//! coordinator.handle(Event::SessionStarted(SessionStartInfo::new(1, json!({"speed": 1}))));
//! coordinator.record_event("point_scored", json!({"score": 1}));
//! clock.advance_millis(3 * 60 * 1000);
//! coordinator.handle(Event::SessionEnded);
//!
//! assert_eq!(coordinator.phase(), ProgressPhase::BetweenSessions);
//! assert_eq!(coordinator.state().completed_sessions(), 1);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::backup::{
    codec, BackupKind, BackupRecord, BackupRecoveryEngine, HealthCheck, RecoverySelector,
    RestoreOutcome, Snapshot, StateSaver, StorageHealth, StoreStateSaver,
};
use crate::bus::{Event, EventBus, SubscriptionId, Topic};
use crate::clock::Clock;
use crate::config::ExperimentConfig;
use crate::experiment::{ExperimentState, SessionRecord};
use crate::lifecycle::{SessionAnalytics, SessionLifecycleTracker};
use crate::scheduler::{Scheduler, TimerId, TimerTask, TimerWheel};
use crate::store::DurableStore;
use crate::validation::{
    Action, ActionContext, ActionValidation, ProgressPhase, ValidationEngine, ValidationReport,
};
use crate::Result;

/// A decodable backup included in an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedBackup {
    /// Store key.
    pub key: String,
    /// Backup kind.
    pub kind: BackupKind,
    /// Unix milliseconds at write.
    pub timestamp: i64,
    /// Decoded snapshot.
    pub snapshot: Snapshot,
}

/// Everything known about the active participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentExport {
    /// Export time.
    pub exported_at: DateTime<Utc>,
    /// Phase at export.
    pub phase: ProgressPhase,
    /// Shared state.
    pub state: ExperimentState,
    /// Finalized sessions.
    pub history: Vec<SessionRecord>,
    /// Aggregates over the history.
    pub analytics: SessionAnalytics,
    /// Consistency check result.
    pub validation: ValidationReport,
    /// Backups that could be decoded.
    pub backups: Vec<ExportedBackup>,
    /// Storage usage.
    pub health: StorageHealth,
}

/// Host-facing composition root.
pub struct ExperimentCoordinator {
    config: ExperimentConfig,
    clock: Rc<dyn Clock>,
    store: Rc<dyn DurableStore>,
    bus: Rc<dyn EventBus>,
    scheduler: Box<dyn Scheduler>,
    saver: Box<dyn StateSaver>,
    state: ExperimentState,
    lifecycle: SessionLifecycleTracker,
    validation: ValidationEngine,
    backup: BackupRecoveryEngine,
    activity_timer: Option<TimerId>,
    inbox: Rc<RefCell<VecDeque<Event>>>,
    subscriptions: Vec<SubscriptionId>,
}

impl ExperimentCoordinator {
    /// Wire up the engines.
    ///
    /// State is saved through a [`StoreStateSaver`] on `store` and timers run
    /// on a [`TimerWheel`] until replaced.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if `config` fails validation.
    pub fn new(
        config: ExperimentConfig,
        store: Rc<dyn DurableStore>,
        bus: Rc<dyn EventBus>,
        clock: Rc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let lifecycle =
            SessionLifecycleTracker::new(config.lifecycle.clone(), store.clone(), clock.clone());
        let validation = ValidationEngine::new(
            config.validation.clone(),
            config.lifecycle.session_count,
            clock.clone(),
        );
        let backup = BackupRecoveryEngine::new(
            config.backup.clone(),
            config.storage.clone(),
            store.clone(),
            clock.clone(),
        );
        Ok(Self {
            saver: Box::new(StoreStateSaver::new(store.clone())),
            scheduler: Box::new(TimerWheel::new()),
            config,
            clock,
            store,
            bus,
            state: ExperimentState::default(),
            lifecycle,
            validation,
            backup,
            activity_timer: None,
            inbox: Rc::new(RefCell::new(VecDeque::new())),
            subscriptions: Vec::new(),
        })
    }

    /// Replace the host save hook used after restores and session ends.
    #[must_use]
    pub fn with_saver(mut self, saver: Box<dyn StateSaver>) -> Self {
        self.saver = saver;
        self
    }

    /// Replace the scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Box<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Shared state.
    #[must_use]
    pub const fn state(&self) -> &ExperimentState {
        &self.state
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ProgressPhase {
        self.validation.phase()
    }

    /// Whether [`initialize`](Self::initialize) has run and
    /// [`teardown`](Self::teardown) has not.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.activity_timer.is_some()
    }

    /// Finalized sessions for the participant.
    #[must_use]
    pub fn history(&self) -> &[SessionRecord] {
        self.lifecycle.history()
    }

    /// Aggregates over the session history.
    #[must_use]
    pub fn analytics(&self) -> SessionAnalytics {
        self.lifecycle.analytics()
    }

    /// Load or create state for `user_id`, assign the session order and
    /// start the activity check.
    ///
    /// Previously saved metrics are picked up; an interrupted session is
    /// left for [`resume`](Self::resume).
    pub fn initialize(&mut self, user_id: &str) {
        self.teardown();

        let mut state = self.load_saved_state(user_id).unwrap_or_default();
        state.user_id = Some(user_id.to_string());
        state.current_session = None;
        state.session_order = self.lifecycle.assign_order(user_id);
        self.state = state;

        self.lifecycle.load_history(user_id);
        self.lifecycle.record_activity();
        self.validation.restore_phase(self.idle_phase());

        let period = Duration::milliseconds(self.config.lifecycle.activity_check_interval_ms);
        self.activity_timer = Some(self.scheduler.schedule_repeating(
            TimerTask::ActivityCheck,
            period,
            self.clock.now(),
        ));

        self.save_state();
        self.backup.check_health_and_evict(user_id);
        info!(
            user_id,
            completed = self.state.completed_sessions(),
            phase = self.phase().as_str(),
            "experiment initialized"
        );
    }

    /// Stop every timer.
    pub fn teardown(&mut self) {
        self.backup.cancel_timers(self.scheduler.as_mut());
        self.scheduler.cancel_all();
        self.activity_timer = None;
    }

    /// Subscribe `coordinator` to every [`Topic::CONSUMED`] topic on its bus.
    ///
    /// Handlers hold a weak reference, so dropping the last strong reference
    /// to the coordinator stops delivery. Calling this again replaces the
    /// earlier subscriptions.
    ///
    /// # Panics
    ///
    /// Panics if `coordinator` is already mutably borrowed.
    pub fn attach(coordinator: &Rc<RefCell<Self>>) {
        let mut this = coordinator.borrow_mut();
        this.detach();
        let bus = Rc::clone(&this.bus);
        let subscriptions: Vec<SubscriptionId> = Topic::CONSUMED
            .iter()
            .map(|&topic| {
                let inbox = Rc::clone(&this.inbox);
                let weak = Rc::downgrade(coordinator);
                bus.subscribe(
                    topic,
                    Box::new(move |event: &Event| {
                        inbox.borrow_mut().push_back(event.clone());
                        let Some(strong) = weak.upgrade() else {
                            return;
                        };
                        // a busy coordinator drains the inbox when it finishes
                        let Ok(mut coordinator) = strong.try_borrow_mut() else {
                            return;
                        };
                        coordinator.drain_inbox();
                    }),
                )
            })
            .collect();
        debug!(topics = subscriptions.len(), "coordinator attached to bus");
        this.subscriptions = subscriptions;
    }

    /// Drop the bus subscriptions made by [`attach`](Self::attach).
    pub fn detach(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }

    /// React to an inbound event and to everything it produces.
    pub fn handle(&mut self, event: Event) {
        self.process(event);
        self.drain_inbox();
    }

    fn process(&mut self, event: Event) {
        let produced = self.react(&event);
        self.dispatch(produced);
    }

    fn drain_inbox(&mut self) {
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(event) = next else { break };
            self.process(event);
        }
    }

    /// Fire due timers. Returns the tasks that ran.
    pub fn tick(&mut self) -> Vec<TimerTask> {
        let due = self.scheduler.due(self.clock.now());
        for task in &due {
            match task {
                TimerTask::ActivityCheck => {
                    let produced = self.lifecycle.check_activity(&self.state);
                    self.dispatch(produced);
                }
                TimerTask::PeriodicBackup => {
                    self.backup.on_periodic_tick(&self.state);
                    self.backup.check_health_and_evict(self.state.user_id());
                }
                TimerTask::DebouncedBackup => {
                    self.backup.on_debounce_elapsed(&self.state);
                }
            }
        }
        self.drain_inbox();
        due
    }

    /// Publish produced events and react to them, in order.
    fn dispatch(&mut self, produced: Vec<Event>) {
        let mut queue = VecDeque::from(produced);
        while let Some(event) = queue.pop_front() {
            self.bus.publish(event.clone());
            queue.extend(self.react(&event));
        }
    }

    fn react(&mut self, event: &Event) -> Vec<Event> {
        if !self.is_initialized() {
            warn!(
                topic = event.topic().as_str(),
                "event before initialize ignored"
            );
            return Vec::new();
        }
        debug!(topic = event.topic().as_str(), "handling event");

        match event {
            Event::SessionStarted(info) => {
                if self.state.has_active_session() {
                    warn!(
                        session_id = info.session_id,
                        "session already active, start ignored"
                    );
                    return Vec::new();
                }
                self.lifecycle
                    .on_session_start(&mut self.state, info.clone());
                self.validation.on_session_started();
                self.backup.create_backup(BackupKind::Session, &self.state);
                self.backup.start_periodic(self.scheduler.as_mut());
            }
            Event::SessionEnded => self.end_session(true),
            Event::ForceEndSession { reason } => {
                info!(reason = %reason, "ending session on request");
                self.end_session(false);
            }
            Event::PageSuspend => {
                self.lifecycle.on_page_suspend(&mut self.state);
                self.backup
                    .create_backup(BackupKind::Emergency, &self.state);
            }
            Event::VisibilityChanged { hidden } => {
                self.lifecycle
                    .on_visibility_change(&mut self.state, *hidden);
            }
            Event::Activity => self.lifecycle.record_activity(),
            Event::SignificantEvent { event_type } => {
                self.backup
                    .on_significant_event(event_type, &self.state, self.scheduler.as_mut());
            }
            Event::Timeout { .. } => {
                return self.validation.on_timeout("timeout").into_iter().collect();
            }
            Event::Idle { .. } => {}
        }
        Vec::new()
    }

    fn end_session(&mut self, completed: bool) {
        if self
            .lifecycle
            .on_session_end(&mut self.state, completed)
            .is_none()
        {
            return;
        }
        self.validation
            .on_session_ended(self.state.completed_sessions());
        self.backup.cancel_timers(self.scheduler.as_mut());
        self.backup.create_backup(BackupKind::Session, &self.state);
        self.save_state();
        self.backup.check_health_and_evict(self.state.user_id());
    }

    /// Append an event to the active session and feed the backup triggers.
    ///
    /// Returns false if no session is running.
    pub fn record_event(&mut self, event_type: &str, data: Value) -> bool {
        let now = self.clock.now();
        let Some(session) = self.state.current_session.as_mut() else {
            debug!(event_type, "event outside a session dropped");
            return false;
        };
        session.record_event(event_type, data, now);
        self.lifecycle.record_activity();
        self.handle(Event::SignificantEvent {
            event_type: event_type.to_string(),
        });
        true
    }

    /// Whether `action` is allowed in the current phase.
    #[must_use]
    pub fn can_perform_action(&self, action: Action) -> bool {
        self.validation.can_perform_action(action)
    }

    /// Check the preconditions of `action`.
    #[must_use]
    pub fn validate_action(&self, action: Action) -> ActionValidation {
        let ctx = ActionContext {
            has_resumable_session: self.lifecycle.has_resumable(self.state.user_id()),
            store_available: self.store.is_available(),
        };
        self.validation.validate_action(action, &self.state, ctx)
    }

    /// Run the consistency rules.
    #[must_use]
    pub fn run_validation(&self) -> ValidationReport {
        self.validation.run_validation(&self.state)
    }

    /// Write a backup of `kind` now.
    pub fn create_backup(&self, kind: BackupKind) -> bool {
        self.backup.create_backup(kind, &self.state)
    }

    /// Backups of the active participant, oldest first.
    #[must_use]
    pub fn list_backups(&self) -> Vec<BackupRecord> {
        self.backup.list_backups(self.state.user_id())
    }

    /// Load a snapshot of the active participant.
    #[must_use]
    pub fn recover(&self, selector: &RecoverySelector) -> Option<Snapshot> {
        self.backup.recover(self.state.user_id(), selector)
    }

    /// Apply a snapshot to the shared state.
    ///
    /// The phase, session timing and periodic timer follow whatever was
    /// applied, even when saving it failed. Returns true only if the
    /// restored state was also saved.
    pub fn restore(&mut self, snapshot: Snapshot) -> bool {
        let outcome = self
            .backup
            .restore(snapshot, &mut self.state, self.saver.as_ref());
        if outcome.is_applied() {
            self.align_with_state();
        }
        outcome == RestoreOutcome::Saved
    }

    fn align_with_state(&mut self) {
        self.lifecycle.adopt(&self.state);
        if self.state.has_active_session() {
            self.validation.restore_phase(ProgressPhase::InSession);
            self.backup.start_periodic(self.scheduler.as_mut());
        } else {
            self.validation.restore_phase(self.idle_phase());
            self.backup.cancel_timers(self.scheduler.as_mut());
        }
    }

    /// Recover with `selector` and restore the result.
    pub fn recover_and_restore(&mut self, selector: &RecoverySelector) -> bool {
        self.recover(selector)
            .is_some_and(|snapshot| self.restore(snapshot))
    }

    /// Storage usage.
    #[must_use]
    pub fn health(&self) -> StorageHealth {
        self.backup.health(self.state.user_id())
    }

    /// Measure storage and evict if needed.
    pub fn check_health(&self) -> HealthCheck {
        self.backup.check_health_and_evict(self.state.user_id())
    }

    /// Reinstate a fresh saved session. Returns false if there is none.
    pub fn resume(&mut self) -> bool {
        if self.state.has_active_session() {
            return false;
        }
        let Some(saved) = self.lifecycle.load_resumable(self.state.user_id()) else {
            return false;
        };
        self.lifecycle.resume(&mut self.state, saved);
        self.validation.restore_phase(ProgressPhase::InSession);
        self.backup.start_periodic(self.scheduler.as_mut());
        true
    }

    /// Discard every session and backup of the participant and return to
    /// `pre_session`. The session order is kept.
    pub fn reset_experiment(&mut self) -> ActionValidation {
        let verdict = self.validate_action(Action::ResetExperiment);
        if !verdict.allowed {
            return verdict;
        }
        let user_id = self.state.user_id().to_string();
        self.lifecycle.clear(&user_id);
        self.backup.clear_backups(&user_id);
        self.backup.cancel_timers(self.scheduler.as_mut());
        self.state.metrics.clear();
        self.state.current_session = None;
        self.validation.reset();
        self.save_state();
        info!(user_id = %user_id, "experiment reset");
        verdict
    }

    /// Snapshot of everything, including decodable backups and health.
    #[must_use]
    pub fn export_all(&self) -> ExperimentExport {
        let backups = self
            .list_backups()
            .into_iter()
            .filter_map(|record| {
                let snapshot = codec::decode(&record.payload)
                    .and_then(|value| serde_json::from_value(value).ok())?;
                Some(ExportedBackup {
                    key: record.key,
                    kind: record.kind,
                    timestamp: record.timestamp,
                    snapshot,
                })
            })
            .collect();

        ExperimentExport {
            exported_at: self.clock.now(),
            phase: self.phase(),
            state: self.state.clone(),
            history: self.lifecycle.history().to_vec(),
            analytics: self.lifecycle.analytics(),
            validation: self.run_validation(),
            backups,
            health: self.health(),
        }
    }

    fn idle_phase(&self) -> ProgressPhase {
        let completed = self.state.completed_sessions();
        if completed >= self.config.lifecycle.session_count {
            ProgressPhase::ExperimentComplete
        } else if completed > 0 {
            ProgressPhase::BetweenSessions
        } else {
            ProgressPhase::PreSession
        }
    }

    fn load_saved_state(&self, user_id: &str) -> Option<ExperimentState> {
        let text = match self.store.get(&StoreStateSaver::key(user_id)) {
            Ok(text) => text?,
            Err(e) => {
                warn!(user_id, error = %e, "failed to read saved experiment state");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(user_id, error = %e, "ignoring unreadable experiment state");
                None
            }
        }
    }

    fn save_state(&self) {
        if let Err(e) = self.saver.save_state(&self.state) {
            warn!(user_id = self.state.user_id(), error = %e, "failed to save experiment state");
        }
    }
}
