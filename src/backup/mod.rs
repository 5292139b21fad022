//! Backup & Recovery Engine
//!
//! Snapshots shared experiment state into the durable store on lifecycle
//! milestones, on a timer while a session runs, and on significant events.
//! Snapshots are encoded by [`codec`], listed and recovered per user, and
//! evicted when storage fills up.
//!
//! ## Triggers
//!
//! | Kind | When | Key |
//! |------|------|-----|
//! | `session` | session start and end | `session_backup_<user>_<ts>` |
//! | `periodic` | every interval while a session runs; end of a debounce window | `periodic_backup_<user>` |
//! | `event` | immediate significant events | `event_backup_<user>_<ts>` |
//! | `emergency` | page suspend | `emergency_backup_<user>` |
//!
//! ## Eviction
//!
//! Above the warning threshold, standard cleanup drops backups past the
//! retention period and then the oldest until at most `max_backups` remain.
//! Above the critical threshold, emergency cleanup drops anything older
//! than a day plus every periodic backup.

pub mod codec;
mod health;
mod key;
mod snapshot;

pub use health::{
    entry_bytes, plan_emergency_cleanup, plan_standard_cleanup, HealthStatus, StorageHealth,
};
pub use key::{BackupKey, BackupKind};
pub use snapshot::{BackupRecord, Snapshot, StoredBackup};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{BackupConfig, StorageConfig};
use crate::experiment::{ExperimentState, SessionRecord};
use crate::scheduler::{Scheduler, TimerId, TimerTask};
use crate::store::DurableStore;
use crate::{Error, Result};

/// Host hook that persists shared state after a restore.
pub trait StateSaver {
    /// Persist `state`.
    fn save_state(&self, state: &ExperimentState) -> Result<()>;
}

/// [`StateSaver`] writing the state as JSON under `experiment_state_<userId>`.
pub struct StoreStateSaver {
    store: Rc<dyn DurableStore>,
}

impl StoreStateSaver {
    /// Saver backed by `store`.
    #[must_use]
    pub fn new(store: Rc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Key the state is saved under.
    #[must_use]
    pub fn key(user_id: &str) -> String {
        format!("experiment_state_{user_id}")
    }
}

impl StateSaver for StoreStateSaver {
    fn save_state(&self, state: &ExperimentState) -> Result<()> {
        let text = serde_json::to_string(state)?;
        self.store.set(&Self::key(state.user_id()), &text)
    }
}

/// Result of [`BackupRecoveryEngine::restore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The snapshot was refused and the state is unchanged.
    Rejected,
    /// The state was updated but the host save hook failed.
    Unsaved,
    /// The state was updated and saved.
    Saved,
}

impl RestoreOutcome {
    /// Whether the snapshot was applied to the state.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Unsaved | Self::Saved)
    }

    /// Whether the restored state reached the host save hook.
    #[must_use]
    pub const fn is_saved(self) -> bool {
        matches!(self, Self::Saved)
    }
}

/// Which backup [`BackupRecoveryEngine::recover`] loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySelector {
    /// Most recent backup.
    Latest,
    /// Oldest backup of a kind.
    Kind(BackupKind),
    /// A specific store key.
    Key(String),
}

/// Result of [`BackupRecoveryEngine::check_health_and_evict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// Health measured before eviction.
    pub health: StorageHealth,
    /// Keys removed by eviction.
    pub evicted: Vec<String>,
}

/// Writes, lists, recovers and evicts backups.
pub struct BackupRecoveryEngine {
    backup: BackupConfig,
    storage: StorageConfig,
    store: Rc<dyn DurableStore>,
    clock: Rc<dyn Clock>,
    periodic_timer: Option<TimerId>,
    debounce_timer: Option<TimerId>,
}

impl BackupRecoveryEngine {
    /// Create an engine with no timers running.
    #[must_use]
    pub fn new(
        backup: BackupConfig,
        storage: StorageConfig,
        store: Rc<dyn DurableStore>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            backup,
            storage,
            store,
            clock,
            periodic_timer: None,
            debounce_timer: None,
        }
    }

    /// Write a backup of `kind` for the active participant.
    ///
    /// Returns false if nothing was written.
    pub fn create_backup(&self, kind: BackupKind, state: &ExperimentState) -> bool {
        self.log_outcome(kind, self.write_backup(kind, state, None))
    }

    /// Write an event backup carrying the triggering event type.
    pub fn create_event_backup(&self, trigger: &str, state: &ExperimentState) -> bool {
        self.log_outcome(
            BackupKind::Event,
            self.write_backup(BackupKind::Event, state, Some(trigger)),
        )
    }

    fn log_outcome(&self, kind: BackupKind, outcome: Result<String>) -> bool {
        match outcome {
            Ok(key) => {
                debug!(kind = kind.as_str(), key = %key, "backup written");
                true
            }
            Err(e) => {
                warn!(kind = kind.as_str(), error = %e, "backup failed");
                false
            }
        }
    }

    fn write_backup(
        &self,
        kind: BackupKind,
        state: &ExperimentState,
        trigger: Option<&str>,
    ) -> Result<String> {
        let user_id = state.user_id();
        if user_id.is_empty() {
            return Err(Error::DataMismatch("no active user".into()));
        }
        if kind == BackupKind::Unknown {
            return Err(Error::Encode(
                "cannot write a backup of unknown kind".into(),
            ));
        }

        let now_ms = self.clock.now().timestamp_millis();
        let mut key = BackupKey::new(kind, user_id, now_ms);
        if kind.is_timestamped() {
            while self.store.contains(&key.to_store_key())? {
                key = key.bumped();
            }
        }
        let timestamp = key.timestamp.unwrap_or(now_ms);

        let snapshot = match kind {
            BackupKind::Emergency => {
                Snapshot::minimal(state, timestamp, self.backup.emergency_recent_events)
            }
            BackupKind::Event => {
                let snapshot = Snapshot::full(state, kind, timestamp);
                match trigger {
                    Some(trigger) => snapshot.with_trigger(
                        state,
                        trigger,
                        self.backup.event_backup_recent_events,
                    ),
                    None => snapshot,
                }
            }
            _ => Snapshot::full(state, kind, timestamp),
        };

        let payload = codec::encode(&serde_json::to_value(&snapshot)?);
        let stored = StoredBackup {
            kind,
            user_id: user_id.to_string(),
            timestamp,
            payload,
        };
        let store_key = key.to_store_key();
        self.store
            .set(&store_key, &serde_json::to_string(&stored)?)?;
        Ok(store_key)
    }

    /// Start the periodic backup timer if it is not already running.
    pub fn start_periodic(&mut self, scheduler: &mut dyn Scheduler) {
        if self
            .periodic_timer
            .is_some_and(|id| scheduler.is_scheduled(id))
        {
            return;
        }
        let period = Duration::milliseconds(self.backup.periodic_interval_ms);
        self.periodic_timer =
            Some(scheduler.schedule_repeating(TimerTask::PeriodicBackup, period, self.clock.now()));
    }

    /// Stop the periodic backup timer.
    pub fn stop_periodic(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(id) = self.periodic_timer.take() {
            scheduler.cancel(id);
        }
    }

    /// Whether the periodic timer is running.
    #[must_use]
    pub const fn is_periodic_running(&self) -> bool {
        self.periodic_timer.is_some()
    }

    /// Periodic timer fired.
    pub fn on_periodic_tick(&self, state: &ExperimentState) -> bool {
        state.has_active_session() && self.create_backup(BackupKind::Periodic, state)
    }

    /// React to a significant in-session event.
    ///
    /// Immediate event types are backed up at once; debounced types
    /// (re)start the debounce window. Returns false for other types.
    pub fn on_significant_event(
        &mut self,
        event_type: &str,
        state: &ExperimentState,
        scheduler: &mut dyn Scheduler,
    ) -> bool {
        if self
            .backup
            .immediate_event_types
            .iter()
            .any(|t| t == event_type)
        {
            return self.create_event_backup(event_type, state);
        }
        if self
            .backup
            .debounced_event_types
            .iter()
            .any(|t| t == event_type)
        {
            if let Some(id) = self.debounce_timer.take() {
                scheduler.cancel(id);
            }
            let window = Duration::milliseconds(self.backup.debounce_window_ms);
            self.debounce_timer =
                Some(scheduler.schedule_once(TimerTask::DebouncedBackup, window, self.clock.now()));
            return true;
        }
        false
    }

    /// Debounce window closed. Nothing is written once the session is over.
    pub fn on_debounce_elapsed(&mut self, state: &ExperimentState) -> bool {
        self.debounce_timer = None;
        state.has_active_session() && self.create_backup(BackupKind::Periodic, state)
    }

    /// Drop a pending debounce window without writing.
    pub fn cancel_debounce(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(id) = self.debounce_timer.take() {
            scheduler.cancel(id);
        }
    }

    /// Cancel every timer this engine owns.
    pub fn cancel_timers(&mut self, scheduler: &mut dyn Scheduler) {
        self.stop_periodic(scheduler);
        self.cancel_debounce(scheduler);
    }

    /// Backups belonging to `user_id`, oldest first.
    #[must_use]
    pub fn list_backups(&self, user_id: &str) -> Vec<BackupRecord> {
        match self.try_list(user_id) {
            Ok(records) => records,
            Err(e) => {
                warn!(user_id, error = %e, "failed to list backups");
                Vec::new()
            }
        }
    }

    fn try_list(&self, user_id: &str) -> Result<Vec<BackupRecord>> {
        let mut records = Vec::new();
        for store_key in self.store.keys()? {
            let Some(key) = BackupKey::parse(&store_key) else {
                continue;
            };
            if key.user_id != user_id {
                continue;
            }
            let Some(value) = self.store.get(&store_key)? else {
                continue;
            };
            records.push(record_from_stored(store_key, &key, value));
        }
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(records)
    }

    /// Load a snapshot for `user_id`.
    #[must_use]
    pub fn recover(&self, user_id: &str, selector: &RecoverySelector) -> Option<Snapshot> {
        let backups = self.list_backups(user_id);
        let record = match selector {
            RecoverySelector::Latest => backups.last(),
            RecoverySelector::Kind(kind) => backups.iter().find(|b| b.kind == *kind),
            RecoverySelector::Key(key) => backups.iter().find(|b| b.key == *key),
        }?;

        let value = codec::decode(&record.payload)?;
        match serde_json::from_value::<Snapshot>(value) {
            Ok(snapshot) => {
                info!(user_id, key = %record.key, "recovered backup");
                Some(snapshot)
            }
            Err(e) => {
                error!(key = %record.key, error = %e, "backup is not a snapshot");
                None
            }
        }
    }

    /// Apply `snapshot` to `state` and persist through `saver`.
    ///
    /// A snapshot for another participant is rejected and `state` is left
    /// untouched. Order and metrics are adopted when present; the active
    /// session only if it passes the structural check. A failed save still
    /// leaves the adopted data in `state` and yields
    /// [`RestoreOutcome::Unsaved`].
    pub fn restore(
        &self,
        snapshot: Snapshot,
        state: &mut ExperimentState,
        saver: &dyn StateSaver,
    ) -> RestoreOutcome {
        let active = state.user_id().to_string();
        if snapshot.user_id.as_deref() != Some(active.as_str()) {
            let e = Error::DataMismatch(format!(
                "snapshot belongs to {:?}, active user is '{active}'",
                snapshot.user_id
            ));
            warn!(error = %e, "restore rejected");
            return RestoreOutcome::Rejected;
        }

        if let Some(order) = snapshot.session_order {
            state.session_order = order;
        }
        if let Some(metrics) = snapshot.metrics {
            state.metrics = metrics;
        }
        if let Some(session) = snapshot.current_session {
            if SessionRecord::is_structurally_valid(&session) {
                match serde_json::from_value::<SessionRecord>(session) {
                    Ok(session) => state.current_session = Some(session),
                    Err(e) => warn!(error = %e, "skipping unreadable session in snapshot"),
                }
            } else {
                warn!(user_id = %active, "skipping structurally invalid session in snapshot");
            }
        }

        match saver.save_state(state) {
            Ok(()) => {
                info!(user_id = %active, "state restored");
                RestoreOutcome::Saved
            }
            Err(e) => {
                warn!(user_id = %active, error = %e, "restored state could not be saved");
                RestoreOutcome::Unsaved
            }
        }
    }

    /// Measure storage usage for `user_id`.
    #[must_use]
    pub fn health(&self, user_id: &str) -> StorageHealth {
        let entries = match self.store.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to measure storage");
                return StorageHealth::unavailable();
            }
        };
        let per_char = self.storage.bytes_per_char;
        let mut total = 0;
        let mut experiment = 0;
        for (key, value) in &entries {
            let bytes = entry_bytes(key, value, per_char);
            total += bytes;
            if !user_id.is_empty() && key.contains(user_id) {
                experiment += bytes;
            }
        }
        StorageHealth::measured(total, experiment, &self.storage)
    }

    /// Measure health and run the cleanup its status calls for.
    pub fn check_health_and_evict(&self, user_id: &str) -> HealthCheck {
        let health = self.health(user_id);
        let evicted = match health.status {
            HealthStatus::Warning => self.standard_cleanup(user_id),
            HealthStatus::Critical => {
                warn!(
                    utilization = health.utilization_percent,
                    "storage critical, running emergency cleanup"
                );
                self.emergency_cleanup(user_id)
            }
            HealthStatus::Healthy | HealthStatus::Error => Vec::new(),
        };
        HealthCheck { health, evicted }
    }

    /// Remove expired and excess backups. Returns removed keys.
    pub fn standard_cleanup(&self, user_id: &str) -> Vec<String> {
        let plan =
            plan_standard_cleanup(&self.list_backups(user_id), self.clock.now(), &self.storage);
        self.remove_all(plan, "standard")
    }

    /// Remove day-old and periodic backups. Returns removed keys.
    pub fn emergency_cleanup(&self, user_id: &str) -> Vec<String> {
        let plan =
            plan_emergency_cleanup(&self.list_backups(user_id), self.clock.now(), &self.storage);
        self.remove_all(plan, "emergency")
    }

    /// Remove every backup of `user_id`.
    pub fn clear_backups(&self, user_id: &str) -> Vec<String> {
        let keys = self
            .list_backups(user_id)
            .into_iter()
            .map(|b| b.key)
            .collect();
        self.remove_all(keys, "reset")
    }

    fn remove_all(&self, keys: Vec<String>, reason: &str) -> Vec<String> {
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.remove(&key) {
                Ok(()) => removed.push(key),
                Err(e) => warn!(key = %key, error = %e, "failed to evict backup"),
            }
        }
        if !removed.is_empty() {
            info!(reason, removed = removed.len(), "evicted backups");
        }
        removed
    }
}

/// Listing entry for a stored value. Values that are not an envelope are
/// treated as a bare encoded snapshot, timestamped from the key or the
/// snapshot itself.
fn record_from_stored(store_key: String, key: &BackupKey, value: String) -> BackupRecord {
    if let Ok(stored) = serde_json::from_str::<StoredBackup>(&value) {
        return BackupRecord {
            key: store_key,
            kind: key.kind,
            timestamp: stored.timestamp,
            payload: stored.payload,
        };
    }
    let timestamp = key.timestamp.unwrap_or_else(|| {
        codec::decode(&value)
            .and_then(|v| v.get("timestamp").and_then(serde_json::Value::as_i64))
            .unwrap_or(0)
    });
    BackupRecord {
        key: store_key,
        kind: key.kind,
        timestamp,
        payload: value,
    }
}
