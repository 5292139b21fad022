//! Snapshot contents and the stored envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::BackupKind;
use crate::experiment::{ExperimentState, SessionEvent, SessionMetrics};

/// Experiment state captured by a backup.
///
/// Every field is optional: emergency backups carry only the critical
/// subset, and snapshots written by older builds may lack fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Participant.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Unix milliseconds at capture.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Kind of backup that captured this snapshot.
    #[serde(default)]
    pub kind: Option<BackupKind>,
    /// Event type that triggered an event backup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// Presentation order.
    #[serde(default)]
    pub session_order: Option<Vec<usize>>,
    /// Finished-session metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<SessionMetrics>>,
    /// Active session, kept untyped until it passes the structural check.
    #[serde(default)]
    pub current_session: Option<Value>,
    /// Completed-session count at capture.
    #[serde(default)]
    pub completed_sessions: Option<usize>,
    /// Tail of the active session's event log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_events: Option<Vec<SessionEvent>>,
}

impl Snapshot {
    /// Capture everything in `state`.
    #[must_use]
    pub fn full(state: &ExperimentState, kind: BackupKind, timestamp_ms: i64) -> Self {
        Self {
            user_id: state.user_id.clone(),
            timestamp: Some(timestamp_ms),
            kind: Some(kind),
            trigger: None,
            session_order: Some(state.session_order.clone()),
            metrics: Some(state.metrics.clone()),
            current_session: current_session_value(state),
            completed_sessions: Some(state.completed_sessions()),
            recent_events: None,
        }
    }

    /// Capture the critical subset: user, active session, completed count,
    /// order and the last `recent` events.
    #[must_use]
    pub fn minimal(state: &ExperimentState, timestamp_ms: i64, recent: usize) -> Self {
        Self {
            user_id: state.user_id.clone(),
            timestamp: Some(timestamp_ms),
            kind: Some(BackupKind::Emergency),
            trigger: None,
            session_order: Some(state.session_order.clone()),
            metrics: None,
            current_session: current_session_value(state),
            completed_sessions: Some(state.completed_sessions()),
            recent_events: Some(recent_events(state, recent)),
        }
    }

    /// Attach the triggering event type and the last `recent` events.
    #[must_use]
    pub fn with_trigger(mut self, state: &ExperimentState, trigger: &str, recent: usize) -> Self {
        self.trigger = Some(trigger.to_string());
        self.recent_events = Some(recent_events(state, recent));
        self
    }
}

fn current_session_value(state: &ExperimentState) -> Option<Value> {
    state
        .current_session
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok())
}

fn recent_events(state: &ExperimentState, n: usize) -> Vec<SessionEvent> {
    state
        .current_session
        .as_ref()
        .map(|s| s.recent_events(n).to_vec())
        .unwrap_or_default()
}

/// What is written under a backup key: plain metadata plus the encoded
/// snapshot, so listing never has to decode payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBackup {
    /// Backup kind.
    pub kind: BackupKind,
    /// Participant.
    pub user_id: String,
    /// Unix milliseconds at write.
    pub timestamp: i64,
    /// Encoded [`Snapshot`].
    pub payload: String,
}

/// A backup found in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Store key.
    pub key: String,
    /// Backup kind.
    pub kind: BackupKind,
    /// Unix milliseconds at write.
    pub timestamp: i64,
    /// Encoded [`Snapshot`].
    pub payload: String,
}
