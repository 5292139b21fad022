//! Store layout for lifecycle data.
//!
//! - `session_state_<userId>`: resumable active-session snapshot
//! - `session_history_<userId>`: finalized sessions, append-only

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::SessionRecord;

/// Key of the resumable active-session snapshot.
#[must_use]
pub fn session_state_key(user_id: &str) -> String {
    format!("session_state_{user_id}")
}

/// Key of the finalized-session history.
#[must_use]
pub fn session_history_key(user_id: &str) -> String {
    format!("session_history_{user_id}")
}

/// Active-session state written on every milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSessionState {
    /// Participant.
    pub user_id: String,
    /// Session as of the last save.
    pub session: SessionRecord,
    /// Last participant activity.
    pub last_activity_time: DateTime<Utc>,
    /// When this snapshot was written.
    pub last_saved: DateTime<Utc>,
}

impl SavedSessionState {
    /// Whether the snapshot is recent enough to resume at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, window_ms: i64) -> bool {
        (now - self.last_saved).num_milliseconds() <= window_ms
    }
}

/// Finalized sessions for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    /// Participant.
    pub user_id: String,
    /// Finalized sessions, oldest first.
    pub sessions: Vec<SessionRecord>,
    /// When the history was last written.
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::SessionStartInfo;
    use serde_json::json;

    #[test]
    fn test_keys_are_namespaced_by_user() {
        assert_eq!(session_state_key("alice"), "session_state_alice");
        assert_eq!(session_history_key("alice"), "session_history_alice");
    }

    #[test]
    fn test_freshness_window_is_inclusive() {
        let saved_at = DateTime::from_timestamp_millis(0).unwrap();
        let state = SavedSessionState {
            user_id: "alice".into(),
            session: SessionRecord::new("alice", SessionStartInfo::new(1, json!({})), saved_at),
            last_activity_time: saved_at,
            last_saved: saved_at,
        };
        let hour = 3_600_000;

        assert!(state.is_fresh(DateTime::from_timestamp_millis(hour).unwrap(), hour));
        assert!(!state.is_fresh(DateTime::from_timestamp_millis(hour + 1).unwrap(), hour));
    }
}
