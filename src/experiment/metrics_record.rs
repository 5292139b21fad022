//! Session Metrics - per-session summary kept in experiment state

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::SessionRecord;

/// Summary of one finished session.
///
/// Appended to [`ExperimentState::metrics`](super::ExperimentState) when a
/// session ends; the consistency rules and completion counting read these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Participant the session belongs to.
    pub user_id: String,
    /// One-based session number.
    pub session_id: u32,
    /// Variant configuration.
    pub speed_config: Value,
    /// Duration in milliseconds, if the session was finalized.
    #[serde(default)]
    pub duration: Option<i64>,
    /// Number of recorded events.
    pub event_count: usize,
    /// Per-type event counters.
    #[serde(default)]
    pub summary: BTreeMap<String, u64>,
    /// Whether the session ran to a normal end.
    pub completed: bool,
}

impl SessionMetrics {
    /// Derive metrics from a finalized session record.
    #[must_use]
    pub fn from_session(session: &SessionRecord) -> Self {
        Self {
            user_id: session.user_id.clone(),
            session_id: session.session_id,
            speed_config: session.speed_config.clone(),
            duration: session.duration,
            event_count: session.events.len(),
            summary: session.summary.clone(),
            completed: session.completed,
        }
    }

    /// Duration in minutes, if known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_minutes(&self) -> Option<f64> {
        self.duration.map(|ms| ms as f64 / 60_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::SessionStartInfo;
    use chrono::DateTime;
    use serde_json::json;

    #[test]
    fn test_from_finalized_session() {
        let start = DateTime::from_timestamp_millis(0).unwrap();
        let end = DateTime::from_timestamp_millis(180_000).unwrap();
        let mut session =
            SessionRecord::new("alice", SessionStartInfo::new(3, json!("slow")), start);
        session.record_event("point_scored", json!({}), start);
        session.finalize(end, true);

        let metrics = SessionMetrics::from_session(&session);

        assert_eq!(metrics.session_id, 3);
        assert_eq!(metrics.event_count, 1);
        assert_eq!(metrics.duration_minutes(), Some(3.0));
        assert!(metrics.completed);
    }
}
