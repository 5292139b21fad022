//! Aggregates over session history.

use serde::{Deserialize, Serialize};

use crate::experiment::SessionRecord;

/// Summary of a participant's finalized sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalytics {
    /// Sessions in history.
    pub total_sessions: usize,
    /// Sessions that ran to a normal end.
    pub completed_sessions: usize,
    /// Sessions that were cut short.
    pub incomplete_sessions: usize,
    /// Mean duration of completed sessions in milliseconds (0 if none).
    pub average_duration: f64,
    /// Events recorded across all sessions.
    pub total_events: usize,
}

impl SessionAnalytics {
    /// Derive analytics from history.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_history(sessions: &[SessionRecord]) -> Self {
        let completed: Vec<&SessionRecord> = sessions.iter().filter(|s| s.completed).collect();
        let total_duration: i64 = completed.iter().filter_map(|s| s.duration).sum();
        let average_duration = if completed.is_empty() {
            0.0
        } else {
            total_duration as f64 / completed.len() as f64
        };

        Self {
            total_sessions: sessions.len(),
            completed_sessions: completed.len(),
            incomplete_sessions: sessions.len() - completed.len(),
            average_duration,
            total_events: sessions.iter().map(|s| s.events.len()).sum(),
        }
    }
}
