//! Experiment State - the shared context every engine reads and mutates

use serde::{Deserialize, Serialize};

use super::{SessionMetrics, SessionRecord};

/// Shared experiment state.
///
/// Owned by the host application and passed by `&mut` into each engine
/// operation; no engine keeps a copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentState {
    /// Active participant, if one has been set.
    pub user_id: Option<String>,
    /// Presentation order of the session variants.
    pub session_order: Vec<usize>,
    /// Metrics for every finished session, in order.
    pub metrics: Vec<SessionMetrics>,
    /// Session in progress.
    pub current_session: Option<SessionRecord>,
}

impl ExperimentState {
    /// State for a participant with no sessions yet.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Active user id, or `""` when unset.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or_default()
    }

    /// Number of sessions that ran to a normal end.
    #[must_use]
    pub fn completed_sessions(&self) -> usize {
        self.metrics.iter().filter(|m| m.completed).count()
    }

    /// Whether a session is in progress.
    #[must_use]
    pub const fn has_active_session(&self) -> bool {
        self.current_session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics(session_id: u32, completed: bool) -> SessionMetrics {
        SessionMetrics {
            user_id: "alice".into(),
            session_id,
            speed_config: json!(null),
            duration: Some(1),
            event_count: 0,
            summary: Default::default(),
            completed,
        }
    }

    #[test]
    fn test_completed_sessions_counts_only_completed() {
        let mut state = ExperimentState::for_user("alice");
        state.metrics.push(metrics(1, true));
        state.metrics.push(metrics(2, false));
        state.metrics.push(metrics(3, true));

        assert_eq!(state.completed_sessions(), 2);
        assert_eq!(state.user_id(), "alice");
        assert!(!state.has_active_session());
    }

    #[test]
    fn test_default_has_no_user() {
        assert_eq!(ExperimentState::default().user_id(), "");
    }
}
