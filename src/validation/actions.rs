//! Per-action preconditions checked by the host before acting.

use serde::{Deserialize, Serialize};

use super::phase::{Action, PhaseState, ProgressPhase};
use crate::experiment::ExperimentState;

/// Facts about the environment that state alone does not carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionContext {
    /// A fresh saved session exists for the participant.
    pub has_resumable_session: bool,
    /// The durable store is reachable.
    pub store_available: bool,
}

impl Default for ActionContext {
    fn default() -> Self {
        Self {
            has_resumable_session: false,
            store_available: true,
        }
    }
}

/// Outcome of an action precondition check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionValidation {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Reasons the action is denied.
    pub errors: Vec<String>,
    /// Non-blocking concerns.
    pub warnings: Vec<String>,
}

impl ActionValidation {
    fn deny(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn finish(mut self) -> Self {
        self.allowed = self.errors.is_empty();
        self
    }
}

/// Evaluate the preconditions of `action`.
///
/// `start_session`, `end_session`, `export_data` and `reset_experiment`
/// have dedicated checks; every other action falls back to phase gating.
#[must_use]
pub fn validate_action(
    action: Action,
    phase: &PhaseState,
    state: &ExperimentState,
    session_count: usize,
    ctx: ActionContext,
) -> ActionValidation {
    let mut result = ActionValidation::default();
    let completed = state.completed_sessions();
    let in_session = phase.phase == ProgressPhase::InSession;

    match action {
        Action::StartSession => {
            if completed >= session_count {
                result.deny(format!("All {session_count} sessions already completed"));
            }
            if in_session {
                result.deny("A session is already in progress");
            }
            if state.user_id().is_empty() {
                result.deny("No user id set");
            }
            if ctx.has_resumable_session {
                result.warn("A saved session can be resumed");
            }
        }
        Action::EndSession => {
            if in_session {
                let empty = state
                    .current_session
                    .as_ref()
                    .map_or(true, |s| s.events.is_empty());
                if empty {
                    result.warn("Session has no recorded events");
                }
            } else {
                result.deny("No session in progress");
            }
        }
        Action::ExportData => {
            if completed == 0 {
                result.deny("No completed sessions to export");
            }
            if !ctx.store_available {
                result.warn("Durable storage is unavailable");
            }
        }
        Action::ResetExperiment => {
            if in_session {
                result.deny("Cannot reset while a session is in progress");
            }
            let discarded = state.metrics.len();
            if discarded > 0 {
                result.warn(format!("{discarded} session(s) will be discarded"));
            }
        }
        other => {
            if !phase.can_perform(other) {
                result.deny(format!("{other} is not allowed during {}", phase.phase));
            }
        }
    }
    result.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{SessionMetrics, SessionRecord, SessionStartInfo};
    use chrono::DateTime;
    use serde_json::json;

    fn completed_metrics(n: u32) -> Vec<SessionMetrics> {
        (1..=n)
            .map(|session_id| SessionMetrics {
                user_id: "alice".into(),
                session_id,
                speed_config: json!(null),
                duration: Some(300_000),
                event_count: 10,
                summary: Default::default(),
                completed: true,
            })
            .collect()
    }

    fn active_session() -> SessionRecord {
        SessionRecord::new(
            "alice",
            SessionStartInfo::new(1, json!({})),
            DateTime::from_timestamp_millis(0).unwrap(),
        )
    }

    #[test]
    fn test_start_denied_without_user() {
        let result = validate_action(
            Action::StartSession,
            &PhaseState::default(),
            &ExperimentState::default(),
            9,
            ActionContext::default(),
        );
        assert!(!result.allowed);
        assert_eq!(result.errors, vec!["No user id set".to_string()]);
    }

    #[test]
    fn test_start_denied_when_all_completed() {
        let mut state = ExperimentState::for_user("alice");
        state.metrics = completed_metrics(9);
        let result = validate_action(
            Action::StartSession,
            &PhaseState::entering(ProgressPhase::ExperimentComplete),
            &state,
            9,
            ActionContext::default(),
        );
        assert!(!result.allowed);
    }

    #[test]
    fn test_start_warns_on_resumable() {
        let ctx = ActionContext {
            has_resumable_session: true,
            ..ActionContext::default()
        };
        let result = validate_action(
            Action::StartSession,
            &PhaseState::default(),
            &ExperimentState::for_user("alice"),
            9,
            ctx,
        );
        assert!(result.allowed);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_start_denied_in_session() {
        let mut state = ExperimentState::for_user("alice");
        state.current_session = Some(active_session());
        let result = validate_action(
            Action::StartSession,
            &PhaseState::entering(ProgressPhase::InSession),
            &state,
            9,
            ActionContext::default(),
        );
        assert!(!result.allowed);
    }

    #[test]
    fn test_end_with_zero_events_is_warning() {
        let mut state = ExperimentState::for_user("alice");
        state.current_session = Some(active_session());
        let result = validate_action(
            Action::EndSession,
            &PhaseState::entering(ProgressPhase::InSession),
            &state,
            9,
            ActionContext::default(),
        );
        assert!(result.allowed);
        assert!(result.errors.is_empty());
        assert_eq!(
            result.warnings,
            vec!["Session has no recorded events".to_string()]
        );
    }

    #[test]
    fn test_end_denied_outside_session() {
        let result = validate_action(
            Action::EndSession,
            &PhaseState::default(),
            &ExperimentState::for_user("alice"),
            9,
            ActionContext::default(),
        );
        assert!(!result.allowed);
    }

    #[test]
    fn test_export_requires_completed_session() {
        let phase = PhaseState::entering(ProgressPhase::BetweenSessions);
        let ctx = ActionContext {
            store_available: false,
            ..ActionContext::default()
        };
        let mut state = ExperimentState::for_user("alice");

        let denied = validate_action(Action::ExportData, &phase, &state, 9, ctx);
        assert!(!denied.allowed);

        state.metrics = completed_metrics(1);
        let allowed = validate_action(Action::ExportData, &phase, &state, 9, ctx);
        assert!(allowed.allowed);
        assert_eq!(
            allowed.warnings,
            vec!["Durable storage is unavailable".to_string()]
        );
    }

    #[test]
    fn test_reset_reports_discarded_count() {
        let mut state = ExperimentState::for_user("alice");
        state.metrics = completed_metrics(4);
        let result = validate_action(
            Action::ResetExperiment,
            &PhaseState::entering(ProgressPhase::BetweenSessions),
            &state,
            9,
            ActionContext::default(),
        );
        assert!(result.allowed);
        assert_eq!(
            result.warnings,
            vec!["4 session(s) will be discarded".to_string()]
        );

        let in_session = validate_action(
            Action::ResetExperiment,
            &PhaseState::entering(ProgressPhase::InSession),
            &state,
            9,
            ActionContext::default(),
        );
        assert!(!in_session.allowed);
    }

    #[test]
    fn test_other_actions_use_phase_gating() {
        let phase = PhaseState::entering(ProgressPhase::BetweenSessions);
        let state = ExperimentState::for_user("alice");
        let ctx = ActionContext::default();

        assert!(validate_action(Action::StartNextSession, &phase, &state, 9, ctx).allowed);
        assert!(!validate_action(Action::PauseSession, &phase, &state, 9, ctx).allowed);
    }
}
