//! Validation Engine
//!
//! Gates host actions through the progress phase machine and checks the
//! shared experiment state against a fixed list of consistency rules.
//!
//! | Phase | Entered on | Allowed | Restricted |
//! |-------|------------|---------|------------|
//! | `pre_session` | init, reset | `start_session` | |
//! | `in_session` | session start | `end_session`, `pause_session` | `start_new_session`, `change_user` |
//! | `between_sessions` | session end, sessions left | `start_next_session`, `export_partial_data` | |
//! | `experiment_complete` | session end, all done | `export_data`, `reset_experiment` | `start_session` |

mod actions;
mod phase;
mod rules;

pub use actions::{validate_action, ActionContext, ActionValidation};
pub use phase::{validate_transition, Action, PhaseState, ProgressPhase, Restriction};
pub use rules::{
    run_rules, RuleCheck, RuleContext, RuleFinding, Severity, ValidationReport, ValidationRule,
    RULES,
};

use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::bus::Event;
use crate::clock::Clock;
use crate::config::ValidationConfig;
use crate::experiment::ExperimentState;

/// Phase machine plus rule checker.
pub struct ValidationEngine {
    config: ValidationConfig,
    session_count: usize,
    clock: Rc<dyn Clock>,
    phase: PhaseState,
}

impl ValidationEngine {
    /// Create an engine in `pre_session`.
    #[must_use]
    pub fn new(config: ValidationConfig, session_count: usize, clock: Rc<dyn Clock>) -> Self {
        Self {
            config,
            session_count,
            clock,
            phase: PhaseState::default(),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ProgressPhase {
        self.phase.phase
    }

    /// Current phase with its gating lists.
    #[must_use]
    pub const fn phase_state(&self) -> &PhaseState {
        &self.phase
    }

    /// Whether `action` is allowed and not restricted in the current phase.
    #[must_use]
    pub fn can_perform_action(&self, action: Action) -> bool {
        self.phase.can_perform(action)
    }

    /// Check the preconditions of `action` against `state`.
    #[must_use]
    pub fn validate_action(
        &self,
        action: Action,
        state: &ExperimentState,
        ctx: ActionContext,
    ) -> ActionValidation {
        let result = validate_action(action, &self.phase, state, self.session_count, ctx);
        debug!(
            action = action.as_str(),
            phase = self.phase.phase.as_str(),
            allowed = result.allowed,
            "validated action"
        );
        result
    }

    /// React to a session starting.
    pub fn on_session_started(&mut self) {
        self.enter(ProgressPhase::InSession);
    }

    /// React to a session ending with `completed` sessions done so far.
    pub fn on_session_ended(&mut self, completed: usize) {
        let next = if completed >= self.session_count {
            ProgressPhase::ExperimentComplete
        } else {
            ProgressPhase::BetweenSessions
        };
        self.enter(next);
    }

    /// Restrict the running session after a timeout and ask the host to
    /// end it.
    ///
    /// Returns `None` if no session is running.
    pub fn on_timeout(&mut self, reason: &str) -> Option<Event> {
        if self.phase.phase != ProgressPhase::InSession {
            return None;
        }
        self.phase
            .restrict(Restriction::ForcedEnd(reason.to_string()));
        self.phase.warnings.push(format!("Session ended: {reason}"));
        warn!(reason, "forcing session end");
        Some(Event::ForceEndSession {
            reason: reason.to_string(),
        })
    }

    /// Evaluate every consistency rule against `state`.
    #[must_use]
    pub fn run_validation(&self, state: &ExperimentState) -> ValidationReport {
        let ctx = RuleContext {
            state,
            config: &self.config,
            session_count: self.session_count,
            now: self.clock.now(),
        };
        let report = run_rules(&RULES, &ctx);
        info!(
            passed = report.passed.len(),
            warnings = report.warnings.len(),
            errors = report.errors.len(),
            "validation complete"
        );
        report
    }

    /// Return to `pre_session`.
    pub fn reset(&mut self) {
        self.enter(ProgressPhase::PreSession);
    }

    /// Jump straight to `phase`, e.g. after restoring saved state.
    pub fn restore_phase(&mut self, phase: ProgressPhase) {
        self.phase = PhaseState::entering(phase);
    }

    fn enter(&mut self, next: ProgressPhase) {
        let from = self.phase.phase;
        match self.phase.transition(next) {
            Ok(()) => debug!(from = from.as_str(), to = next.as_str(), "phase changed"),
            Err(e) => warn!(error = %e, "ignored phase change"),
        }
    }
}
