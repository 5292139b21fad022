//! Progress phase state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Stage of the experiment that gates which actions are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    /// Before the first session, or after a reset.
    PreSession,
    /// A session is running.
    InSession,
    /// Between two sessions.
    BetweenSessions,
    /// Every session has been completed.
    ExperimentComplete,
}

impl ProgressPhase {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreSession => "pre_session",
            Self::InSession => "in_session",
            Self::BetweenSessions => "between_sessions",
            Self::ExperimentComplete => "experiment_complete",
        }
    }

    /// Actions permitted on entry to this phase.
    #[must_use]
    pub fn allowed_actions(self) -> Vec<Action> {
        use Action as A;
        match self {
            Self::PreSession => vec![A::StartSession],
            Self::InSession => vec![A::EndSession, A::PauseSession],
            Self::BetweenSessions => vec![A::StartNextSession, A::ExportPartialData],
            Self::ExperimentComplete => vec![A::ExportData, A::ResetExperiment],
        }
    }

    /// Restrictions applied on entry to this phase.
    #[must_use]
    pub fn entry_restrictions(self) -> Vec<Restriction> {
        use Action as A;
        match self {
            Self::PreSession | Self::BetweenSessions => Vec::new(),
            Self::InSession => vec![
                Restriction::Action(A::StartNewSession),
                Restriction::Action(A::ChangeUser),
            ],
            Self::ExperimentComplete => vec![Restriction::Action(A::StartSession)],
        }
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host action subject to gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Begin the first (or a resumed) session.
    StartSession,
    /// Finish the running session.
    EndSession,
    /// Pause the running session.
    PauseSession,
    /// Start another session while one is running.
    StartNewSession,
    /// Switch participant.
    ChangeUser,
    /// Begin the next session after a break.
    StartNextSession,
    /// Export data before the experiment is complete.
    ExportPartialData,
    /// Export the full data set.
    ExportData,
    /// Discard all sessions and start over.
    ResetExperiment,
}

impl Action {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartSession => "start_session",
            Self::EndSession => "end_session",
            Self::PauseSession => "pause_session",
            Self::StartNewSession => "start_new_session",
            Self::ChangeUser => "change_user",
            Self::StartNextSession => "start_next_session",
            Self::ExportPartialData => "export_partial_data",
            Self::ExportData => "export_data",
            Self::ResetExperiment => "reset_experiment",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the current phase forbids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    /// A specific action is blocked.
    Action(Action),
    /// The session was forcibly ended, e.g. `forced_end_timeout`.
    ForcedEnd(String),
}

impl Restriction {
    /// Whether this restriction blocks `action`.
    #[must_use]
    pub fn blocks(&self, action: Action) -> bool {
        matches!(self, Self::Action(a) if *a == action)
    }
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(action) => f.write_str(action.as_str()),
            Self::ForcedEnd(reason) => write!(f, "forced_end_{reason}"),
        }
    }
}

/// Current phase with its gating lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    /// Current phase.
    pub phase: ProgressPhase,
    /// Actions allowed in this phase.
    pub allowed_actions: Vec<Action>,
    /// Active restrictions.
    pub restrictions: Vec<Restriction>,
    /// Warnings raised since entering the phase.
    pub warnings: Vec<String>,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self::entering(ProgressPhase::PreSession)
    }
}

impl PhaseState {
    /// Fresh state on entry to `phase`.
    #[must_use]
    pub fn entering(phase: ProgressPhase) -> Self {
        Self {
            phase,
            allowed_actions: phase.allowed_actions(),
            restrictions: phase.entry_restrictions(),
            warnings: Vec::new(),
        }
    }

    /// Move to `next`, resetting the gating lists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for an edge the machine does not have.
    pub fn transition(&mut self, next: ProgressPhase) -> Result<()> {
        validate_transition(self.phase, next)?;
        *self = Self::entering(next);
        Ok(())
    }

    /// Allowed and not restricted.
    #[must_use]
    pub fn can_perform(&self, action: Action) -> bool {
        self.allowed_actions.contains(&action)
            && !self.restrictions.iter().any(|r| r.blocks(action))
    }

    /// Add a restriction unless it is already present.
    pub fn restrict(&mut self, restriction: Restriction) {
        if !self.restrictions.contains(&restriction) {
            self.restrictions.push(restriction);
        }
    }
}

/// Check that `from -> to` is an edge of the phase machine.
///
/// Any phase may return to `pre_session` through a reset.
///
/// # Errors
///
/// Returns [`Error::InvalidTransition`] otherwise.
pub fn validate_transition(from: ProgressPhase, to: ProgressPhase) -> Result<()> {
    use ProgressPhase as P;

    let allowed = match from {
        P::PreSession => matches!(to, P::InSession | P::PreSession),
        P::InSession => matches!(
            to,
            P::BetweenSessions | P::ExperimentComplete | P::PreSession
        ),
        P::BetweenSessions => matches!(to, P::InSession | P::PreSession),
        P::ExperimentComplete => matches!(to, P::PreSession),
    };

    if !allowed {
        return Err(Error::InvalidTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }
    Ok(())
}
