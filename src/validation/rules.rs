//! Consistency rules evaluated by [`run_rules`].
//!
//! Each rule returns `Ok(None)` when satisfied, `Ok(Some(message))` when
//! violated, and `Err` when it could not be evaluated. An evaluation failure
//! is reported as an error for that rule regardless of its severity and
//! does not stop the remaining rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::elapsed_millis;
use crate::config::ValidationConfig;
use crate::experiment::ExperimentState;
use crate::lifecycle::is_valid_order;
use crate::{Error, Result};

/// How a violated rule is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Data is inconsistent.
    Error,
    /// Data is suspicious.
    Warning,
}

/// Inputs shared by every rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// Experiment state under check.
    pub state: &'a ExperimentState,
    /// Thresholds.
    pub config: &'a ValidationConfig,
    /// Number of session variants.
    pub session_count: usize,
    /// Evaluation instant.
    pub now: DateTime<Utc>,
}

/// Rule check function.
pub type RuleCheck = fn(&RuleContext<'_>) -> Result<Option<String>>;

/// A named consistency rule.
#[derive(Debug, Clone, Copy)]
pub struct ValidationRule {
    /// Rule name, e.g. `session_order_integrity`.
    pub name: &'static str,
    /// Severity of a violation.
    pub severity: Severity,
    /// The check itself.
    pub check: RuleCheck,
}

/// A violated or failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFinding {
    /// Rule name.
    pub rule: String,
    /// What went wrong.
    pub message: String,
}

/// Aggregate result of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Names of rules that passed.
    pub passed: Vec<String>,
    /// Warning-severity violations.
    pub warnings: Vec<RuleFinding>,
    /// Error-severity violations and evaluation failures.
    pub errors: Vec<RuleFinding>,
}

impl ValidationReport {
    /// Any errors recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Any warnings recorded.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// The fixed, ordered rule list.
pub const RULES: [ValidationRule; 5] = [
    ValidationRule {
        name: "session_order_integrity",
        severity: Severity::Error,
        check: session_order_integrity,
    },
    ValidationRule {
        name: "user_data_consistency",
        severity: Severity::Error,
        check: user_data_consistency,
    },
    ValidationRule {
        name: "session_completion_rate",
        severity: Severity::Warning,
        check: session_completion_rate,
    },
    ValidationRule {
        name: "session_duration_bounds",
        severity: Severity::Warning,
        check: session_duration_bounds,
    },
    ValidationRule {
        name: "metrics_data_quality",
        severity: Severity::Warning,
        check: metrics_data_quality,
    },
];

/// Evaluate `rules` in order against `ctx`.
#[must_use]
pub fn run_rules(rules: &[ValidationRule], ctx: &RuleContext<'_>) -> ValidationReport {
    let mut report = ValidationReport::default();
    for rule in rules {
        let finding = |message: String| RuleFinding {
            rule: rule.name.to_string(),
            message,
        };
        match (rule.check)(ctx) {
            Ok(None) => report.passed.push(rule.name.to_string()),
            Ok(Some(message)) => match rule.severity {
                Severity::Error => report.errors.push(finding(message)),
                Severity::Warning => report.warnings.push(finding(message)),
            },
            Err(e) => {
                warn!(rule = rule.name, error = %e, "validation rule failed to evaluate");
                report.errors.push(finding(e.to_string()));
            }
        }
    }
    report
}

fn session_order_integrity(ctx: &RuleContext<'_>) -> Result<Option<String>> {
    let order = &ctx.state.session_order;
    if is_valid_order(order, ctx.session_count) {
        return Ok(None);
    }
    Ok(Some(format!(
        "Session order {order:?} is not a permutation of 0..{}",
        ctx.session_count
    )))
}

fn user_data_consistency(ctx: &RuleContext<'_>) -> Result<Option<String>> {
    let user_id = ctx.state.user_id();
    if let Some(other) = ctx.state.metrics.iter().find(|m| m.user_id != user_id) {
        return Ok(Some(format!(
            "Session {} belongs to '{}', not '{user_id}'",
            other.session_id, other.user_id
        )));
    }

    let mut ids: Vec<u32> = ctx.state.metrics.iter().map(|m| m.session_id).collect();
    ids.sort_unstable();
    let contiguous = ids
        .iter()
        .zip(1_u32..)
        .all(|(id, expected)| *id == expected);
    if !contiguous {
        return Ok(Some(format!(
            "Session ids {ids:?} are not contiguous from 1"
        )));
    }
    Ok(None)
}

#[allow(clippy::cast_precision_loss)]
fn session_completion_rate(ctx: &RuleContext<'_>) -> Result<Option<String>> {
    let total = ctx.state.metrics.len();
    if total == 0 {
        return Ok(None);
    }
    let rate = ctx.state.completed_sessions() as f64 / total as f64;
    if rate >= ctx.config.min_completion_rate {
        return Ok(None);
    }
    Ok(Some(format!(
        "Completion rate {:.0}% is below {:.0}%",
        rate * 100.0,
        ctx.config.min_completion_rate * 100.0
    )))
}

#[allow(clippy::cast_precision_loss)]
fn session_duration_bounds(ctx: &RuleContext<'_>) -> Result<Option<String>> {
    let mut minutes = Vec::new();
    for m in ctx.state.metrics.iter().filter(|m| m.completed) {
        let duration = m.duration_minutes().ok_or_else(|| Error::Rule {
            rule: "session_duration_bounds".into(),
            reason: format!("completed session {} has no duration", m.session_id),
        })?;
        minutes.push(duration);
    }
    if minutes.is_empty() {
        return Ok(None);
    }

    let average = minutes.iter().sum::<f64>() / minutes.len() as f64;
    let (min, max) = (
        ctx.config.min_avg_duration_minutes,
        ctx.config.max_avg_duration_minutes,
    );
    if (min..=max).contains(&average) {
        return Ok(None);
    }
    Ok(Some(format!(
        "Average session duration {average:.1} min is outside [{min}, {max}]"
    )))
}

fn metrics_data_quality(ctx: &RuleContext<'_>) -> Result<Option<String>> {
    let Some(session) = ctx.state.current_session.as_ref() else {
        return Ok(None);
    };
    let mut issues = Vec::new();

    let running = elapsed_millis(session.start_time, ctx.now);
    if session.events.is_empty() && running > ctx.config.empty_session_grace_ms {
        issues.push(format!("No events recorded after {}s", running / 1000));
    }

    let tracked = &ctx.config.tracked_event_type;
    let logged = session.count_events(tracked) as u64;
    let counted = session.summary.get(tracked).copied().unwrap_or(0);
    if logged != counted {
        issues.push(format!(
            "{tracked} count mismatch: {logged} logged, {counted} in summary"
        ));
    }

    Ok((!issues.is_empty()).then(|| issues.join("; ")))
}
