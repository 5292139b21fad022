//! Experiment configuration
//!
//! Every tunable named by the engines lives here with its production default.
//! Files are TOML; omitted keys keep their defaults.
//!
//! ```toml
//! [lifecycle]
//! session_count = 9
//! idle_threshold_ms = 300000
//!
//! [storage]
//! max_capacity_bytes = 5242880
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Session lifecycle tracking.
    pub lifecycle: LifecycleConfig,
    /// Phase gating and consistency rules.
    pub validation: ValidationConfig,
    /// Backup triggers and snapshot contents.
    pub backup: BackupConfig,
    /// Storage health thresholds and eviction.
    pub storage: StorageConfig,
}

/// Session lifecycle tracking settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Number of configured session variants (length of the session order).
    pub session_count: usize,
    /// Inactivity after which `idle` is emitted.
    pub idle_threshold_ms: i64,
    /// Session length after which `timeout` is emitted.
    pub max_session_duration_ms: i64,
    /// Period of the idle/timeout check.
    pub activity_check_interval_ms: i64,
    /// Saved active-session state older than this is stale.
    pub resume_window_ms: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            session_count: 9,
            idle_threshold_ms: 5 * 60 * 1000,
            max_session_duration_ms: 30 * 60 * 1000,
            activity_check_interval_ms: 30 * 1000,
            resume_window_ms: 60 * 60 * 1000,
        }
    }
}

/// Consistency-rule thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum completed/total ratio before `session_completion_rate` warns.
    pub min_completion_rate: f64,
    /// Lower bound of the average completed-session duration, minutes.
    pub min_avg_duration_minutes: f64,
    /// Upper bound of the average completed-session duration, minutes.
    pub max_avg_duration_minutes: f64,
    /// Active session running this long with zero events is flagged.
    pub empty_session_grace_ms: i64,
    /// Event type whose log count is cross-checked against its summary counter.
    pub tracked_event_type: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_completion_rate: 0.8,
            min_avg_duration_minutes: 2.0,
            max_avg_duration_minutes: 25.0,
            empty_session_grace_ms: 60 * 1000,
            tracked_event_type: "point_scored".to_string(),
        }
    }
}

/// Backup trigger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Period of the periodic backup while a session is active.
    pub periodic_interval_ms: i64,
    /// Window in which bursty triggers collapse into one backup.
    pub debounce_window_ms: i64,
    /// Event types that produce an immediate `event` backup.
    pub immediate_event_types: Vec<String>,
    /// Event types that are debounced into a periodic-style backup.
    pub debounced_event_types: Vec<String>,
    /// Number of recent events carried by an `event` backup.
    pub event_backup_recent_events: usize,
    /// Number of recent events carried by an `emergency` backup.
    pub emergency_recent_events: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            periodic_interval_ms: 2 * 60 * 1000,
            debounce_window_ms: 5 * 1000,
            immediate_event_types: vec!["game_over".to_string(), "session_complete".to_string()],
            debounced_event_types: vec!["point_scored".to_string()],
            event_backup_recent_events: 10,
            emergency_recent_events: 5,
        }
    }
}

/// Storage health and eviction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store capacity used for utilization.
    pub max_capacity_bytes: usize,
    /// Multiplier applied to character counts (two bytes per UTF-16 unit).
    pub bytes_per_char: usize,
    /// Utilization above which status is `warning`.
    pub warning_percent: f64,
    /// Utilization above which status is `critical`.
    pub critical_percent: f64,
    /// Standard cleanup removes backups older than this many days.
    pub retention_days: i64,
    /// Standard cleanup keeps at most this many backups.
    pub max_backups: usize,
    /// Emergency cleanup removes backups older than this many days.
    pub emergency_retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_capacity_bytes: 5 * 1024 * 1024,
            bytes_per_char: 2,
            warning_percent: 70.0,
            critical_percent: 90.0,
            retention_days: 7,
            max_backups: 50,
            emergency_retention_days: 1,
        }
    }
}

impl ExperimentConfig {
    /// Parse a TOML document and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Toml`] on malformed input and [`Error::Config`] if
    /// the values are inconsistent.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`ExperimentConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject values the engines cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let lc = &self.lifecycle;
        if lc.session_count == 0 {
            return Err(invalid("lifecycle.session_count must be greater than zero"));
        }
        for (name, value) in [
            ("lifecycle.idle_threshold_ms", lc.idle_threshold_ms),
            (
                "lifecycle.max_session_duration_ms",
                lc.max_session_duration_ms,
            ),
            (
                "lifecycle.activity_check_interval_ms",
                lc.activity_check_interval_ms,
            ),
            ("lifecycle.resume_window_ms", lc.resume_window_ms),
            (
                "backup.periodic_interval_ms",
                self.backup.periodic_interval_ms,
            ),
            ("backup.debounce_window_ms", self.backup.debounce_window_ms),
        ] {
            if value <= 0 {
                return Err(invalid(&format!("{name} must be greater than zero")));
            }
        }

        let v = &self.validation;
        if v.min_avg_duration_minutes > v.max_avg_duration_minutes {
            return Err(invalid(
                "validation.min_avg_duration_minutes exceeds max_avg_duration_minutes",
            ));
        }
        if !(0.0..=1.0).contains(&v.min_completion_rate) {
            return Err(invalid(
                "validation.min_completion_rate must be within [0, 1]",
            ));
        }

        let s = &self.storage;
        if s.max_capacity_bytes == 0 || s.bytes_per_char == 0 {
            return Err(invalid(
                "storage.max_capacity_bytes and storage.bytes_per_char must be greater than zero",
            ));
        }
        if s.warning_percent >= s.critical_percent {
            return Err(invalid(
                "storage.warning_percent must be below storage.critical_percent",
            ));
        }
        if s.emergency_retention_days > s.retention_days {
            return Err(invalid(
                "storage.emergency_retention_days must not exceed storage.retention_days",
            ));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::Config(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let cfg = ExperimentConfig::default();
        assert_eq!(cfg.lifecycle.session_count, 9);
        assert_eq!(cfg.lifecycle.idle_threshold_ms, 300_000);
        assert_eq!(cfg.lifecycle.max_session_duration_ms, 1_800_000);
        assert_eq!(cfg.backup.periodic_interval_ms, 120_000);
        assert_eq!(cfg.storage.max_backups, 50);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = ExperimentConfig::from_toml_str(
            r#"
            [lifecycle]
            idle_threshold_ms = 1000

            [storage]
            max_backups = 10
            "#,
        )
        .unwrap();

        assert_eq!(cfg.lifecycle.idle_threshold_ms, 1000);
        assert_eq!(cfg.lifecycle.session_count, 9);
        assert_eq!(cfg.storage.max_backups, 10);
        assert_eq!(cfg.storage.retention_days, 7);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = ExperimentConfig::from_toml_str(
            r"
            [storage]
            warning_percent = 95.0
            critical_percent = 90.0
            ",
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("warning_percent")));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cfg = ExperimentConfig::default();
        cfg.backup.debounce_window_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = ExperimentConfig::from_toml_str("[lifecycle\nsession_count = ").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }
}
