//! Storage usage and eviction planning.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::key::BackupKind;
use super::snapshot::BackupRecord;
use crate::config::StorageConfig;

/// Utilisation band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// At or below the warning threshold.
    Healthy,
    /// Above the warning threshold.
    Warning,
    /// Above the critical threshold.
    Critical,
    /// Usage could not be measured.
    Error,
}

/// Storage usage snapshot, recomputed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageHealth {
    /// Bytes used by every entry.
    pub total_bytes: usize,
    /// Bytes used by entries belonging to the active participant.
    pub experiment_bytes: usize,
    /// Capacity minus usage.
    pub available_bytes: usize,
    /// Usage as a percentage of capacity.
    pub utilization_percent: f64,
    /// Band derived from `utilization_percent`.
    pub status: HealthStatus,
}

impl StorageHealth {
    /// Health derived from measured usage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn measured(total_bytes: usize, experiment_bytes: usize, config: &StorageConfig) -> Self {
        let utilization_percent = if config.max_capacity_bytes == 0 {
            100.0
        } else {
            total_bytes as f64 / config.max_capacity_bytes as f64 * 100.0
        };
        let status = if utilization_percent > config.critical_percent {
            HealthStatus::Critical
        } else if utilization_percent > config.warning_percent {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        Self {
            total_bytes,
            experiment_bytes,
            available_bytes: config.max_capacity_bytes.saturating_sub(total_bytes),
            utilization_percent,
            status,
        }
    }

    /// Health when the store could not be read.
    #[must_use]
    pub const fn unavailable() -> Self {
        Self {
            total_bytes: 0,
            experiment_bytes: 0,
            available_bytes: 0,
            utilization_percent: 0.0,
            status: HealthStatus::Error,
        }
    }
}

/// Estimated bytes a key/value pair occupies.
#[must_use]
pub const fn entry_bytes(key: &str, value: &str, bytes_per_char: usize) -> usize {
    (key.len() + value.len()) * bytes_per_char
}

/// Keys standard cleanup removes from `backups`, which must be sorted by
/// ascending timestamp.
///
/// Drops everything older than the retention period, then the oldest
/// survivors until at most `max_backups` remain.
#[must_use]
pub fn plan_standard_cleanup(
    backups: &[BackupRecord],
    now: DateTime<Utc>,
    config: &StorageConfig,
) -> Vec<String> {
    let cutoff = cutoff_millis(now, config.retention_days);
    let (expired, kept): (Vec<&BackupRecord>, Vec<&BackupRecord>) =
        backups.iter().partition(|b| b.timestamp < cutoff);

    let excess = kept.len().saturating_sub(config.max_backups);
    expired
        .into_iter()
        .chain(kept.into_iter().take(excess))
        .map(|b| b.key.clone())
        .collect()
}

/// Keys emergency cleanup removes from `backups`: everything older than the
/// emergency retention period plus every periodic backup.
#[must_use]
pub fn plan_emergency_cleanup(
    backups: &[BackupRecord],
    now: DateTime<Utc>,
    config: &StorageConfig,
) -> Vec<String> {
    let cutoff = cutoff_millis(now, config.emergency_retention_days);
    backups
        .iter()
        .filter(|b| b.timestamp < cutoff || b.kind == BackupKind::Periodic)
        .map(|b| b.key.clone())
        .collect()
}

fn cutoff_millis(now: DateTime<Utc>, days: i64) -> i64 {
    (now - Duration::days(days)).timestamp_millis()
}
