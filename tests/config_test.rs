//! Tests for loading configuration from disk

use session_guard::config::ExperimentConfig;
use session_guard::Error;
use std::io::Write;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[lifecycle]
session_count = 6
idle_threshold_ms = 120000

[backup]
immediate_event_types = ["level_complete"]

[storage]
max_capacity_bytes = 1048576
"#
    )
    .unwrap();

    let config = ExperimentConfig::load(file.path()).unwrap();

    assert_eq!(config.lifecycle.session_count, 6);
    assert_eq!(config.lifecycle.idle_threshold_ms, 120_000);
    assert_eq!(config.lifecycle.max_session_duration_ms, 1_800_000);
    assert_eq!(
        config.backup.immediate_event_types,
        vec!["level_complete".to_string()]
    );
    assert_eq!(
        config.backup.debounced_event_types,
        vec!["point_scored".to_string()]
    );
    assert_eq!(config.storage.max_capacity_bytes, 1_048_576);
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("experiment.toml");
    std::fs::write(
        &path,
        "[storage]\nwarning_percent = 95.0\ncritical_percent = 90.0\n",
    )
    .unwrap();

    let error = ExperimentConfig::load(&path).unwrap_err();
    assert!(matches!(error, Error::Config(ref msg) if msg.contains("warning_percent")));
}

#[test]
fn test_empty_file_is_all_defaults() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let config = ExperimentConfig::load(file.path()).unwrap();
    assert_eq!(config, ExperimentConfig::default());
}
