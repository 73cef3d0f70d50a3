#![allow(clippy::unwrap_used)]
// Loading, layering and saving of the sensorlink config file.

use std::time::Duration;

use pretty_assertions::assert_eq;
use sensorlink_config::{Config, ConfigError, load_config, save_config_to};

// ── Helpers ─────────────────────────────────────────────────────────

fn write(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

// ── File layering ───────────────────────────────────────────────────

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_file_overrides_selected_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        &dir,
        r#"
[connection]
max_retry_attempts = 8
exponential_backoff = false

[tracker.thresholds]
good_ms = 1000

[rate]
rate_table = [1.0, 2.0, 3.0, 4.0, 6.0]
"#,
    );

    let config = load_config(Some(&path)).unwrap();
    let policy = config.connection_policy().unwrap();
    assert_eq!(policy.max_retry_attempts, 8);
    assert!(!policy.exponential_backoff);
    assert_eq!(policy.initial_retry_delay, Duration::from_millis(2_000));

    let tracker = config.tracker_config().unwrap();
    assert_eq!(tracker.thresholds.good, Duration::from_millis(1_000));
    assert_eq!(tracker.thresholds.fair, Duration::from_millis(5_000));

    let rate = config.rate_controller_config().unwrap();
    assert!((rate.initial_rate() - 3.0).abs() < f64::EPSILON);
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "[rate]\nrate_table = [5.0, 4.0, 3.0, 2.0, 1.0]\n");

    let err = load_config(Some(&path)).unwrap_err();
    assert!(
        matches!(&err, ConfigError::Validation { field, .. } if field == "rate.rate_table"),
        "got {err:?}"
    );
}

#[test]
fn test_zero_attempts_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "[connection]\nmax_retry_attempts = 0\n");

    let err = load_config(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("connection.max_retry_attempts"));
}

#[test]
fn test_malformed_toml_is_a_figment_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(&dir, "[connection\nmax_retry_attempts = ");

    let err = load_config(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Figment(_)), "got {err:?}");
}

// ── Saving ──────────────────────────────────────────────────────────

#[test]
fn test_saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.connection.max_retry_attempts = 3;
    config.rate.stability_window = 5;
    save_config_to(&config, &path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[connection]"));
    assert!(text.contains("[tracker.thresholds]"));
    assert_eq!(load_config(Some(&path)).unwrap(), config);
}
