//! Shared configuration for the sensorlink tools.
//!
//! A TOML file with `[connection]`, `[tracker]` and `[rate]` sections,
//! layered over built-in defaults and under `SENSORLINK_*` environment
//! overrides, then validated and translated into the runtime config types
//! of `sensorlink_core`. Durations are written in milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sensorlink_core::{
    ConnectionPolicy, CoreError, HealthThresholds, RateControllerConfig, RateTable, TrackerConfig,
};

/// Prefix of environment overrides. Nested keys are separated by `__`,
/// e.g. `SENSORLINK_CONNECTION__MAX_RETRY_ATTEMPTS=8`.
pub const ENV_PREFIX: &str = "SENSORLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Qualify a core validation failure with the section it came from.
fn in_section(section: &str, err: CoreError) -> ConfigError {
    match err {
        CoreError::InvalidConfig { field, reason } => ConfigError::Validation {
            field: format!("{section}.{field}"),
            reason,
        },
        other => ConfigError::Validation {
            field: section.to_owned(),
            reason: other.to_string(),
        },
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSection,
    pub tracker: TrackerSection,
    pub rate: RateSection,
}

/// `[connection]`: retry budget, backoff and supervision cadences.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub max_retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub exponential_backoff: bool,
    pub enable_auto_reconnect: bool,
    pub health_check_interval_ms: u64,
    pub connection_timeout_ms: u64,
    pub health_sweep_interval_ms: u64,
    pub degraded_failure_threshold: u32,
    pub health_window_ms: u64,
    pub max_attempt_history: usize,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        let policy = ConnectionPolicy::default();
        Self {
            max_retry_attempts: policy.max_retry_attempts,
            initial_retry_delay_ms: millis(policy.initial_retry_delay),
            max_retry_delay_ms: millis(policy.max_retry_delay),
            exponential_backoff: policy.exponential_backoff,
            enable_auto_reconnect: policy.enable_auto_reconnect,
            health_check_interval_ms: millis(policy.health_check_interval),
            connection_timeout_ms: millis(policy.connection_timeout),
            health_sweep_interval_ms: millis(policy.health_sweep_interval),
            degraded_failure_threshold: policy.degraded_failure_threshold,
            health_window_ms: millis(policy.health_window),
            max_attempt_history: policy.max_attempt_history,
        }
    }
}

/// `[tracker]`: monitoring cadences and silence thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerSection {
    pub liveness_interval_ms: u64,
    pub health_sweep_interval_ms: u64,
    pub thresholds: ThresholdsSection,
}

impl Default for TrackerSection {
    fn default() -> Self {
        let tracker = TrackerConfig::default();
        Self {
            liveness_interval_ms: millis(tracker.liveness_interval),
            health_sweep_interval_ms: millis(tracker.health_sweep_interval),
            thresholds: ThresholdsSection::default(),
        }
    }
}

/// `[tracker.thresholds]`: silence upper bounds per grade.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThresholdsSection {
    pub good_ms: u64,
    pub fair_ms: u64,
    pub poor_ms: u64,
    pub critical_ms: u64,
}

impl Default for ThresholdsSection {
    fn default() -> Self {
        let thresholds = HealthThresholds::default();
        Self {
            good_ms: millis(thresholds.good),
            fair_ms: millis(thresholds.fair),
            poor_ms: millis(thresholds.poor),
            critical_ms: millis(thresholds.critical),
        }
    }
}

/// `[rate]`: rate bounds, adaptation gates and the quality rate table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateSection {
    pub min_rate: f64,
    pub max_rate: f64,
    pub adaptation_delay_ms: u64,
    pub hysteresis_threshold: u8,
    pub stability_window: usize,
    /// Frames per second for quality scores 1 through 5.
    pub rate_table: [f64; 5],
    pub default_quality: u8,
}

impl Default for RateSection {
    fn default() -> Self {
        let rate = RateControllerConfig::default();
        Self {
            min_rate: rate.min_rate,
            max_rate: rate.max_rate,
            adaptation_delay_ms: millis(rate.adaptation_delay),
            hysteresis_threshold: rate.hysteresis_threshold,
            stability_window: rate.stability_window,
            rate_table: *rate.rate_table.rates(),
            default_quality: rate.default_quality,
        }
    }
}

// ── Translation to runtime config ───────────────────────────────────

impl Config {
    pub fn connection_policy(&self) -> Result<ConnectionPolicy, ConfigError> {
        let c = &self.connection;
        let policy = ConnectionPolicy {
            max_retry_attempts: c.max_retry_attempts,
            initial_retry_delay: Duration::from_millis(c.initial_retry_delay_ms),
            max_retry_delay: Duration::from_millis(c.max_retry_delay_ms),
            exponential_backoff: c.exponential_backoff,
            enable_auto_reconnect: c.enable_auto_reconnect,
            health_check_interval: Duration::from_millis(c.health_check_interval_ms),
            connection_timeout: Duration::from_millis(c.connection_timeout_ms),
            health_sweep_interval: Duration::from_millis(c.health_sweep_interval_ms),
            degraded_failure_threshold: c.degraded_failure_threshold,
            health_window: Duration::from_millis(c.health_window_ms),
            max_attempt_history: c.max_attempt_history,
        };
        policy
            .validate()
            .map_err(|e| in_section("connection", e))?;
        Ok(policy)
    }

    pub fn tracker_config(&self) -> Result<TrackerConfig, ConfigError> {
        let t = &self.tracker;
        let config = TrackerConfig {
            liveness_interval: Duration::from_millis(t.liveness_interval_ms),
            health_sweep_interval: Duration::from_millis(t.health_sweep_interval_ms),
            thresholds: HealthThresholds {
                good: Duration::from_millis(t.thresholds.good_ms),
                fair: Duration::from_millis(t.thresholds.fair_ms),
                poor: Duration::from_millis(t.thresholds.poor_ms),
                critical: Duration::from_millis(t.thresholds.critical_ms),
            },
        };
        config.validate().map_err(|e| in_section("tracker", e))?;
        Ok(config)
    }

    pub fn rate_controller_config(&self) -> Result<RateControllerConfig, ConfigError> {
        let r = &self.rate;
        let config = RateControllerConfig {
            min_rate: r.min_rate,
            max_rate: r.max_rate,
            adaptation_delay: Duration::from_millis(r.adaptation_delay_ms),
            hysteresis_threshold: r.hysteresis_threshold,
            stability_window: r.stability_window,
            rate_table: RateTable::new(r.rate_table),
            default_quality: r.default_quality,
        };
        config.validate().map_err(|e| in_section("rate", e))?;
        Ok(config)
    }

    /// Validate every section without keeping the results.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection_policy()?;
        self.tracker_config()?;
        self.rate_controller_config()?;
        Ok(())
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "sensorlink", "sensorlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("sensorlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// The provider stack: defaults, then the TOML file at `path` (or the
/// platform path), then the environment. A missing file is not an error.
pub fn figment(path: Option<&Path>) -> Figment {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load and validate the full Config from file + environment.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent
/// directories as needed.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}
