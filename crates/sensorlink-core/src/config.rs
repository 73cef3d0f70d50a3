// ── Runtime tuning ──
//
// These types describe *how* the three components behave: retry budget,
// sweep cadences, silence thresholds and rate adaptation gates. They never
// touch disk. sensorlink-config builds them from layered files and env
// vars and hands them in.

use std::time::Duration;

use crate::error::CoreError;
use crate::model::CommunicationHealth;
use crate::rate::RateTable;

// ── ConnectionPolicy ─────────────────────────────────────────────────

/// Retry, backoff and supervision tuning for the [`ConnectionManager`].
///
/// [`ConnectionManager`]: crate::ConnectionManager
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionPolicy {
    /// Upper bound on connect calls per retry sequence.
    pub max_retry_attempts: u32,
    /// Delay before the second attempt.
    pub initial_retry_delay: Duration,
    /// Ceiling for any single backoff delay.
    pub max_retry_delay: Duration,
    /// Grow the delay by half after every failure. Constant delay otherwise.
    pub exponential_backoff: bool,
    pub enable_auto_reconnect: bool,
    /// Cadence of per-device supervision loops.
    pub health_check_interval: Duration,
    /// Budget for a single connect call.
    pub connection_timeout: Duration,
    /// Cadence of the manager-wide health sweep.
    pub health_sweep_interval: Duration,
    /// Consecutive failures at which a monitored device counts as degraded.
    pub degraded_failure_threshold: u32,
    /// Attempts older than this are ignored when deriving health.
    pub health_window: Duration,
    /// Per-device cap on retained attempt records.
    pub max_attempt_history: usize,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: 5,
            initial_retry_delay: Duration::from_millis(2_000),
            max_retry_delay: Duration::from_millis(30_000),
            exponential_backoff: true,
            enable_auto_reconnect: true,
            health_check_interval: Duration::from_millis(10_000),
            connection_timeout: Duration::from_millis(30_000),
            health_sweep_interval: Duration::from_millis(30_000),
            degraded_failure_threshold: 3,
            health_window: Duration::from_secs(300),
            max_attempt_history: 256,
        }
    }
}

impl ConnectionPolicy {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_retry_attempts == 0 {
            return Err(CoreError::invalid_config(
                "max_retry_attempts",
                "must allow at least one attempt",
            ));
        }
        if self.initial_retry_delay > self.max_retry_delay {
            return Err(CoreError::invalid_config(
                "initial_retry_delay",
                "must not exceed max_retry_delay",
            ));
        }
        require_non_zero("health_check_interval", self.health_check_interval)?;
        require_non_zero("connection_timeout", self.connection_timeout)?;
        require_non_zero("health_sweep_interval", self.health_sweep_interval)?;
        require_non_zero("health_window", self.health_window)?;
        if self.max_attempt_history == 0 {
            return Err(CoreError::invalid_config(
                "max_attempt_history",
                "must retain at least one attempt",
            ));
        }
        Ok(())
    }
}

// ── Tracker ──────────────────────────────────────────────────────────

/// Silence thresholds used to grade packet timing.
///
/// A device is graded by the time since its last packet: at most `good`
/// is EXCELLENT, at most `fair` is GOOD, at most `poor` is FAIR, at most
/// `critical` is POOR, anything longer is CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    pub good: Duration,
    pub fair: Duration,
    pub poor: Duration,
    pub critical: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            good: Duration::from_millis(2_000),
            fair: Duration::from_millis(5_000),
            poor: Duration::from_millis(10_000),
            critical: Duration::from_millis(30_000),
        }
    }
}

impl HealthThresholds {
    /// Grade a silence interval. Boundaries are inclusive on the better side.
    pub fn grade(&self, silence: Duration) -> CommunicationHealth {
        if silence <= self.good {
            CommunicationHealth::Excellent
        } else if silence <= self.fair {
            CommunicationHealth::Good
        } else if silence <= self.poor {
            CommunicationHealth::Fair
        } else if silence <= self.critical {
            CommunicationHealth::Poor
        } else {
            CommunicationHealth::Critical
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.good < self.fair && self.fair < self.poor && self.poor < self.critical {
            Ok(())
        } else {
            Err(CoreError::invalid_config(
                "health_thresholds",
                "thresholds must be strictly increasing (good < fair < poor < critical)",
            ))
        }
    }
}

/// Tuning for the [`DeviceStatusTracker`] monitoring task.
///
/// [`DeviceStatusTracker`]: crate::DeviceStatusTracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Cadence of the last-seen refresh for connected devices.
    pub liveness_interval: Duration,
    /// Cadence of the communication health sweep.
    pub health_sweep_interval: Duration,
    pub thresholds: HealthThresholds,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            liveness_interval: Duration::from_millis(1_000),
            health_sweep_interval: Duration::from_millis(5_000),
            thresholds: HealthThresholds::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        require_non_zero("liveness_interval", self.liveness_interval)?;
        require_non_zero("health_sweep_interval", self.health_sweep_interval)?;
        self.thresholds.validate()
    }
}

// ── RateControllerConfig ─────────────────────────────────────────────

/// Gates and bounds for the [`AdaptiveRateController`].
///
/// [`AdaptiveRateController`]: crate::AdaptiveRateController
#[derive(Debug, Clone, PartialEq)]
pub struct RateControllerConfig {
    /// Lower clamp for manual overrides.
    pub min_rate: f64,
    /// Upper clamp for manual overrides.
    pub max_rate: f64,
    /// Minimum spacing between two adaptations.
    pub adaptation_delay: Duration,
    /// Minimum score change, relative to the last adapted score.
    pub hysteresis_threshold: u8,
    /// Number of recent scores that must agree before adapting.
    pub stability_window: usize,
    pub rate_table: RateTable,
    /// Quality assumed before the first sample arrives. Its tier is the
    /// initial rate.
    pub default_quality: u8,
}

impl Default for RateControllerConfig {
    fn default() -> Self {
        Self {
            min_rate: 0.1,
            max_rate: 10.0,
            adaptation_delay: Duration::from_millis(3_000),
            hysteresis_threshold: 1,
            stability_window: 3,
            rate_table: RateTable::default(),
            default_quality: crate::rate::DEFAULT_QUALITY,
        }
    }
}

impl RateControllerConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.min_rate.is_finite() && self.min_rate > 0.0) {
            return Err(CoreError::invalid_config("min_rate", "must be a positive number"));
        }
        if !(self.max_rate.is_finite() && self.max_rate >= self.min_rate) {
            return Err(CoreError::invalid_config(
                "max_rate",
                "must be a number no smaller than min_rate",
            ));
        }
        if self.stability_window == 0 {
            return Err(CoreError::invalid_config(
                "stability_window",
                "must consider at least one score",
            ));
        }
        if !crate::rate::is_valid_score(self.default_quality) {
            return Err(CoreError::invalid_config(
                "default_quality",
                "must be a quality score between 1 and 5",
            ));
        }
        if !self.rate_table.is_strictly_increasing() {
            return Err(CoreError::invalid_config(
                "rate_table",
                "rates must be positive and strictly increasing with quality",
            ));
        }
        if self
            .rate_table
            .rates()
            .iter()
            .any(|rate| *rate < self.min_rate || *rate > self.max_rate)
        {
            return Err(CoreError::invalid_config(
                "rate_table",
                "every rate must lie within [min_rate, max_rate]",
            ));
        }
        Ok(())
    }

    /// Rate the controller starts at, before any sample has been seen.
    pub fn initial_rate(&self) -> f64 {
        self.rate_table.rate_for(self.default_quality)
    }

    /// Clamp a requested rate into `[min_rate, max_rate]`. NaN maps to
    /// the minimum.
    pub fn clamp_rate(&self, rate: f64) -> f64 {
        if rate.is_nan() {
            self.min_rate
        } else {
            rate.clamp(self.min_rate, self.max_rate)
        }
    }
}

fn require_non_zero(field: &str, value: Duration) -> Result<(), CoreError> {
    if value.is_zero() {
        Err(CoreError::invalid_config(field, "must be greater than zero"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ConnectionPolicy::default().validate().is_ok());
        assert!(TrackerConfig::default().validate().is_ok());
        assert!(RateControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn grade_boundaries_are_inclusive() {
        let thresholds = HealthThresholds::default();
        let ms = Duration::from_millis;
        assert_eq!(thresholds.grade(ms(0)), CommunicationHealth::Excellent);
        assert_eq!(thresholds.grade(ms(2_000)), CommunicationHealth::Excellent);
        assert_eq!(thresholds.grade(ms(2_001)), CommunicationHealth::Good);
        assert_eq!(thresholds.grade(ms(5_000)), CommunicationHealth::Good);
        assert_eq!(thresholds.grade(ms(6_000)), CommunicationHealth::Fair);
        assert_eq!(thresholds.grade(ms(10_000)), CommunicationHealth::Fair);
        assert_eq!(thresholds.grade(ms(10_001)), CommunicationHealth::Poor);
        assert_eq!(thresholds.grade(ms(30_000)), CommunicationHealth::Poor);
        assert_eq!(thresholds.grade(ms(31_000)), CommunicationHealth::Critical);
    }

    #[test]
    fn rejects_zero_attempt_budget() {
        let policy = ConnectionPolicy {
            max_retry_attempts: 0,
            ..ConnectionPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("max_retry_attempts"));
    }

    #[test]
    fn rejects_initial_delay_above_ceiling() {
        let policy = ConnectionPolicy {
            initial_retry_delay: Duration::from_secs(60),
            ..ConnectionPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let config = TrackerConfig {
            thresholds: HealthThresholds {
                good: Duration::from_secs(6),
                ..HealthThresholds::default()
            },
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_table_outside_rate_bounds() {
        let config = RateControllerConfig {
            max_rate: 4.0,
            ..RateControllerConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate_table"));
    }

    #[test]
    fn clamp_handles_out_of_range_and_nan() {
        let config = RateControllerConfig::default();
        assert!((config.clamp_rate(-1.0) - 0.1).abs() < f64::EPSILON);
        assert!((config.clamp_rate(25.0) - 10.0).abs() < f64::EPSILON);
        assert!((config.clamp_rate(f64::NAN) - 0.1).abs() < f64::EPSILON);
        assert!((config.clamp_rate(7.5) - 7.5).abs() < f64::EPSILON);
    }

    #[test]
    fn initial_rate_is_default_quality_tier() {
        assert!((RateControllerConfig::default().initial_rate() - 2.0).abs() < f64::EPSILON);
    }
}
