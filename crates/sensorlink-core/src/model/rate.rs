// ── Rate controller model ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The controller's single settings record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRateSettings {
    /// Frames per second currently in effect.
    pub current_rate: f64,
    pub target_rate: f64,
    /// Score the current rate was adapted to.
    pub quality_score: u8,
    pub is_adaptive: bool,
    pub last_adaptation_time: Option<DateTime<Utc>>,
    pub adaptation_count: u64,
}

/// One reading from the external quality monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualitySample {
    /// 1 (worst) to 5 (best). Anything else maps to the default tier.
    pub score: u8,
    pub latency_ms: u64,
    pub bandwidth_kbps: f64,
}

impl QualitySample {
    pub fn new(score: u8) -> Self {
        Self {
            score,
            latency_ms: 0,
            bandwidth_kbps: 0.0,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_bandwidth(mut self, bandwidth_kbps: f64) -> Self {
        self.bandwidth_kbps = bandwidth_kbps;
        self
    }
}

/// Snapshot returned by `AdaptiveRateController::adaptation_statistics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationStatistics {
    pub current_rate: f64,
    pub target_rate: f64,
    pub is_adaptive: bool,
    pub is_active: bool,
    pub quality_score: u8,
    pub last_quality: Option<QualitySample>,
    pub adaptation_count: u64,
    pub last_adaptation_time: Option<DateTime<Utc>>,
    /// Most recent scores, oldest first.
    pub recent_scores: Vec<u8>,
}

impl fmt::Display for AdaptationStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current Frame Rate: {:.1} fps", self.current_rate)?;
        writeln!(f, "Target Frame Rate: {:.1} fps", self.target_rate)?;
        writeln!(
            f,
            "Adaptive Mode: {}",
            if self.is_adaptive { "enabled" } else { "manual" }
        )?;
        match &self.last_quality {
            Some(q) => writeln!(
                f,
                "Network Quality: {}/5 ({} ms, {:.0} kbps)",
                q.score, q.latency_ms, q.bandwidth_kbps
            )?,
            None => writeln!(f, "Network Quality: {}/5 (no samples)", self.quality_score)?,
        }
        writeln!(f, "Total Adaptations: {}", self.adaptation_count)?;
        match self.last_adaptation_time {
            Some(at) => write!(f, "Last Adaptation: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => write!(f, "Last Adaptation: never"),
        }
    }
}
