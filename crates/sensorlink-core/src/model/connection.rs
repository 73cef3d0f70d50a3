// ── Connection snapshots ──
//
// Read-only views produced by the ConnectionManager. None of these are
// live: every accessor hands out a copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DeviceId;

/// One call to a device's connect function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionAttempt {
    pub device_id: DeviceId,
    /// 1-based position within its retry sequence.
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

/// Attempt-derived health of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub device_id: DeviceId,
    /// Outcome of the most recent attempt.
    pub is_healthy: bool,
    pub last_successful_connection: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub average_connection_time_ms: u64,
    pub packet_loss_rate_percent: f64,
    pub signal_strength: i32,
}

/// Per-device statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatistics {
    pub device_id: DeviceId,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub average_connection_time_ms: u64,
    pub consecutive_failures: u32,
    pub packet_loss_rate_percent: f64,
    pub is_healthy: bool,
    pub last_successful_connection: Option<DateTime<Utc>>,
}

impl ConnectionStatistics {
    /// Statistics for a device the manager has never seen.
    pub fn empty(device_id: DeviceId) -> Self {
        Self {
            device_id,
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            average_connection_time_ms: 0,
            consecutive_failures: 0,
            packet_loss_rate_percent: 0.0,
            is_healthy: false,
            last_successful_connection: None,
        }
    }
}

/// Manager-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallStatistics {
    pub total_devices: usize,
    pub healthy_devices: usize,
    pub unhealthy_devices: usize,
    /// Connect calls made, across every device.
    pub total_connection_attempts: u64,
    /// Retry sequences that ended connected.
    pub successful_connections: u64,
    /// Retry sequences that exhausted their budget.
    pub failed_connections: u64,
    /// `successful_connections` as a share of `total_connection_attempts`.
    pub success_rate_percent: f64,
    pub is_managing: bool,
}
