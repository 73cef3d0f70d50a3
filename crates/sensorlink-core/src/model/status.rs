// ── Device status model ──
//
// The tracker's per-device record and the three state dimensions it
// tracks. Connection state and operating mode only change through
// explicit tracker calls; communication health is derived from packet
// timing by the tracker's sweep.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::{DeviceId, MacAddress};

/// Link state of a device, driven by the transport layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
    Pairing,
}

/// What a connected device is currently doing with its samples.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum OperatingMode {
    Idle,
    Streaming,
    SdLogging,
    /// Streaming and logging to the SD card at the same time.
    Both,
    Configuring,
    Unknown,
}

impl OperatingMode {
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming | Self::Both)
    }
}

/// Timing-derived link quality grade.
///
/// Declared worst to best, with `Unknown` for devices that have not been
/// graded yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum CommunicationHealth {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
    Unknown,
}

impl CommunicationHealth {
    /// Position on the worst-to-best scale. `None` for `Unknown`.
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Critical => Some(0),
            Self::Poor => Some(1),
            Self::Fair => Some(2),
            Self::Good => Some(3),
            Self::Excellent => Some(4),
            Self::Unknown => None,
        }
    }

    /// True when both grades are known and `self` is strictly worse.
    pub fn is_worse_than(self, other: Self) -> bool {
        matches!((self.rank(), other.rank()), (Some(a), Some(b)) if a < b)
    }
}

// ── DeviceStatus ────────────────────────────────────────────────────

/// Snapshot of one tracked device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub mac_address: MacAddress,
    pub device_name: String,
    pub connection_state: ConnectionState,
    pub operating_mode: OperatingMode,
    pub communication_health: CommunicationHealth,
    /// Percent, 0 until the device reports it.
    pub battery_level: u8,
    /// dBm, 0 until the device reports it.
    pub signal_strength: i32,
    pub last_seen: DateTime<Utc>,
    pub paired_with_host: bool,
    pub firmware_version: String,
    pub hardware_version: String,
    pub total_samples: u64,
    /// Hz.
    pub sampling_rate: f64,
    pub enabled_sensors: BTreeSet<String>,
    pub connection_type: String,
    pub reconnection_attempts: u32,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl DeviceStatus {
    pub(crate) fn registered(
        device_id: DeviceId,
        mac_address: MacAddress,
        device_name: String,
        connection_type: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            mac_address,
            device_name,
            connection_state: ConnectionState::Disconnected,
            operating_mode: OperatingMode::Unknown,
            communication_health: CommunicationHealth::Unknown,
            battery_level: 0,
            signal_strength: 0,
            last_seen: now,
            paired_with_host: false,
            firmware_version: String::new(),
            hardware_version: String::new(),
            total_samples: 0,
            sampling_rate: 0.0,
            enabled_sensors: BTreeSet::new(),
            connection_type,
            reconnection_attempts: 0,
            error_count: 0,
            last_error: None,
        }
    }

    /// Streaming requires a live link, so a disconnected device never
    /// reports streaming whatever its last operating mode was.
    pub fn is_streaming(&self) -> bool {
        self.connection_state == ConnectionState::Connected && self.operating_mode.is_streaming()
    }

    /// Connected, graded excellent and with battery above 20%.
    pub fn is_fully_operational(&self) -> bool {
        self.connection_state == ConnectionState::Connected
            && self.communication_health == CommunicationHealth::Excellent
            && self.battery_level > 20
    }

    /// Multi-line human-readable summary.
    pub fn display_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Device: {} ({})", self.device_name, self.device_id);
        let _ = writeln!(
            out,
            "Status: {} | Mode: {}",
            self.connection_state, self.operating_mode
        );
        let _ = writeln!(
            out,
            "Health: {} | Battery: {}%",
            self.communication_health, self.battery_level
        );
        let _ = writeln!(
            out,
            "Sensors: {} | Rate: {}Hz",
            self.enabled_sensors.len(),
            self.sampling_rate
        );
        let _ = write!(
            out,
            "Samples: {} | Type: {}",
            self.total_samples, self.connection_type
        );
        if self.paired_with_host {
            out.push_str("\nHost Paired: Yes");
        }
        if self.error_count > 0 {
            let _ = write!(out, "\nErrors: {}", self.error_count);
            if let Some(last) = &self.last_error {
                let _ = write!(out, " (last: {last})");
            }
        }
        out
    }
}

// ── DeviceInfoUpdate ────────────────────────────────────────────────

/// Partial update for [`DeviceStatus`]. Only fields that are set overwrite
/// the stored values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfoUpdate {
    pub battery_level: Option<u8>,
    pub signal_strength: Option<i32>,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    pub sampling_rate: Option<f64>,
    pub enabled_sensors: Option<BTreeSet<String>>,
    pub paired_with_host: Option<bool>,
}

impl DeviceInfoUpdate {
    pub fn battery_level(mut self, percent: u8) -> Self {
        self.battery_level = Some(percent.min(100));
        self
    }

    pub fn signal_strength(mut self, dbm: i32) -> Self {
        self.signal_strength = Some(dbm);
        self
    }

    pub fn firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    pub fn hardware_version(mut self, version: impl Into<String>) -> Self {
        self.hardware_version = Some(version.into());
        self
    }

    pub fn sampling_rate(mut self, hz: f64) -> Self {
        self.sampling_rate = Some(hz);
        self
    }

    pub fn enabled_sensors<I, S>(mut self, sensors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_sensors = Some(sensors.into_iter().map(Into::into).collect());
        self
    }

    pub fn paired_with_host(mut self, paired: bool) -> Self {
        self.paired_with_host = Some(paired);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply_to(self, status: &mut DeviceStatus) {
        if let Some(v) = self.battery_level {
            status.battery_level = v;
        }
        if let Some(v) = self.signal_strength {
            status.signal_strength = v;
        }
        if let Some(v) = self.firmware_version {
            status.firmware_version = v;
        }
        if let Some(v) = self.hardware_version {
            status.hardware_version = v;
        }
        if let Some(v) = self.sampling_rate {
            status.sampling_rate = v;
        }
        if let Some(v) = self.enabled_sensors {
            status.enabled_sensors = v;
        }
        if let Some(v) = self.paired_with_host {
            status.paired_with_host = v;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn status() -> DeviceStatus {
        DeviceStatus::registered(
            DeviceId::from("gsr-1"),
            MacAddress::new("00:06:66:12:34:56"),
            "GSR sensor".into(),
            "Classic".into(),
            Utc::now(),
        )
    }

    #[test]
    fn enums_use_screaming_snake_names() {
        assert_eq!(OperatingMode::SdLogging.to_string(), "SD_LOGGING");
        assert_eq!(
            "reconnecting".parse::<ConnectionState>().unwrap(),
            ConnectionState::Reconnecting
        );
        assert_eq!(
            serde_json::to_string(&CommunicationHealth::Excellent).unwrap(),
            "\"EXCELLENT\""
        );
    }

    #[test]
    fn health_ordering_ignores_unknown() {
        assert!(CommunicationHealth::Critical.is_worse_than(CommunicationHealth::Poor));
        assert!(!CommunicationHealth::Excellent.is_worse_than(CommunicationHealth::Good));
        assert!(!CommunicationHealth::Unknown.is_worse_than(CommunicationHealth::Good));
    }

    #[test]
    fn disconnected_device_is_never_streaming() {
        let mut s = status();
        s.operating_mode = OperatingMode::Both;
        assert!(!s.is_streaming());
        s.connection_state = ConnectionState::Connected;
        assert!(s.is_streaming());
        s.connection_state = ConnectionState::Disconnected;
        assert!(!s.is_streaming());
    }

    #[test]
    fn fully_operational_needs_battery_above_twenty() {
        let mut s = status();
        s.connection_state = ConnectionState::Connected;
        s.communication_health = CommunicationHealth::Excellent;
        s.battery_level = 20;
        assert!(!s.is_fully_operational());
        s.battery_level = 21;
        assert!(s.is_fully_operational());
    }

    #[test]
    fn partial_update_only_touches_provided_fields() {
        let mut s = status();
        s.firmware_version = "1.0".into();
        DeviceInfoUpdate::default()
            .battery_level(87)
            .enabled_sensors(["GSR", "PPG"])
            .apply_to(&mut s);
        assert_eq!(s.battery_level, 87);
        assert_eq!(s.firmware_version, "1.0");
        assert_eq!(s.enabled_sensors.len(), 2);
        assert!(DeviceInfoUpdate::default().is_empty());
    }

    #[test]
    fn summary_mentions_errors_only_when_present() {
        let mut s = status();
        assert!(!s.display_summary().contains("Errors"));
        s.error_count = 2;
        s.last_error = Some("CRC mismatch".into());
        let summary = s.display_summary();
        assert!(summary.starts_with("Device: GSR sensor (gsr-1)"));
        assert!(summary.contains("Errors: 2 (last: CRC mismatch)"));
    }
}
