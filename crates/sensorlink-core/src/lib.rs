// sensorlink-core: resilience and control core for multi-sensor acquisition.
//
// Three components, connected only through injected functions and
// listeners: a ConnectionManager (bounded retry, backoff, reconnection
// supervisors), a DeviceStatusTracker (per-device state machine and
// packet-timing health) and an AdaptiveRateController (quality score to
// frame rate, with hysteresis). The crate reads no files, env vars or
// flags; callers hand in the config types.

pub mod config;
pub mod connection;
pub mod error;
pub mod listener;
pub mod model;
pub mod rate;
pub mod tracker;

mod task;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConnectionPolicy, HealthThresholds, RateControllerConfig, TrackerConfig};
pub use connection::{Backoff, ConnectionHealthStore, ConnectionManager};
pub use error::{CoreError, TransportError};
pub use listener::ListenerId;
pub use rate::{AdaptiveRateController, FrameRateChangeListener, RateTable};
pub use tracker::{DeviceStatusTracker, StatusListener};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AdaptationStatistics, CommunicationHealth, ConnectionAttempt, ConnectionHealth,
    ConnectionState, ConnectionStatistics, DeviceId, DeviceInfoUpdate, DeviceStatus,
    FrameRateSettings, MacAddress, OperatingMode, OverallStatistics, QualitySample,
};

/// Lock a std mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
