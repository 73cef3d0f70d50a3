// ── Domain model ──
//
// Identity types, status records and statistics snapshots shared by the
// three components. Everything here is plain data.

mod connection;
mod device_id;
mod rate;
mod status;

pub use connection::{ConnectionAttempt, ConnectionHealth, ConnectionStatistics, OverallStatistics};
pub use device_id::{DeviceId, MacAddress};
pub use rate::{AdaptationStatistics, FrameRateSettings, QualitySample};
pub use status::{
    CommunicationHealth, ConnectionState, DeviceInfoUpdate, DeviceStatus, OperatingMode,
};
