use crate::model::{CommunicationHealth, ConnectionState, DeviceId, DeviceStatus, OperatingMode};

/// Receives device status transitions from a [`DeviceStatusTracker`].
///
/// Every method has an empty default so listeners implement only the
/// events they care about. Callbacks run synchronously on the thread
/// that made the change and must not block. A panicking listener is
/// logged and skipped.
///
/// [`DeviceStatusTracker`]: super::DeviceStatusTracker
pub trait StatusListener: Send + Sync {
    /// Any change to the device's record, including registration.
    fn on_device_status_changed(&self, _device_id: &DeviceId, _status: &DeviceStatus) {}

    fn on_connection_state_changed(&self, _device_id: &DeviceId, _state: ConnectionState) {}

    fn on_operating_mode_changed(&self, _device_id: &DeviceId, _mode: OperatingMode) {}

    /// Fired by the health sweep only when the grade actually changes.
    fn on_communication_health_changed(&self, _device_id: &DeviceId, _health: CommunicationHealth) {
    }

    fn on_device_error(&self, _device_id: &DeviceId, _error: &str) {}
}
