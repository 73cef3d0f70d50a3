// ── Device status tracking ──

mod listener;
mod status_tracker;

pub use listener::StatusListener;
pub use status_tracker::DeviceStatusTracker;
