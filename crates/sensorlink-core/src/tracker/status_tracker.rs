// ── Device status tracker ──
//
// Canonical per-device state machine. Connection state and operating
// mode change only through explicit calls; communication health is
// graded by a periodic sweep from the time since each device's last
// packet. Listeners are notified after the per-device lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::StatusListener;
use crate::config::TrackerConfig;
use crate::listener::{ListenerId, ListenerRegistry};
use crate::lock;
use crate::model::{
    CommunicationHealth, ConnectionState, DeviceId, DeviceInfoUpdate, DeviceStatus, MacAddress,
    OperatingMode,
};
use crate::task::SupervisedTask;

struct TrackedDevice {
    status: DeviceStatus,
    /// `None` until the first packet arrives.
    last_packet: Option<Instant>,
}

/// Tracks state, mode and timing-derived health for every registered
/// device.
///
/// Cheaply cloneable. Updates for unregistered devices are logged and
/// ignored.
#[derive(Clone)]
pub struct DeviceStatusTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    config: TrackerConfig,
    devices: DashMap<DeviceId, TrackedDevice>,
    listeners: ListenerRegistry<dyn StatusListener>,
    monitoring: AtomicBool,
    monitor_task: Mutex<Option<SupervisedTask>>,
}

impl DeviceStatusTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config,
                devices: DashMap::new(),
                listeners: ListenerRegistry::new(),
                monitoring: AtomicBool::new(false),
                monitor_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    // ── Monitoring lifecycle ─────────────────────────────────────

    /// Spawn the monitoring task: a liveness refresh for connected
    /// devices and the communication health sweep, each on its own
    /// cadence. Idempotent.
    pub fn start_monitoring(&self) {
        if self
            .inner
            .monitoring
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("device monitoring already active");
            return;
        }

        let tracker = self.clone();
        let task = SupervisedTask::spawn(
            "device-status-monitor",
            &CancellationToken::new(),
            move |cancel| monitoring_loop(tracker, cancel),
        );
        *lock(&self.inner.monitor_task) = Some(task);
        info!(devices = self.device_count(), "device monitoring started");
    }

    /// Cancel the monitoring task and wait for it. Idempotent.
    pub async fn stop_monitoring(&self) {
        if self
            .inner
            .monitoring
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let task = lock(&self.inner.monitor_task).take();
        if let Some(task) = task {
            task.shutdown().await;
        }
        info!("device monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::Acquire)
    }

    /// Stop monitoring, drop every device and every listener.
    pub async fn cleanup(&self) {
        self.stop_monitoring().await;
        self.inner.devices.clear();
        self.inner.listeners.clear();
        info!("device status tracker cleaned up");
    }

    // ── Listeners ────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    fn notify_status(&self, device_id: &DeviceId, status: &DeviceStatus) {
        self.inner
            .listeners
            .notify("device status changed", |l| l.on_device_status_changed(device_id, status));
    }

    // ── Registration ─────────────────────────────────────────────

    /// Start tracking a device as DISCONNECTED with unknown mode and
    /// health. Registering an id again replaces its record.
    pub fn register_device(
        &self,
        device_id: impl Into<DeviceId>,
        mac_address: MacAddress,
        device_name: impl Into<String>,
        connection_type: impl Into<String>,
    ) -> DeviceStatus {
        let device_id = device_id.into();
        let status = DeviceStatus::registered(
            device_id.clone(),
            mac_address,
            device_name.into(),
            connection_type.into(),
            Utc::now(),
        );
        let replaced = self
            .inner
            .devices
            .insert(
                device_id.clone(),
                TrackedDevice {
                    status: status.clone(),
                    last_packet: None,
                },
            )
            .is_some();

        info!(
            %device_id,
            name = %status.device_name,
            mac = %status.mac_address,
            connection_type = %status.connection_type,
            replaced,
            "device registered"
        );
        self.notify_status(&device_id, &status);
        status
    }

    /// Stop tracking a device. Returns its last status.
    pub fn unregister_device(&self, device_id: &DeviceId) -> Option<DeviceStatus> {
        let (_, device) = self.inner.devices.remove(device_id)?;
        info!(%device_id, "device unregistered");
        Some(device.status)
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Apply `f` under the device's lock. Unregistered devices are
    /// logged and skipped.
    fn mutate<R>(
        &self,
        device_id: &DeviceId,
        operation: &'static str,
        f: impl FnOnce(&mut TrackedDevice) -> R,
    ) -> Option<R> {
        if let Some(mut device) = self.inner.devices.get_mut(device_id) {
            Some(f(&mut device))
        } else {
            warn!(%device_id, operation, "ignoring update for unregistered device");
            None
        }
    }

    pub fn update_connection_state(&self, device_id: &DeviceId, state: ConnectionState) {
        let Some((previous, status)) = self.mutate(device_id, "update_connection_state", |d| {
            let previous = d.status.connection_state;
            if state == ConnectionState::Reconnecting && previous != ConnectionState::Reconnecting
            {
                d.status.reconnection_attempts += 1;
            }
            d.status.connection_state = state;
            d.status.last_seen = Utc::now();
            (previous, d.status.clone())
        }) else {
            return;
        };

        debug!(%device_id, from = %previous, to = %state, "connection state updated");
        self.inner.listeners.notify("connection state changed", |l| {
            l.on_connection_state_changed(device_id, state);
        });
        self.notify_status(device_id, &status);
    }

    pub fn update_operating_mode(&self, device_id: &DeviceId, mode: OperatingMode) {
        let Some(status) = self.mutate(device_id, "update_operating_mode", |d| {
            d.status.operating_mode = mode;
            d.status.last_seen = Utc::now();
            d.status.clone()
        }) else {
            return;
        };

        debug!(%device_id, %mode, "operating mode updated");
        self.inner
            .listeners
            .notify("operating mode changed", |l| l.on_operating_mode_changed(device_id, mode));
        self.notify_status(device_id, &status);
    }

    /// Overwrite only the fields set in `update`.
    pub fn update_device_info(&self, device_id: &DeviceId, update: DeviceInfoUpdate) {
        if update.is_empty() {
            trace!(%device_id, "empty device info update");
            return;
        }
        let Some(status) = self.mutate(device_id, "update_device_info", |d| {
            update.apply_to(&mut d.status);
            d.status.last_seen = Utc::now();
            d.status.clone()
        }) else {
            return;
        };

        debug!(%device_id, battery = status.battery_level, "device info updated");
        self.notify_status(device_id, &status);
    }

    /// Note one inbound packet. Hot path: updates timing and the sample
    /// counter without notifying listeners.
    pub fn record_packet_received(&self, device_id: &DeviceId) {
        self.mutate(device_id, "record_packet_received", |d| {
            d.last_packet = Some(Instant::now());
            d.status.last_seen = Utc::now();
            d.status.total_samples += 1;
        });
    }

    pub fn record_error(&self, device_id: &DeviceId, error: impl Into<String>) {
        let error = error.into();
        let Some(status) = self.mutate(device_id, "record_error", |d| {
            d.status.error_count = d.status.error_count.saturating_add(1);
            d.status.last_error = Some(error.clone());
            d.status.clone()
        }) else {
            return;
        };

        warn!(%device_id, error = %error, errors = status.error_count, "device error recorded");
        self.inner
            .listeners
            .notify("device error", |l| l.on_device_error(device_id, &error));
        self.notify_status(device_id, &status);
    }

    // ── Periodic work ────────────────────────────────────────────

    /// Re-grade every device from the time since its last packet. A
    /// device that has never sent one grades CRITICAL. Listeners hear
    /// only about grades that changed. Returns the number of changes.
    pub fn sweep_communication_health(&self) -> usize {
        let thresholds = self.inner.config.thresholds;
        let now = Instant::now();

        let changes: Vec<(DeviceId, CommunicationHealth, DeviceStatus)> = self
            .inner
            .devices
            .iter_mut()
            .filter_map(|mut entry| {
                let grade = entry.last_packet.map_or(CommunicationHealth::Critical, |at| {
                    thresholds.grade(now.saturating_duration_since(at))
                });
                if entry.status.communication_health == grade {
                    return None;
                }
                entry.status.communication_health = grade;
                Some((entry.key().clone(), grade, entry.status.clone()))
            })
            .collect();

        for (device_id, grade, status) in &changes {
            if grade.is_worse_than(CommunicationHealth::Fair) {
                warn!(%device_id, health = %grade, "communication health degraded");
            } else {
                debug!(%device_id, health = %grade, "communication health changed");
            }
            self.inner.listeners.notify("communication health changed", |l| {
                l.on_communication_health_changed(device_id, *grade);
            });
            self.notify_status(device_id, status);
        }
        changes.len()
    }

    /// Refresh `last_seen` of every connected device. Returns how many
    /// were refreshed.
    pub fn refresh_liveness(&self) -> usize {
        let now = Utc::now();
        let mut refreshed = 0;
        for mut entry in self.inner.devices.iter_mut() {
            if entry.status.connection_state == ConnectionState::Connected {
                entry.status.last_seen = now;
                refreshed += 1;
            }
        }
        refreshed
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn device_status(&self, device_id: &DeviceId) -> Option<DeviceStatus> {
        self.inner
            .devices
            .get(device_id)
            .map(|d| d.status.clone())
    }

    /// Every tracked device, ordered by id.
    pub fn all_device_statuses(&self) -> Vec<DeviceStatus> {
        self.collect_statuses(|_| true)
    }

    pub fn devices_by_state(&self, state: ConnectionState) -> Vec<DeviceStatus> {
        self.collect_statuses(|s| s.connection_state == state)
    }

    pub fn devices_by_mode(&self, mode: OperatingMode) -> Vec<DeviceStatus> {
        self.collect_statuses(|s| s.operating_mode == mode)
    }

    fn collect_statuses(&self, keep: impl Fn(&DeviceStatus) -> bool) -> Vec<DeviceStatus> {
        let mut statuses: Vec<DeviceStatus> = self
            .inner
            .devices
            .iter()
            .filter(|d| keep(&d.status))
            .map(|d| d.status.clone())
            .collect();
        statuses.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        statuses
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.len()
    }

    /// False for unregistered devices.
    pub fn is_fully_operational(&self, device_id: &DeviceId) -> bool {
        self.inner
            .devices
            .get(device_id)
            .is_some_and(|d| d.status.is_fully_operational())
    }

    /// `None` for unregistered devices and devices that never sent a
    /// packet.
    pub fn time_since_last_packet(&self, device_id: &DeviceId) -> Option<Duration> {
        self.inner
            .devices
            .get(device_id)
            .and_then(|d| d.last_packet)
            .map(|at| at.elapsed())
    }
}

async fn monitoring_loop(tracker: DeviceStatusTracker, cancel: CancellationToken) {
    let config = tracker.config().clone();
    let mut liveness = tokio::time::interval(config.liveness_interval);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep = tokio::time::interval(config.health_sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = sweep.tick() => {
                let changed = tracker.sweep_communication_health();
                trace!(changed, "health sweep complete");
            }
            _ = liveness.tick() => {
                tracker.refresh_liveness();
            }
        }
    }
}
