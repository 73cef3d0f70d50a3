// ── Connection manager ──
//
// Bounded-retry connection with backoff, per-device reconnection
// supervisors and health monitors, and a manager-wide health sweep.
// Every background loop runs under a child token of the current
// management session, so stopping management cancels and awaits all of
// them at once.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::health::ConnectionHealthStore;
use super::Backoff;
use crate::config::ConnectionPolicy;
use crate::error::{CoreError, TransportError};
use crate::lock;
use crate::model::{
    ConnectionAttempt, ConnectionHealth, ConnectionStatistics, DeviceId, OverallStatistics,
};
use crate::task::{self, SupervisedTask};

/// Supervises connections to many independent devices.
///
/// Cheaply cloneable via `Arc<ManagerInner>`. Retry sequences can run
/// with or without an active management session; background loops
/// (auto-reconnection, health monitoring, the overall sweep) only run
/// while management is active.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    policy: ConnectionPolicy,
    health: DashMap<DeviceId, ConnectionHealthStore>,
    reconnection_tasks: DashMap<DeviceId, SupervisedTask>,
    monitoring_tasks: DashMap<DeviceId, SupervisedTask>,
    sweep_task: Mutex<Option<SupervisedTask>>,
    managing: AtomicBool,
    session: ArcSwap<CancellationToken>,
    total_attempts: AtomicU64,
    successful_connections: AtomicU64,
    failed_connections: AtomicU64,
}

impl ConnectionManager {
    pub fn new(policy: ConnectionPolicy) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                policy,
                health: DashMap::new(),
                reconnection_tasks: DashMap::new(),
                monitoring_tasks: DashMap::new(),
                sweep_task: Mutex::new(None),
                managing: AtomicBool::new(false),
                session: ArcSwap::from_pointee(CancellationToken::new()),
                total_attempts: AtomicU64::new(0),
                successful_connections: AtomicU64::new(0),
                failed_connections: AtomicU64::new(0),
            }),
        }
    }

    pub fn policy(&self) -> &ConnectionPolicy {
        &self.inner.policy
    }

    // ── Management lifecycle ─────────────────────────────────────

    /// Begin a management session and launch the overall health sweep.
    /// Calling it while a session is active does nothing.
    pub fn start_management(&self) {
        if self
            .inner
            .managing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("connection management already active");
            return;
        }

        let session = CancellationToken::new();
        self.inner.session.store(Arc::new(session.clone()));

        let manager = self.clone();
        let sweep = SupervisedTask::spawn("overall-health-sweep", &session, move |cancel| {
            overall_health_loop(manager, cancel)
        });
        *lock(&self.inner.sweep_task) = Some(sweep);

        info!(
            sweep_interval_ms = duration_ms(self.inner.policy.health_sweep_interval),
            "connection management started"
        );
    }

    /// End the management session. Cancels every reconnection
    /// supervisor, health monitor and the overall sweep, and waits for
    /// all of them to exit. Calling it while inactive does nothing.
    pub async fn stop_management(&self) {
        if self
            .inner
            .managing
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("connection management not active");
            return;
        }

        self.inner.session.load().cancel();

        let mut tasks = drain_tasks(&self.inner.reconnection_tasks);
        tasks.extend(drain_tasks(&self.inner.monitoring_tasks));
        let sweep = lock(&self.inner.sweep_task).take();
        tasks.extend(sweep);

        let count = tasks.len();
        task::shutdown_all(tasks).await;
        info!(tasks = count, "connection management stopped");
    }

    pub fn is_managing(&self) -> bool {
        self.inner.managing.load(Ordering::Acquire)
    }

    /// Background loops currently running: reconnection supervisors,
    /// health monitors and the overall sweep.
    pub fn active_task_count(&self) -> usize {
        let running = |map: &DashMap<DeviceId, SupervisedTask>| {
            map.iter().filter(|entry| entry.value().is_running()).count()
        };
        let sweep = lock(&self.inner.sweep_task)
            .as_ref()
            .is_some_and(SupervisedTask::is_running);
        running(&self.inner.reconnection_tasks)
            + running(&self.inner.monitoring_tasks)
            + usize::from(sweep)
    }

    /// Stop management and forget every device.
    pub async fn cleanup(&self) {
        self.stop_management().await;
        self.reset_all_statistics();
        info!("connection manager cleaned up");
    }

    // ── Retry engine ─────────────────────────────────────────────

    /// Try to connect a device, retrying with backoff.
    ///
    /// Calls `connect` at most `max_retry_attempts` times, each bounded by
    /// `connection_timeout`. Returns `Ok(true)` on the first success and
    /// `Ok(false)` once the attempts are exhausted. Transient transport
    /// errors count as failed attempts; unexpected ones are recorded and
    /// returned as [`CoreError::Transport`]. Stopping management while a
    /// sequence is in flight ends it with [`CoreError::Cancelled`]
    /// without recording the interrupted attempt.
    pub async fn connect_with_retry<F, Fut>(
        &self,
        device_id: &DeviceId,
        connect: F,
    ) -> Result<bool, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool, TransportError>>,
    {
        let cancel = self.session_token();
        self.retry(device_id, &connect, &cancel).await
    }

    async fn retry<F, Fut>(
        &self,
        device_id: &DeviceId,
        connect: &F,
        cancel: &CancellationToken,
    ) -> Result<bool, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool, TransportError>>,
    {
        let policy = &self.inner.policy;
        let max_attempts = policy.max_retry_attempts;
        let mut backoff = Backoff::new(policy);

        info!(%device_id, max_attempts, "connecting");

        for attempt in 1..=max_attempts {
            debug!(%device_id, attempt, max_attempts, "connection attempt");
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(%device_id, attempt, "connection sequence cancelled");
                    return Err(CoreError::Cancelled);
                }
                result = tokio::time::timeout(policy.connection_timeout, connect()) => result,
            };

            let failure = match outcome {
                Ok(Ok(true)) => {
                    self.record_attempt(device_id, attempt, started, None);
                    self.inner
                        .successful_connections
                        .fetch_add(1, Ordering::Relaxed);
                    info!(%device_id, attempt, "connected");
                    return Ok(true);
                }
                Ok(Ok(false)) => {
                    warn!(%device_id, attempt, "connect function reported failure");
                    "connect function reported failure".to_owned()
                }
                Ok(Err(err)) if err.is_transient() => {
                    warn!(%device_id, attempt, error = %err, "connection attempt failed");
                    err.to_string()
                }
                Ok(Err(err)) => {
                    self.record_attempt(device_id, attempt, started, Some(err.to_string()));
                    error!(%device_id, attempt, error = %err, "unexpected transport failure");
                    return Err(CoreError::Transport {
                        device_id: device_id.clone(),
                        source: err,
                    });
                }
                Err(_elapsed) => {
                    let err = TransportError::Timeout {
                        timeout_ms: duration_ms(policy.connection_timeout),
                    };
                    warn!(%device_id, attempt, error = %err, "connection attempt timed out");
                    err.to_string()
                }
            };

            self.record_attempt(device_id, attempt, started, Some(failure));

            if attempt < max_attempts {
                let delay = backoff.next().unwrap_or(policy.max_retry_delay);
                debug!(%device_id, attempt, delay_ms = duration_ms(delay), "backing off");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(%device_id, attempt, "connection sequence cancelled");
                        return Err(CoreError::Cancelled);
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.inner.failed_connections.fetch_add(1, Ordering::Relaxed);
        error!(%device_id, attempts = max_attempts, "failed to connect after exhausting attempts");
        Ok(false)
    }

    fn record_attempt(
        &self,
        device_id: &DeviceId,
        attempt_number: u32,
        started: Instant,
        error: Option<String>,
    ) -> ConnectionHealth {
        let attempt = ConnectionAttempt {
            device_id: device_id.clone(),
            attempt_number,
            timestamp: Utc::now(),
            success: error.is_none(),
            error_message: error,
            duration_ms: duration_ms(started.elapsed()),
        };
        self.inner.total_attempts.fetch_add(1, Ordering::Relaxed);
        let mut store = self.store_mut(device_id);
        store.record(attempt, Instant::now()).clone()
    }

    fn store_mut(
        &self,
        device_id: &DeviceId,
    ) -> dashmap::mapref::one::RefMut<'_, DeviceId, ConnectionHealthStore> {
        self.inner
            .health
            .entry(device_id.clone())
            .or_insert_with(|| ConnectionHealthStore::new(device_id.clone(), &self.inner.policy))
    }

    /// Token that cancels in-flight retries: the session token while
    /// managing, a never-cancelled one otherwise.
    fn session_token(&self) -> CancellationToken {
        if self.is_managing() {
            self.inner.session.load().child_token()
        } else {
            CancellationToken::new()
        }
    }

    // ── Auto-reconnection ────────────────────────────────────────

    /// Spawn a supervisor that re-runs the retry sequence whenever the
    /// device is unhealthy. Replaces any supervisor already running for
    /// the device. Requires an active session and `enable_auto_reconnect`.
    pub fn start_auto_reconnection<F, Fut>(&self, device_id: DeviceId, connect: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, TransportError>> + Send + 'static,
    {
        if !self.inner.policy.enable_auto_reconnect {
            debug!(%device_id, "auto-reconnection disabled by policy");
            return;
        }
        if !self.is_managing() {
            warn!(%device_id, "connection management not active, auto-reconnection not started");
            return;
        }

        let session = self.inner.session.load_full();
        let manager = self.clone();
        let id = device_id.clone();
        let task = SupervisedTask::spawn("auto-reconnection", &session, move |cancel| {
            reconnection_loop(manager, id, connect, cancel)
        });
        if let Some(previous) = self.inner.reconnection_tasks.insert(device_id.clone(), task) {
            previous.cancel();
            debug!(%device_id, "replaced existing reconnection supervisor");
        }
        info!(%device_id, "auto-reconnection started");
    }

    /// Returns whether a supervisor was running.
    pub async fn stop_auto_reconnection(&self, device_id: &DeviceId) -> bool {
        let Some((_, task)) = self.inner.reconnection_tasks.remove(device_id) else {
            return false;
        };
        task.shutdown().await;
        info!(%device_id, "auto-reconnection stopped");
        true
    }

    // ── Health monitoring ────────────────────────────────────────

    /// Spawn a loop that periodically re-evaluates the device's health and
    /// logs degradation and recovery. Independent of auto-reconnection.
    pub fn start_health_monitoring(&self, device_id: DeviceId) {
        if !self.is_managing() {
            warn!(%device_id, "connection management not active, health monitoring not started");
            return;
        }

        let session = self.inner.session.load_full();
        let manager = self.clone();
        let id = device_id.clone();
        let task = SupervisedTask::spawn("health-monitor", &session, move |cancel| {
            health_monitor_loop(manager, id, cancel)
        });
        if let Some(previous) = self.inner.monitoring_tasks.insert(device_id.clone(), task) {
            previous.cancel();
        }
        debug!(%device_id, "health monitoring started");
    }

    /// Returns whether a monitor was running.
    pub async fn stop_health_monitoring(&self, device_id: &DeviceId) -> bool {
        let Some((_, task)) = self.inner.monitoring_tasks.remove(device_id) else {
            return false;
        };
        task.shutdown().await;
        debug!(%device_id, "health monitoring stopped");
        true
    }

    /// Whether the device's consecutive failures reached the degradation
    /// threshold. `None` until the device has a health record.
    pub fn is_degraded(&self, device_id: &DeviceId) -> Option<bool> {
        self.connection_health(device_id)
            .map(|h| h.consecutive_failures >= self.inner.policy.degraded_failure_threshold)
    }

    /// Check every device once. Returns the number of unhealthy devices.
    pub fn sweep_overall_health(&self) -> usize {
        let unhealthy: Vec<ConnectionHealth> = self
            .inner
            .health
            .iter()
            .filter_map(|entry| entry.health().filter(|h| !h.is_healthy).cloned())
            .collect();

        if unhealthy.is_empty() {
            debug!(devices = self.inner.health.len(), "all devices healthy");
        } else {
            warn!(unhealthy = unhealthy.len(), "unhealthy devices detected");
            for health in &unhealthy {
                debug!(
                    device_id = %health.device_id,
                    consecutive_failures = health.consecutive_failures,
                    "device unhealthy"
                );
            }
        }
        unhealthy.len()
    }

    // ── Health and statistics ────────────────────────────────────

    pub fn connection_health(&self, device_id: &DeviceId) -> Option<ConnectionHealth> {
        self.inner
            .health
            .get(device_id)
            .and_then(|store| store.health().cloned())
    }

    pub fn all_connection_health(&self) -> BTreeMap<DeviceId, ConnectionHealth> {
        self.inner
            .health
            .iter()
            .filter_map(|entry| {
                entry
                    .health()
                    .map(|h| (entry.key().clone(), h.clone()))
            })
            .collect()
    }

    /// Record the device's latest signal strength. Carried into every
    /// later health record.
    pub fn update_signal_strength(&self, device_id: &DeviceId, dbm: i32) {
        self.store_mut(device_id).set_signal_strength(dbm);
    }

    /// Retained attempts for a device, oldest first.
    pub fn attempt_history(&self, device_id: &DeviceId) -> Vec<ConnectionAttempt> {
        self.inner
            .health
            .get(device_id)
            .map(|store| store.attempts().cloned().collect())
            .unwrap_or_default()
    }

    /// Zeroed statistics for devices the manager has never seen.
    pub fn connection_statistics(&self, device_id: &DeviceId) -> ConnectionStatistics {
        self.inner.health.get(device_id).map_or_else(
            || ConnectionStatistics::empty(device_id.clone()),
            |store| store.statistics(),
        )
    }

    /// Devices count once they have a health record; a device known only
    /// through [`Self::update_signal_strength`] is neither healthy nor
    /// unhealthy.
    pub fn overall_statistics(&self) -> OverallStatistics {
        let (mut healthy_devices, mut unhealthy_devices) = (0, 0);
        for entry in &self.inner.health {
            match entry.is_healthy() {
                Some(true) => healthy_devices += 1,
                Some(false) => unhealthy_devices += 1,
                None => {}
            }
        }
        let total = self.inner.total_attempts.load(Ordering::Relaxed);
        let successful = self.inner.successful_connections.load(Ordering::Relaxed);
        let failed = self.inner.failed_connections.load(Ordering::Relaxed);

        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let success_rate_percent = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        };

        OverallStatistics {
            total_devices: healthy_devices + unhealthy_devices,
            healthy_devices,
            unhealthy_devices,
            total_connection_attempts: total,
            successful_connections: successful,
            failed_connections: failed,
            success_rate_percent,
            is_managing: self.is_managing(),
        }
    }

    pub fn reset_device_statistics(&self, device_id: &DeviceId) {
        if self.inner.health.remove(device_id).is_some() {
            info!(%device_id, "connection statistics reset");
        }
    }

    pub fn reset_all_statistics(&self) {
        self.inner.health.clear();
        self.inner.total_attempts.store(0, Ordering::Relaxed);
        self.inner.successful_connections.store(0, Ordering::Relaxed);
        self.inner.failed_connections.store(0, Ordering::Relaxed);
        info!("all connection statistics reset");
    }
}

// ── Background loops ─────────────────────────────────────────────────

async fn reconnection_loop<F, Fut>(
    manager: ConnectionManager,
    device_id: DeviceId,
    connect: F,
    cancel: CancellationToken,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, TransportError>> + Send + 'static,
{
    let interval = manager.inner.policy.health_check_interval;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        let unhealthy = manager
            .connection_health(&device_id)
            .is_some_and(|h| !h.is_healthy);
        if !unhealthy {
            continue;
        }

        info!(%device_id, "attempting automatic reconnection");
        match manager.retry(&device_id, &connect, &cancel).await {
            Ok(true) => info!(%device_id, "automatic reconnection succeeded"),
            Ok(false) => warn!(%device_id, "automatic reconnection exhausted its attempts"),
            Err(CoreError::Cancelled) => break,
            Err(e) => error!(%device_id, error = %e, "automatic reconnection failed"),
        }
    }

    debug!(%device_id, "reconnection supervisor exited");
}

async fn health_monitor_loop(
    manager: ConnectionManager,
    device_id: DeviceId,
    cancel: CancellationToken,
) {
    let threshold = manager.inner.policy.degraded_failure_threshold;
    let mut ticker = tokio::time::interval(manager.inner.policy.health_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick

    let mut degraded = false;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(health) = manager.connection_health(&device_id) {
                    let now_degraded = health.consecutive_failures >= threshold;
                    if now_degraded && !degraded {
                        warn!(
                            %device_id,
                            consecutive_failures = health.consecutive_failures,
                            "connection health degraded"
                        );
                    } else if degraded && !now_degraded {
                        info!(%device_id, "connection health recovered");
                    }
                    degraded = now_degraded;
                }
            }
        }
    }
}

async fn overall_health_loop(manager: ConnectionManager, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(manager.inner.policy.health_sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                manager.sweep_overall_health();
            }
        }
    }
}

fn drain_tasks(map: &DashMap<DeviceId, SupervisedTask>) -> Vec<SupervisedTask> {
    let keys: Vec<DeviceId> = map.iter().map(|entry| entry.key().clone()).collect();
    keys.iter()
        .filter_map(|key| map.remove(key).map(|(_, task)| task))
        .collect()
}

fn duration_ms(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
