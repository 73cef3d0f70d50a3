//! `sensorlink simulate`: a scripted fleet driven through the whole core.
//!
//! Each device gets a link that refuses its first few connect attempts,
//! then streams packets on a fixed cadence until the run ends. The last
//! device goes quiet halfway through so the health sweep has something to
//! grade down. A quality script is fed to the rate controller alongside.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use sensorlink_config::Config;
use sensorlink_core::{
    AdaptationStatistics, AdaptiveRateController, CommunicationHealth, ConnectionManager,
    ConnectionState, ConnectionStatistics, DeviceId, DeviceInfoUpdate, DeviceStatus,
    DeviceStatusTracker, FrameRateChangeListener, MacAddress, OperatingMode, OverallStatistics,
    QualitySample, StatusListener, TransportError,
};

use crate::cli::{GlobalOpts, SimulateArgs};
use crate::error::CliError;
use crate::output;

// ── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub elapsed_ms: u64,
    pub interrupted: bool,
    pub devices: Vec<DeviceReport>,
    pub overall: OverallStatistics,
    pub rate: AdaptationStatistics,
    pub events: EventTotals,
}

#[derive(Debug, Serialize)]
pub struct DeviceReport {
    pub status: DeviceStatus,
    pub connection: ConnectionStatistics,
}

#[derive(Debug, Default, Serialize)]
pub struct EventTotals {
    pub status_events: u64,
    pub rate_events: u64,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Device")]
    id: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Health")]
    health: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Samples")]
    samples: u64,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Avg ms")]
    avg_ms: u64,
}

impl From<&DeviceReport> for DeviceRow {
    fn from(d: &DeviceReport) -> Self {
        Self {
            id: d.status.device_id.to_string(),
            state: d.status.connection_state.to_string(),
            mode: d.status.operating_mode.to_string(),
            health: d.status.communication_health.to_string(),
            battery: format!("{}%", d.status.battery_level),
            samples: d.status.total_samples,
            attempts: format!(
                "{}/{}",
                d.connection.successful_attempts, d.connection.total_attempts
            ),
            avg_ms: d.connection.average_connection_time_ms,
        }
    }
}

fn render_report(report: &SimulationReport, color: bool) -> String {
    let rows: Vec<DeviceRow> = report.devices.iter().map(DeviceRow::from).collect();
    let overall = &report.overall;
    let mut out = String::new();

    let _ = writeln!(out, "{}", output::heading("Devices", color));
    let _ = writeln!(out, "{}", output::render_table(&rows));
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", output::heading("Connections", color));
    let _ = writeln!(
        out,
        "Healthy: {}/{} devices",
        overall.healthy_devices, overall.total_devices
    );
    let _ = writeln!(
        out,
        "Attempts: {} ({} successful, {} exhausted retries)",
        overall.total_connection_attempts,
        overall.successful_connections,
        overall.failed_connections
    );
    let _ = writeln!(out, "Success Rate: {:.1}%", overall.success_rate_percent);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", output::heading("Frame Rate", color));
    let _ = write!(out, "{}", report.rate);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} status events, {} rate events in {} ms{}",
        report.events.status_events,
        report.events.rate_events,
        report.elapsed_ms,
        if report.interrupted { " (interrupted)" } else { "" }
    );
    out
}

// ── Scripted devices ────────────────────────────────────────────────

/// A link that refuses the first `failures` connect attempts.
#[derive(Clone)]
struct ScriptedLink {
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl ScriptedLink {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn connector(
        &self,
    ) -> impl Fn() -> std::future::Ready<Result<bool, TransportError>> + Send + Sync + 'static
    {
        let failures = self.failures;
        let calls = Arc::clone(&self.calls);
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if call > failures {
                Ok(true)
            } else {
                Err(TransportError::io(format!("link refused (call {call})")))
            })
        }
    }
}

struct DeviceScript {
    device_id: DeviceId,
    link: ScriptedLink,
    battery: u8,
    packet_interval: Duration,
    deadline: Instant,
    silent_from: Option<Instant>,
}

// ── Event counting ──────────────────────────────────────────────────

#[derive(Default)]
struct EventCounter {
    status: AtomicU64,
    rate: AtomicU64,
}

impl EventCounter {
    fn totals(&self) -> EventTotals {
        EventTotals {
            status_events: self.status.load(Ordering::Relaxed),
            rate_events: self.rate.load(Ordering::Relaxed),
        }
    }
}

impl StatusListener for EventCounter {
    fn on_connection_state_changed(&self, device_id: &DeviceId, state: ConnectionState) {
        self.status.fetch_add(1, Ordering::Relaxed);
        info!(%device_id, %state, "connection state");
    }

    fn on_operating_mode_changed(&self, device_id: &DeviceId, mode: OperatingMode) {
        self.status.fetch_add(1, Ordering::Relaxed);
        debug!(%device_id, %mode, "operating mode");
    }

    fn on_communication_health_changed(&self, device_id: &DeviceId, health: CommunicationHealth) {
        self.status.fetch_add(1, Ordering::Relaxed);
        if health.is_worse_than(CommunicationHealth::Fair) {
            warn!(%device_id, %health, "communication health");
        } else {
            debug!(%device_id, %health, "communication health");
        }
    }

    fn on_device_error(&self, device_id: &DeviceId, error: &str) {
        self.status.fetch_add(1, Ordering::Relaxed);
        warn!(%device_id, error, "device error");
    }
}

impl FrameRateChangeListener for EventCounter {
    fn on_frame_rate_changed(&self, new_rate: f64, reason: &str) {
        self.rate.fetch_add(1, Ordering::Relaxed);
        info!(rate = new_rate, reason, "frame rate");
    }

    fn on_adaptation_mode_changed(&self, is_adaptive: bool) {
        self.rate.fetch_add(1, Ordering::Relaxed);
        debug!(is_adaptive, "adaptation mode");
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: &SimulateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.duration.is_zero() {
        return Err(CliError::Validation {
            field: "--duration".into(),
            reason: "must be greater than zero".into(),
        });
    }
    if args.packet_interval.is_zero() {
        return Err(CliError::Validation {
            field: "--packet-interval".into(),
            reason: "must be greater than zero".into(),
        });
    }

    let config = sensorlink_config::load_config(global.config.as_deref())?;
    let report = run(&config, args).await?;

    let color = output::should_color(global.color);
    let rendered = output::render(global.output, &report, |r| render_report(r, color))?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

async fn run(config: &Config, args: &SimulateArgs) -> Result<SimulationReport, CliError> {
    let manager = ConnectionManager::new(config.connection_policy()?);
    let tracker = DeviceStatusTracker::new(config.tracker_config()?);
    let rate = Arc::new(AdaptiveRateController::new(config.rate_controller_config()?));

    let events = Arc::new(EventCounter::default());
    tracker.add_listener(events.clone());
    rate.add_listener(events.clone());

    manager.start_management();
    tracker.start_monitoring();
    rate.start();

    let started = Instant::now();
    let deadline = started + args.duration;
    let silent_from = started + args.duration / 2;
    info!(
        devices = args.devices,
        duration_ms = duration_ms(args.duration),
        fail_first = args.fail_first,
        "simulation started"
    );

    let mut handles = Vec::with_capacity(usize::from(args.devices) + 1);
    for index in 1..=args.devices {
        let script = DeviceScript {
            device_id: register(&tracker, index),
            link: ScriptedLink::new(args.fail_first),
            battery: battery_for(index),
            packet_interval: args.packet_interval,
            deadline,
            silent_from: (index == args.devices).then_some(silent_from),
        };
        handles.push(tokio::spawn(drive_device(
            manager.clone(),
            tracker.clone(),
            script,
        )));
    }
    handles.push(tokio::spawn(feed_quality(
        Arc::clone(&rate),
        args.quality.clone(),
        args.duration,
    )));

    let interrupted = tokio::select! {
        () = tokio::time::sleep_until(deadline) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        warn!("interrupted, finishing early");
        for handle in &handles {
            handle.abort();
        }
    }

    // Cancels retries still in flight so the device tasks can finish.
    manager.stop_management().await;
    for handle in handles {
        if let Err(err) = handle.await {
            if err.is_panic() {
                warn!(error = %err, "simulation task panicked");
            }
        }
    }

    tracker.sweep_communication_health();
    manager.sweep_overall_health();

    let devices = tracker
        .all_device_statuses()
        .into_iter()
        .map(|status| DeviceReport {
            connection: manager.connection_statistics(&status.device_id),
            status,
        })
        .collect();
    let report = SimulationReport {
        elapsed_ms: duration_ms(started.elapsed()),
        interrupted,
        devices,
        overall: manager.overall_statistics(),
        rate: rate.adaptation_statistics(),
        events: events.totals(),
    };

    rate.stop();
    tracker.cleanup().await;
    manager.cleanup().await;
    info!(elapsed_ms = report.elapsed_ms, "simulation finished");
    Ok(report)
}

fn register(tracker: &DeviceStatusTracker, index: u16) -> DeviceId {
    let device_id = DeviceId::new(format!("sensor-{index:02}"));
    let [hi, lo] = index.to_be_bytes();
    tracker.register_device(
        device_id.clone(),
        MacAddress::new(format!("00:06:66:00:{hi:02X}:{lo:02X}")),
        format!("Sensor {index}"),
        "Classic",
    );
    device_id
}

fn battery_for(index: u16) -> u8 {
    let drain = u8::try_from(index).unwrap_or(u8::MAX).saturating_mul(7);
    100u8.saturating_sub(drain).max(5)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn drive_device(
    manager: ConnectionManager,
    tracker: DeviceStatusTracker,
    script: DeviceScript,
) {
    let device = &script.device_id;
    tracker.update_connection_state(device, ConnectionState::Connecting);

    match manager.connect_with_retry(device, script.link.connector()).await {
        Ok(true) => {}
        Ok(false) => {
            tracker.record_error(device, "retry budget exhausted");
            tracker.update_connection_state(device, ConnectionState::Reconnecting);
            manager.start_auto_reconnection(device.clone(), script.link.connector());
            return;
        }
        Err(err) => {
            if !err.is_cancelled() {
                tracker.record_error(device, err.to_string());
                tracker.update_connection_state(device, ConnectionState::Error);
            }
            return;
        }
    }

    tracker.update_connection_state(device, ConnectionState::Connected);
    tracker.update_device_info(
        device,
        DeviceInfoUpdate::default()
            .battery_level(script.battery)
            .firmware_version("0.16.0")
            .hardware_version("3r")
            .sampling_rate(1.0 / script.packet_interval.as_secs_f64())
            .enabled_sensors(["accel", "gyro", "mag"])
            .paired_with_host(true),
    );
    tracker.update_operating_mode(device, OperatingMode::Streaming);
    manager.start_health_monitoring(device.clone());
    manager.start_auto_reconnection(device.clone(), script.link.connector());

    let mut ticker = tokio::time::interval(script.packet_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut silent = false;
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(script.deadline) => break,
            _ = ticker.tick() => {
                if script.silent_from.is_some_and(|t| Instant::now() >= t) {
                    if !silent {
                        info!(device_id = %device, "device went silent");
                        silent = true;
                    }
                    continue;
                }
                tracker.record_packet_received(device);
            }
        }
    }
}

async fn feed_quality(rate: Arc<AdaptiveRateController>, script: Vec<u8>, duration: Duration) {
    let steps = u32::try_from(script.len()).unwrap_or(u32::MAX).max(1);
    let step = duration / steps;
    for (i, score) in script.into_iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(step).await;
        }
        let sample = QualitySample::new(score)
            .with_latency(u64::from(6u8.saturating_sub(score)) * 40)
            .with_bandwidth(f64::from(score) * 250.0);
        let adapted = rate.on_quality_changed(sample);
        debug!(score, adapted, "quality sample fed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_link_fails_then_connects() {
        let connect = ScriptedLink::new(2).connector();
        assert!(connect().into_inner().is_err());
        assert!(connect().into_inner().is_err());
        assert!(matches!(connect().into_inner(), Ok(true)));
    }

    #[test]
    fn battery_drains_with_index() {
        assert_eq!(battery_for(1), 93);
        assert_eq!(battery_for(3), 79);
        assert_eq!(battery_for(60), 5);
    }
}
