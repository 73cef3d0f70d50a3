#![allow(clippy::unwrap_used)]
// Integration tests for `AdaptiveRateController`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sensorlink_core::{
    AdaptiveRateController, FrameRateChangeListener, QualitySample, RateControllerConfig,
    RateTable,
};

// ── Helpers ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl FrameRateChangeListener for Recorder {
    fn on_frame_rate_changed(&self, new_rate: f64, reason: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("rate {new_rate}: {reason}"));
    }

    fn on_adaptation_mode_changed(&self, is_adaptive: bool) {
        self.events
            .lock()
            .unwrap()
            .push(format!("adaptive {is_adaptive}"));
    }
}

struct Faulty;

impl FrameRateChangeListener for Faulty {
    fn on_frame_rate_changed(&self, _new_rate: f64, _reason: &str) {
        panic!("listener bug");
    }

    fn on_adaptation_mode_changed(&self, _is_adaptive: bool) {}
}

fn feed(controller: &AdaptiveRateController, scores: &[u8]) -> Vec<bool> {
    scores
        .iter()
        .map(|s| controller.on_quality_changed(QualitySample::new(*s)))
        .collect()
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ── Gating ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_single_jump_waits_for_stability() {
    let controller = AdaptiveRateController::new(RateControllerConfig::default());
    controller.start();

    assert_eq!(feed(&controller, &[3, 3, 3, 5]), vec![false; 4]);
    assert!(close(controller.current_rate(), 2.0));

    assert_eq!(feed(&controller, &[5, 5]), vec![false, true]);
    assert!(close(controller.current_rate(), 5.0));
}

#[tokio::test(start_paused = true)]
async fn test_oscillating_quality_does_not_thrash() {
    let controller = AdaptiveRateController::new(RateControllerConfig::default());
    controller.start();

    for _ in 0..10 {
        feed(&controller, &[1, 5]);
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    assert_eq!(controller.current_settings().adaptation_count, 0);
    assert!(close(controller.current_rate(), 2.0));
}

#[tokio::test(start_paused = true)]
async fn test_custom_table_and_window() {
    let controller = AdaptiveRateController::new(RateControllerConfig {
        stability_window: 1,
        adaptation_delay: Duration::from_millis(500),
        rate_table: RateTable::new([1.0, 2.0, 4.0, 8.0, 9.0]),
        ..RateControllerConfig::default()
    });
    controller.start();

    assert!(controller.on_quality_changed(QualitySample::new(1)));
    assert!(close(controller.current_rate(), 1.0));
    assert!(!controller.on_quality_changed(QualitySample::new(4)));

    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(controller.on_quality_changed(QualitySample::new(4)));
    assert!(close(controller.current_rate(), 8.0));
}

// ── Modes and listeners ─────────────────────────────────────────────

#[test]
fn test_subscribe_delivers_current_state() {
    let controller = AdaptiveRateController::new(RateControllerConfig::default());
    let recorder = Arc::new(Recorder::default());

    controller.add_listener(recorder.clone());

    assert_eq!(recorder.take(), vec!["rate 2: Initial state", "adaptive true"]);
}

#[test]
fn test_manual_override_round_trip() {
    let controller = AdaptiveRateController::new(RateControllerConfig::default());
    controller.start();
    let recorder = Arc::new(Recorder::default());
    controller.add_listener(recorder.clone());
    recorder.take();

    controller.set_manual_rate(7.5);
    assert_eq!(
        recorder.take(),
        vec!["rate 7.5: Manual override to 7.5fps", "adaptive false"]
    );
    let settings = controller.current_settings();
    assert!(close(settings.current_rate, 7.5));
    assert!(!settings.is_adaptive);

    assert!(!controller.on_quality_changed(QualitySample::new(5)));
    assert!(recorder.take().is_empty());

    controller.enable_adaptive_mode();
    assert_eq!(
        recorder.take(),
        vec!["adaptive true", "rate 5: Adaptive mode enabled at quality 5"]
    );
    assert!(controller.is_adaptive());
}

#[test]
fn test_faulty_listener_is_isolated() {
    let controller = AdaptiveRateController::new(RateControllerConfig::default());
    controller.add_listener(Arc::new(Faulty));
    let recorder = Arc::new(Recorder::default());
    controller.add_listener(recorder.clone());
    recorder.take();

    controller.set_manual_rate(3.5);

    assert!(recorder.take().contains(&"rate 3.5: Manual override to 3.5fps".to_owned()));
    assert!(close(controller.current_rate(), 3.5));
}

#[test]
fn test_stop_keeps_rate_and_ignores_samples() {
    let controller = AdaptiveRateController::new(RateControllerConfig::default());
    controller.start();
    controller.set_manual_rate(4.0);
    controller.enable_adaptive_mode();
    let before = controller.current_rate();

    controller.stop();
    assert!(!controller.is_active());
    assert_eq!(feed(&controller, &[1, 1, 1, 1]), vec![false; 4]);
    assert!(close(controller.current_rate(), before));
}

#[test]
fn test_statistics_snapshot_serializes() {
    let controller = AdaptiveRateController::new(RateControllerConfig::default());
    controller.start();
    controller.set_manual_rate(6.0);

    let stats = controller.adaptation_statistics();
    assert_eq!(stats.adaptation_count, 1);
    assert!(stats.last_adaptation_time.is_some());
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["is_adaptive"], false);
    assert_eq!(json["is_active"], true);

    controller.reset_statistics();
    let stats = controller.adaptation_statistics();
    assert_eq!(stats.adaptation_count, 0);
    assert!(stats.last_adaptation_time.is_none());
}
