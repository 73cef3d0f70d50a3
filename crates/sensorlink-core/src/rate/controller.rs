// ── Adaptive rate controller ──
//
// Closed loop from an external quality score to a frame rate. A score
// only moves the rate when three gates agree: enough time since the last
// adaptation, a large enough change from the last adapted score, and a
// stable run of recent scores around the new one. Manual mode suspends
// the loop until adaptive mode is re-enabled.
//
// State sits behind a std Mutex that is never held across listener
// calls or awaits. The controller spawns no tasks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::RateControllerConfig;
use crate::listener::{self, ListenerId, ListenerRegistry};
use crate::lock;
use crate::model::{AdaptationStatistics, FrameRateSettings, QualitySample};

/// Reason delivered to a listener when it subscribes.
pub const INITIAL_STATE_REASON: &str = "Initial state";

/// Receives rate and mode changes from an [`AdaptiveRateController`].
pub trait FrameRateChangeListener: Send + Sync {
    fn on_frame_rate_changed(&self, new_rate: f64, reason: &str);

    fn on_adaptation_mode_changed(&self, is_adaptive: bool);
}

struct ControllerState {
    settings: FrameRateSettings,
    last_adaptation: Option<Instant>,
    history: VecDeque<u8>,
    last_quality: Option<QualitySample>,
}

struct RateChange {
    rate: f64,
    reason: String,
}

pub struct AdaptiveRateController {
    config: RateControllerConfig,
    state: Mutex<ControllerState>,
    listeners: ListenerRegistry<dyn FrameRateChangeListener>,
    settings_tx: watch::Sender<FrameRateSettings>,
    active: AtomicBool,
}

impl AdaptiveRateController {
    pub fn new(config: RateControllerConfig) -> Self {
        let initial_rate = config.initial_rate();
        let settings = FrameRateSettings {
            current_rate: initial_rate,
            target_rate: initial_rate,
            quality_score: config.default_quality,
            is_adaptive: true,
            last_adaptation_time: None,
            adaptation_count: 0,
        };
        let (settings_tx, _) = watch::channel(settings.clone());
        Self {
            state: Mutex::new(ControllerState {
                settings,
                last_adaptation: None,
                history: VecDeque::with_capacity(config.stability_window * 2),
                last_quality: None,
            }),
            config,
            listeners: ListenerRegistry::new(),
            settings_tx,
            active: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RateControllerConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        lock(&self.state)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Begin reacting to quality samples.
    pub fn start(&self) {
        if self.active.swap(true, Ordering::AcqRel) {
            debug!("adaptive rate controller already active");
            return;
        }
        let settings = self.current_settings();
        info!(
            rate = settings.current_rate,
            adaptive = settings.is_adaptive,
            "adaptive rate controller started"
        );
    }

    /// Stop reacting to quality samples. The current rate is kept.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            info!("adaptive rate controller stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    // ── Listeners ────────────────────────────────────────────────

    /// Register a listener. It immediately receives the current rate and
    /// mode, before this call returns.
    pub fn add_listener(&self, listener: Arc<dyn FrameRateChangeListener>) -> ListenerId {
        let id = self.listeners.add(Arc::clone(&listener));
        let settings = self.current_settings();
        listener::deliver(id, &*listener, "initial state", |l| {
            l.on_frame_rate_changed(settings.current_rate, INITIAL_STATE_REASON);
        });
        listener::deliver(id, &*listener, "initial state", |l| {
            l.on_adaptation_mode_changed(settings.is_adaptive);
        });
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Settings updates for reactive consumers. The receiver starts with
    /// the current settings.
    pub fn watch_settings(&self) -> watch::Receiver<FrameRateSettings> {
        self.settings_tx.subscribe()
    }

    fn publish_rate(&self, change: RateChange) {
        self.listeners.notify("frame rate changed", |l| {
            l.on_frame_rate_changed(change.rate, &change.reason);
        });
    }

    fn publish_mode(&self, is_adaptive: bool) {
        self.listeners
            .notify("adaptation mode changed", |l| l.on_adaptation_mode_changed(is_adaptive));
    }

    // ── Adaptation ───────────────────────────────────────────────

    /// Feed one quality reading. Returns whether the rate changed.
    ///
    /// Ignored while the controller is stopped or in manual mode.
    pub fn on_quality_changed(&self, sample: QualitySample) -> bool {
        if !self.is_active() {
            trace!(score = sample.score, "controller inactive, quality sample ignored");
            return false;
        }

        let now = Instant::now();
        let change = {
            let mut state = self.state();
            state.last_quality = Some(sample);
            if !state.settings.is_adaptive {
                trace!(score = sample.score, "manual mode, quality sample ignored");
                return false;
            }
            push_bounded(&mut state.history, sample.score, self.history_capacity());
            if !self.gate_allows(&state, &state.history, sample.score, now) {
                trace!(score = sample.score, "adaptation gated");
                return false;
            }

            state.settings.quality_score = sample.score;
            let target = self.config.rate_table.rate_for(sample.score);
            let reason = format!("Quality {} -> {target}fps", sample.score);
            let change = self.update_frame_rate(&mut state, target, reason, now);
            self.commit(&state);
            change
        };

        change.is_some_and(|change| {
            self.publish_rate(change);
            true
        })
    }

    /// Whether `new_score`, if it arrived now, would move the rate.
    /// Does not record the score.
    pub fn should_adapt(&self, new_score: u8) -> bool {
        let state = self.state();
        if !state.settings.is_adaptive {
            return false;
        }
        let mut preview = state.history.clone();
        push_bounded(&mut preview, new_score, self.history_capacity());
        self.gate_allows(&state, &preview, new_score, Instant::now())
    }

    fn history_capacity(&self) -> usize {
        self.config.stability_window.saturating_mul(2).max(1)
    }

    /// `history` must already contain `score` as its newest entry.
    fn gate_allows(
        &self,
        state: &ControllerState,
        history: &VecDeque<u8>,
        score: u8,
        now: Instant,
    ) -> bool {
        if let Some(last) = state.last_adaptation {
            if now.saturating_duration_since(last) < self.config.adaptation_delay {
                return false;
            }
        }
        if score.abs_diff(state.settings.quality_score) < self.config.hysteresis_threshold {
            return false;
        }
        let window = self.config.stability_window;
        history.len() >= window
            && history
                .iter()
                .rev()
                .take(window)
                .all(|recent| recent.abs_diff(score) <= 1)
    }

    /// The only place the rate moves. No-op if `rate` is already in effect.
    fn update_frame_rate(
        &self,
        state: &mut ControllerState,
        rate: f64,
        reason: String,
        now: Instant,
    ) -> Option<RateChange> {
        let previous = state.settings.current_rate;
        if (rate - previous).abs() < f64::EPSILON {
            return None;
        }
        state.settings.current_rate = rate;
        state.settings.target_rate = rate;
        state.settings.adaptation_count += 1;
        state.settings.last_adaptation_time = Some(Utc::now());
        state.last_adaptation = Some(now);
        info!(
            from = previous,
            to = rate,
            reason = %reason,
            adaptations = state.settings.adaptation_count,
            "frame rate changed"
        );
        Some(RateChange { rate, reason })
    }

    fn commit(&self, state: &ControllerState) {
        self.settings_tx.send_replace(state.settings.clone());
    }

    // ── Modes ────────────────────────────────────────────────────

    /// Switch to manual mode at `rate`, clamped to the configured bounds.
    /// Returns the rate applied.
    pub fn set_manual_rate(&self, rate: f64) -> f64 {
        let applied = self.config.clamp_rate(rate);
        let now = Instant::now();
        let (change, was_adaptive) = {
            let mut state = self.state();
            let was_adaptive = std::mem::replace(&mut state.settings.is_adaptive, false);
            let reason = format!("Manual override to {applied}fps");
            let change = self.update_frame_rate(&mut state, applied, reason, now);
            self.commit(&state);
            (change, was_adaptive)
        };

        info!(requested = rate, applied, "manual frame rate set");
        if let Some(change) = change {
            self.publish_rate(change);
        }
        if was_adaptive {
            self.publish_mode(false);
        }
        applied
    }

    /// Leave manual mode and re-evaluate against the last known quality.
    pub fn enable_adaptive_mode(&self) {
        let now = Instant::now();
        let (change, score) = {
            let mut state = self.state();
            if state.settings.is_adaptive {
                debug!("adaptive mode already enabled");
                return;
            }
            state.settings.is_adaptive = true;
            let score = state
                .last_quality
                .map_or(state.settings.quality_score, |q| q.score);
            state.settings.quality_score = score;
            let target = self.config.rate_table.rate_for(score);
            let reason = format!("Adaptive mode enabled at quality {score}");
            let change = self.update_frame_rate(&mut state, target, reason, now);
            self.commit(&state);
            (change, score)
        };

        info!(quality = score, "adaptive mode enabled");
        self.publish_mode(true);
        if let Some(change) = change {
            self.publish_rate(change);
        }
    }

    // ── Snapshots ────────────────────────────────────────────────

    pub fn current_settings(&self) -> FrameRateSettings {
        self.state().settings.clone()
    }

    pub fn current_rate(&self) -> f64 {
        self.state().settings.current_rate
    }

    pub fn is_adaptive(&self) -> bool {
        self.state().settings.is_adaptive
    }

    pub fn adaptation_statistics(&self) -> AdaptationStatistics {
        let state = self.state();
        AdaptationStatistics {
            current_rate: state.settings.current_rate,
            target_rate: state.settings.target_rate,
            is_adaptive: state.settings.is_adaptive,
            is_active: self.is_active(),
            quality_score: state.settings.quality_score,
            last_quality: state.last_quality,
            adaptation_count: state.settings.adaptation_count,
            last_adaptation_time: state.settings.last_adaptation_time,
            recent_scores: state.history.iter().copied().collect(),
        }
    }

    /// Zero the adaptation counter and forget when the last adaptation
    /// happened. Rate, mode and score history are kept.
    pub fn reset_statistics(&self) {
        let mut state = self.state();
        state.settings.adaptation_count = 0;
        state.settings.last_adaptation_time = None;
        state.last_adaptation = None;
        self.commit(&state);
        drop(state);
        info!("adaptation statistics reset");
    }
}

fn push_bounded(history: &mut VecDeque<u8>, score: u8, capacity: usize) {
    while history.len() >= capacity {
        history.pop_front();
    }
    history.push_back(score);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn started() -> AdaptiveRateController {
        let controller = AdaptiveRateController::new(RateControllerConfig::default());
        controller.start();
        controller
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn starts_at_default_tier() {
        let controller = AdaptiveRateController::new(RateControllerConfig::default());
        let settings = controller.current_settings();
        assert!(close(settings.current_rate, 2.0));
        assert_eq!(settings.quality_score, 3);
        assert!(settings.is_adaptive);
        assert!(!controller.is_active());
    }

    #[test]
    fn inactive_controller_ignores_samples() {
        let controller = AdaptiveRateController::new(RateControllerConfig::default());
        for _ in 0..5 {
            assert!(!controller.on_quality_changed(QualitySample::new(5)));
        }
        assert!(close(controller.current_rate(), 2.0));
        assert!(controller.adaptation_statistics().last_quality.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stable_run_is_required_before_adapting() {
        let controller = started();
        let outcomes: Vec<bool> = [3, 3, 3, 5, 5, 5]
            .into_iter()
            .map(|s| controller.on_quality_changed(QualitySample::new(s)))
            .collect();
        assert_eq!(outcomes, vec![false, false, false, false, false, true]);
        assert!(close(controller.current_rate(), 5.0));
        assert_eq!(controller.current_settings().adaptation_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn adaptation_delay_spaces_changes() {
        let controller = started();
        for _ in 0..3 {
            controller.on_quality_changed(QualitySample::new(5));
        }
        assert!(close(controller.current_rate(), 5.0));

        for _ in 0..3 {
            assert!(!controller.on_quality_changed(QualitySample::new(1)));
        }
        assert!(!controller.should_adapt(1));

        tokio::time::advance(Duration::from_millis(3_000)).await;
        assert!(controller.should_adapt(1));
        assert!(controller.on_quality_changed(QualitySample::new(1)));
        assert!(close(controller.current_rate(), 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn small_wobble_does_not_break_stability() {
        let controller = started();
        let rates: Vec<bool> = [5, 4, 5]
            .into_iter()
            .map(|s| controller.on_quality_changed(QualitySample::new(s)))
            .collect();
        assert_eq!(rates, vec![false, false, true]);
        assert!(close(controller.current_rate(), 5.0));
    }

    #[test]
    fn should_adapt_does_not_record() {
        let controller = started();
        assert!(!controller.should_adapt(5));
        assert!(controller.adaptation_statistics().recent_scores.is_empty());
    }

    #[test]
    fn history_is_bounded_to_twice_the_window() {
        let controller = started();
        for _ in 0..20 {
            controller.on_quality_changed(QualitySample::new(3));
        }
        assert_eq!(controller.adaptation_statistics().recent_scores.len(), 6);
    }

    #[test]
    fn manual_override_clamps_and_suspends() {
        let controller = started();
        assert!(close(controller.set_manual_rate(7.5), 7.5));
        let settings = controller.current_settings();
        assert!(close(settings.current_rate, 7.5));
        assert!(!settings.is_adaptive);

        for _ in 0..5 {
            assert!(!controller.on_quality_changed(QualitySample::new(1)));
        }
        assert!(close(controller.current_rate(), 7.5));

        assert!(close(controller.set_manual_rate(-1.0), 0.1));
        assert!(close(controller.set_manual_rate(99.0), 10.0));
    }

    #[test]
    fn enabling_adaptive_uses_last_quality() {
        let controller = started();
        controller.set_manual_rate(7.5);
        controller.on_quality_changed(QualitySample::new(4));

        controller.enable_adaptive_mode();

        let settings = controller.current_settings();
        assert!(settings.is_adaptive);
        assert!(close(settings.current_rate, 3.0));
        assert_eq!(settings.quality_score, 4);
    }

    #[test]
    fn reset_keeps_rate() {
        let controller = started();
        controller.set_manual_rate(4.0);
        controller.reset_statistics();
        let settings = controller.current_settings();
        assert_eq!(settings.adaptation_count, 0);
        assert!(settings.last_adaptation_time.is_none());
        assert!(close(settings.current_rate, 4.0));
    }

    #[test]
    fn watch_receiver_sees_updates() {
        let controller = started();
        let rx = controller.watch_settings();
        controller.set_manual_rate(6.0);
        assert!(rx.has_changed().unwrap());
        assert!(close(rx.borrow().current_rate, 6.0));
    }

    #[test]
    fn statistics_display_labels() {
        let controller = started();
        controller.on_quality_changed(QualitySample::new(4).with_latency(40).with_bandwidth(900.0));
        let text = controller.adaptation_statistics().to_string();
        for label in [
            "Current Frame Rate",
            "Target Frame Rate",
            "Adaptive Mode",
            "Network Quality",
            "Total Adaptations",
            "Last Adaptation",
        ] {
            assert!(text.contains(label), "missing {label} in {text}");
        }
        assert!(text.contains("4/5 (40 ms, 900 kbps)"));
    }
}
