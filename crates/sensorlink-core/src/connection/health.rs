// ── Per-device connection health ──
//
// A bounded log of connection attempts and the health record derived
// from it. Plain data: the manager serializes access per device.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::config::ConnectionPolicy;
use crate::model::{ConnectionAttempt, ConnectionHealth, ConnectionStatistics, DeviceId};

#[derive(Debug, Clone)]
struct AttemptRecord {
    attempt: ConnectionAttempt,
    at: Instant,
}

/// Attempt history and derived health for one device.
#[derive(Debug, Clone)]
pub struct ConnectionHealthStore {
    device_id: DeviceId,
    attempts: VecDeque<AttemptRecord>,
    capacity: usize,
    window: Duration,
    total_attempts: u64,
    successful_attempts: u64,
    signal_strength: i32,
    health: Option<ConnectionHealth>,
}

impl ConnectionHealthStore {
    pub fn new(device_id: DeviceId, policy: &ConnectionPolicy) -> Self {
        Self {
            device_id,
            attempts: VecDeque::new(),
            capacity: policy.max_attempt_history.max(1),
            window: policy.health_window,
            total_attempts: 0,
            successful_attempts: 0,
            signal_strength: 0,
            health: None,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Append an attempt and re-derive health from it. The attempt's
    /// outcome becomes the device's health.
    pub fn record(&mut self, attempt: ConnectionAttempt, now: Instant) -> &ConnectionHealth {
        let success = attempt.success;
        let timestamp = attempt.timestamp;
        if self.attempts.len() == self.capacity {
            self.attempts.pop_front();
        }
        self.attempts.push_back(AttemptRecord { attempt, at: now });
        self.total_attempts += 1;
        if success {
            self.successful_attempts += 1;
        }
        self.derive(success, timestamp, now)
    }

    fn derive(&mut self, healthy: bool, timestamp: DateTime<Utc>, now: Instant) -> &ConnectionHealth {
        let previous = self.health.take();
        let consecutive_failures = if healthy {
            0
        } else {
            previous
                .as_ref()
                .map_or(0, |h| h.consecutive_failures)
                .saturating_add(1)
        };
        let last_successful_connection = if healthy {
            Some(timestamp)
        } else {
            previous.as_ref().and_then(|h| h.last_successful_connection)
        };

        let (average_connection_time_ms, packet_loss_rate_percent) = self.window_stats(now);

        self.health.insert(ConnectionHealth {
            device_id: self.device_id.clone(),
            is_healthy: healthy,
            last_successful_connection,
            consecutive_failures,
            average_connection_time_ms,
            packet_loss_rate_percent,
            signal_strength: self.signal_strength,
        })
    }

    /// Mean duration and failure share of the attempts inside the window.
    fn window_stats(&self, now: Instant) -> (u64, f64) {
        let recent: Vec<&ConnectionAttempt> = self
            .attempts
            .iter()
            .filter(|r| now.saturating_duration_since(r.at) <= self.window)
            .map(|r| &r.attempt)
            .collect();
        if recent.is_empty() {
            return (0, 0.0);
        }
        let count = u64::try_from(recent.len()).unwrap_or(u64::MAX);
        let total_ms: u64 = recent.iter().map(|a| a.duration_ms).sum();
        let failures = u64::try_from(recent.iter().filter(|a| !a.success).count()).unwrap_or(0);
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let loss = failures as f64 / count as f64 * 100.0;
        (total_ms / count, loss)
    }

    pub fn set_signal_strength(&mut self, dbm: i32) {
        self.signal_strength = dbm;
        if let Some(health) = self.health.as_mut() {
            health.signal_strength = dbm;
        }
    }

    pub fn health(&self) -> Option<&ConnectionHealth> {
        self.health.as_ref()
    }

    pub fn is_healthy(&self) -> Option<bool> {
        self.health.as_ref().map(|h| h.is_healthy)
    }

    /// Retained attempts, oldest first.
    pub fn attempts(&self) -> impl Iterator<Item = &ConnectionAttempt> {
        self.attempts.iter().map(|r| &r.attempt)
    }

    pub fn retained_attempts(&self) -> usize {
        self.attempts.len()
    }

    pub fn statistics(&self) -> ConnectionStatistics {
        let mut stats = ConnectionStatistics::empty(self.device_id.clone());
        stats.total_attempts = self.total_attempts;
        stats.successful_attempts = self.successful_attempts;
        stats.failed_attempts = self.total_attempts - self.successful_attempts;
        if let Some(h) = &self.health {
            stats.average_connection_time_ms = h.average_connection_time_ms;
            stats.consecutive_failures = h.consecutive_failures;
            stats.packet_loss_rate_percent = h.packet_loss_rate_percent;
            stats.is_healthy = h.is_healthy;
            stats.last_successful_connection = h.last_successful_connection;
        }
        stats
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn attempt(n: u32, success: bool, duration_ms: u64) -> ConnectionAttempt {
        ConnectionAttempt {
            device_id: DeviceId::from("d1"),
            attempt_number: n,
            timestamp: Utc::now(),
            success,
            error_message: (!success).then(|| "refused".to_owned()),
            duration_ms,
        }
    }

    fn store(capacity: usize) -> ConnectionHealthStore {
        let policy = ConnectionPolicy {
            max_attempt_history: capacity,
            ..ConnectionPolicy::default()
        };
        ConnectionHealthStore::new(DeviceId::from("d1"), &policy)
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_failures_grow_then_reset() {
        let mut store = store(16);
        let now = Instant::now();
        for (n, expected) in [(1, 1), (2, 2), (3, 3)] {
            let health = store.record(attempt(n, false, 10), now);
            assert!(!health.is_healthy);
            assert_eq!(health.consecutive_failures, expected);
        }
        let health = store.record(attempt(4, true, 10), now);
        assert!(health.is_healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_successful_connection.is_some());

        let health = store.record(attempt(1, false, 10), now);
        assert_eq!(health.consecutive_failures, 1);
        assert!(health.last_successful_connection.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn window_excludes_old_attempts() {
        let mut store = store(16);
        let start = Instant::now();
        store.record(attempt(1, false, 1_000), start);
        store.record(attempt(2, false, 1_000), start);

        tokio::time::advance(Duration::from_secs(301)).await;
        let health = store.record(attempt(1, true, 200), Instant::now()).clone();

        assert_eq!(health.average_connection_time_ms, 200);
        assert!(health.packet_loss_rate_percent.abs() < f64::EPSILON);
        let stats = store.statistics();
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.failed_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loss_rate_counts_failures_in_window() {
        let mut store = store(16);
        let now = Instant::now();
        store.record(attempt(1, false, 100), now);
        store.record(attempt(2, false, 300), now);
        store.record(attempt(3, true, 200), now);
        store.record(attempt(4, true, 200), now);
        let health = store.health().unwrap();
        assert!((health.packet_loss_rate_percent - 50.0).abs() < 1e-9);
        assert_eq!(health.average_connection_time_ms, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_bounded_but_totals_are_not() {
        let mut store = store(4);
        let now = Instant::now();
        for n in 1..=10 {
            store.record(attempt(n, n % 2 == 0, 5), now);
        }
        assert_eq!(store.retained_attempts(), 4);
        assert_eq!(store.attempts().next().unwrap().attempt_number, 7);
        assert_eq!(store.statistics().total_attempts, 10);
        assert_eq!(store.statistics().successful_attempts, 5);
    }

    #[test]
    fn signal_strength_carries_into_health() {
        let mut store = store(4);
        store.set_signal_strength(-61);
        assert!(store.health().is_none());
        let now = Instant::now();
        assert_eq!(store.record(attempt(1, true, 5), now).signal_strength, -61);
        store.set_signal_strength(-70);
        assert_eq!(store.health().unwrap().signal_strength, -70);
    }
}
