// ── Retry backoff ──
//
// Delays between connection attempts. With exponential backoff every
// delay is half again the previous one, truncated to whole milliseconds
// and capped at the policy ceiling. Without it the initial delay repeats.

use std::time::Duration;

use crate::config::ConnectionPolicy;

/// Iterator over the delays of one retry sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    exponential: bool,
}

impl Backoff {
    pub fn new(policy: &ConnectionPolicy) -> Self {
        Self {
            next: policy.initial_retry_delay,
            max: policy.max_retry_delay,
            exponential: policy.exponential_backoff,
        }
    }

    /// The delay the next call to [`Iterator::next`] will yield.
    pub fn peek(&self) -> Duration {
        self.next
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        if self.exponential {
            let millis = u64::try_from(current.as_millis()).unwrap_or(u64::MAX);
            self.next = Duration::from_millis(millis.saturating_mul(3) / 2).min(self.max);
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn default_policy_sequence() {
        let delays: Vec<Duration> = Backoff::new(&ConnectionPolicy::default()).take(9).collect();
        assert_eq!(
            delays,
            vec![
                ms(2_000),
                ms(3_000),
                ms(4_500),
                ms(6_750),
                ms(10_125),
                ms(15_187),
                ms(22_780),
                ms(30_000),
                ms(30_000),
            ]
        );
    }

    #[test]
    fn each_delay_is_previous_times_one_and_a_half_capped() {
        let policy = ConnectionPolicy {
            initial_retry_delay: ms(100),
            max_retry_delay: ms(1_000),
            ..ConnectionPolicy::default()
        };
        let delays: Vec<Duration> = Backoff::new(&policy).take(12).collect();
        assert_eq!(delays[0], ms(100));
        for pair in delays.windows(2) {
            let grown = ms(u64::try_from(pair[0].as_millis()).unwrap_or(0) * 3 / 2);
            assert_eq!(pair[1], grown.min(ms(1_000)));
        }
    }

    #[test]
    fn constant_delay_without_exponential_backoff() {
        let policy = ConnectionPolicy {
            exponential_backoff: false,
            ..ConnectionPolicy::default()
        };
        let mut backoff = Backoff::new(&policy);
        assert!(backoff.by_ref().take(5).all(|d| d == ms(2_000)));
        assert_eq!(backoff.peek(), ms(2_000));
    }
}
