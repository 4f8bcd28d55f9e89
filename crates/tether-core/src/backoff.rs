//! Bounded exponential reconnection backoff.
//!
//! The delay before retry `n` (0-based) is `base_delay * 2^min(n, exponent_cap)`.
//! After `max_attempts` retries without a successful authentication the policy
//! is exhausted and the caller must start a fresh cycle.

use std::time::Duration;

use tracing::debug;

/// Largest shift applied to the base delay, keeps `2^n` inside `u32`.
const MAX_SHIFT: u32 = 31;

/// Policy controlling reconnection attempts and backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Exponent ceiling; delays stop growing after this many retries.
    pub exponent_cap: u32,
    /// Maximum number of retries before giving up.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay to wait before retry `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(self.exponent_cap).min(MAX_SHIFT);
        self.base_delay.saturating_mul(1_u32 << shift)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay: Duration::from_secs(1), exponent_cap: 5, max_attempts: 5 }
    }
}

/// Attempt counter driven by a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    /// Create a counter at zero attempts.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// The policy this counter follows.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `true` once the ceiling has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Claim the next retry.
    ///
    /// Returns the delay for that retry and increments the counter, or `None`
    /// when the ceiling has been reached (the counter is left unchanged).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            debug!(attempts = self.attempts, max = self.policy.max_attempts, "backoff exhausted");
            return None;
        }

        let delay = self.policy.delay_for_attempt(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Reset to zero attempts.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn policy(base_ms: u64, cap: u32, max: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(base_ms),
            exponent_cap: cap,
            max_attempts: max,
        }
    }

    #[test]
    fn default_sequence_doubles() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );
        assert!(backoff.is_exhausted());
    }

    #[test]
    fn delay_stops_growing_at_cap() {
        let p = policy(100, 2, 10);
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(p.delay_for_attempt(9), Duration::from_millis(400));
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(policy(10, 5, 2));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn zero_ceiling_never_retries() {
        let mut backoff = Backoff::new(policy(10, 5, 0));
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempts(), 0);
    }

    #[test]
    fn huge_exponent_saturates() {
        let p = ReconnectPolicy {
            base_delay: Duration::from_secs(u64::MAX / 2),
            exponent_cap: 64,
            max_attempts: 100,
        };
        assert_eq!(p.delay_for_attempt(64), Duration::MAX);
    }

    proptest! {
        #[test]
        fn delays_strictly_increase_up_to_cap(
            base_ms in 1u64..10_000,
            cap in 0u32..12,
            max in 0u32..20,
        ) {
            let p = policy(base_ms, cap, max);
            let mut backoff = Backoff::new(p);
            let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();

            prop_assert_eq!(delays.len() as u32, max);
            for (n, pair) in delays.windows(2).enumerate() {
                let next = n as u32 + 1;
                if next <= cap {
                    prop_assert!(pair[1] > pair[0]);
                } else {
                    prop_assert_eq!(pair[1], pair[0]);
                }
            }
            for (n, delay) in delays.iter().enumerate() {
                let expected = Duration::from_millis(base_ms) * (1_u32 << (n as u32).min(cap));
                prop_assert_eq!(*delay, expected);
            }
        }
    }
}
