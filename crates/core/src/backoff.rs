//! Retry backoff policy.
//!
//! The delay for attempt `n` is `first * factor^n`, clamped to `max`.
//! Because the base delay is derived purely from the attempt number,
//! jitter never feeds back into subsequent calculations.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with an optional full-jitter component.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0`).
    pub factor: f64,
    /// When set, the returned delay is drawn uniformly from
    /// `[base/2, base]` to spread retries from concurrent callers.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    /// 500ms initial delay, doubling per attempt, capped at 30s, jittered.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Constant-delay policy; used where predictability matters more than
    /// spread (tests, tight publish retries).
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: false,
        }
    }

    /// Compute the delay before retry `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }

        let base_ms = base.as_millis() as u64;
        if base_ms == 0 {
            return base;
        }
        let jittered = rand::rng().random_range(base_ms / 2..=base_ms);
        Duration::from_millis(jittered)
    }

    /// The un-jittered delay: `first * factor^attempt`, clamped to `max`.
    fn base_delay(&self, attempt: u32) -> Duration {
        let first_ms = self.first.as_millis() as f64;
        let scaled = first_ms * self.factor.powi(attempt.min(63) as i32);
        let capped = scaled.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(first_ms: u64, max_secs: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_secs(max_secs),
            factor,
            jitter: false,
        }
    }

    #[test]
    fn first_attempt_uses_initial_delay() {
        let policy = no_jitter(100, 10, 2.0);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
    }

    #[test]
    fn delay_grows_by_factor() {
        let policy = no_jitter(100, 10, 2.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = no_jitter(100, 1, 2.0);
        // 100ms * 2^10 = 102_400ms, capped at 1s.
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = no_jitter(100, 30, 2.0);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_half_to_full_base() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(1000),
            max: Duration::from_secs(10),
            factor: 1.0,
            jitter: true,
        };
        for _ in 0..50 {
            let d = policy.delay_for(0);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn constant_policy_never_grows() {
        let policy = BackoffPolicy::constant(Duration::from_millis(250));
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(9), Duration::from_millis(250));
    }
}
