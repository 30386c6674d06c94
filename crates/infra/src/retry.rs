//! Per-step execution policy: timeout and retry/backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use shopforge_saga::FailureKind;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// base * 2^(attempt-1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
}

/// Retry policy for one step.
///
/// `max_attempts` counts every execution of the step, the first one included,
/// so `1` means "never retry".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap applied after the strategy; never below `base_delay`.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after the failed attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let Some(retries_so_far) = attempt.checked_sub(1) else {
            return Duration::ZERO;
        };

        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(retries_so_far).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        let delay = raw.min(self.max_delay.max(self.base_delay));

        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        // Walk the band [-jitter, +jitter] deterministically, per attempt.
        let position = f64::from(attempt.wrapping_mul(37) % 101) / 100.0;
        let factor = (1.0 + self.jitter.min(1.0) * (2.0 * position - 1.0)).max(0.0);
        delay.mul_f64(factor)
    }

    /// Whether another attempt is allowed after `attempts_made` failed with `kind`.
    ///
    /// Only transient failures are retried: a rejected request fails the same
    /// way the second time.
    pub fn should_retry(&self, attempts_made: u32, kind: FailureKind) -> bool {
        attempts_made < self.max_attempts && is_transient(kind)
    }
}

pub fn is_transient(kind: FailureKind) -> bool {
    matches!(kind, FailureKind::Unavailable | FailureKind::Timeout)
}

/// How the executor runs one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPolicy {
    /// Upper bound for one attempt of the step's action.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::no_retry(),
        }
    }
}

impl StepPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            retry: RetryPolicy::no_retry(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_until_the_cap() {
        let policy = RetryPolicy::exponential(6, Duration::from_millis(100), Duration::from_millis(500))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(250));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(250));
    }

    #[test]
    fn linear_backoff_grows_by_base() {
        let policy = RetryPolicy::linear(5, Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn late_attempts_saturate_at_the_cap() {
        let policy = RetryPolicy::exponential(100, Duration::from_secs(1), Duration::from_secs(30))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_its_band() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1000)).with_jitter(0.2);
        for attempt in 1..20 {
            let delay = policy.delay_for_attempt(attempt).as_millis();
            assert!((800..=1200).contains(&delay), "attempt {attempt}: {delay}ms");
        }
    }

    #[test]
    fn only_transient_failures_are_retried() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));

        assert!(policy.should_retry(1, FailureKind::Unavailable));
        assert!(policy.should_retry(2, FailureKind::Timeout));
        assert!(!policy.should_retry(3, FailureKind::Unavailable));
        assert!(!policy.should_retry(1, FailureKind::PlanNotFound));
        assert!(!policy.should_retry(1, FailureKind::Conflict));
    }

    #[test]
    fn no_retry_allows_a_single_attempt() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(1, FailureKind::Unavailable));
        assert_eq!(StepPolicy::default().retry, policy);
    }
}
