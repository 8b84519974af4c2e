//! Bounded retry policy with exponential backoff and random jitter.
//!
//! Pure timing logic. The login coordinator decides which errors are
//! retryable and performs the sleeps.

use std::time::Duration;

use rand::Rng;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(40);

/// Upper bound on the exponential part of any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each subsequent one.
    pub base_delay: Duration,
    /// Cap on the exponential component (jitter is added on top).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Deterministic exponential component for the retry following
    /// `attempt` (1-based): `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Backoff plus a uniform random jitter in `[0, base_delay]`.
    ///
    /// Jitter keeps racing logins for the same account from retrying in
    /// lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_cap = self.base_delay.as_millis() as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        self.backoff(attempt) + Duration::from_millis(jitter)
    }
}
