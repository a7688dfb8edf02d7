//! Delay between upstream retry attempts.

use std::time::Duration;

use rand::Rng;

/// Capped exponential schedule. Each delay gets up to 10% extra jitter so
/// concurrent retries against the same upstream spread out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base) }
    }

    /// Deterministic part of the delay after `failed_attempts` failures.
    pub fn ceiling(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failed_attempts - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay to sleep after `failed_attempts` failures.
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        let ceiling = self.ceiling(failed_attempts);
        let spread = ceiling.as_millis() as u64 / 10;
        if spread == 0 {
            return ceiling;
        }
        ceiling + Duration::from_millis(rand::thread_rng().gen_range(0..spread))
    }
}
