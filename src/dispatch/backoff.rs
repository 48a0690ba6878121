//! Retry policy with capped exponential backoff and jitter.

use crate::config::DispatchConfig;
use rand::Rng;
use std::time::Duration;

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub cap: Duration,
    /// Fraction in `[0, 1]` by which a delay may be randomly shortened.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff_base_ms),
            cap: Duration::from_millis(config.backoff_cap_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }

    /// Whether a transient failure on `attempt` (1-based) may be retried.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// The delay before retry number `retry` (1-based).
    ///
    /// `base * 2^(retry - 1)`, capped, then shortened by up to `jitter` of
    /// itself.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling_for(retry);
        if self.jitter <= 0.0 {
            return ceiling;
        }
        let shave = self.jitter * rand::rng().random::<f64>();
        ceiling.mul_f64(1.0 - shave)
    }

    /// The un-jittered delay before retry number `retry`.
    pub fn ceiling_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}
