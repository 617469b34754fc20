//! Setup retry backoff
//!
//! Delays double from `base_interval` up to `max_interval`, plus a small
//! random jitter so entries that failed together do not retry together.
//! With the defaults this gives 5s, 10s, 20s, 40s, 80s, 80s, ...

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff policy for entries in `SetupRetry`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Delay before the first retry, in seconds
    pub base_interval: f64,
    /// Upper bound for the doubled delay, in seconds
    pub max_interval: f64,
    /// Maximum random seconds added to each delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: 5.0,
            max_interval: 80.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter, mostly useful for deterministic tests
    pub fn fixed(base_interval: f64, max_interval: f64) -> Self {
        Self {
            base_interval,
            max_interval,
            jitter: 0.0,
        }
    }

    /// Delay before the retry following `attempt` previous retries
    pub fn delay_for(&self, attempt: u32) -> Duration {
        seconds(self.base_delay(attempt) + self.sample_jitter())
    }

    /// Backoff without jitter, in seconds
    pub fn base_delay(&self, attempt: u32) -> f64 {
        // 2^30 seconds is far beyond any sane cap, clamp the exponent first
        let factor = 2_f64.powi(attempt.min(30) as i32);
        (self.base_interval * factor).min(self.max_interval)
    }

    fn sample_jitter(&self) -> f64 {
        if self.jitter > 0.0 {
            rand::random::<f64>() * self.jitter
        } else {
            0.0
        }
    }
}

/// Convert seconds to a `Duration`, saturating instead of panicking.
///
/// NaN and non-positive values give zero.
pub(crate) fn seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}
