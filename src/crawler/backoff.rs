//! Retry budget and delay schedule for page fetches

use crate::config::FetchConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with symmetric jitter
///
/// The delay before retry `k` (0-based) is `base * 2^k`, moved by a random
/// amount in `[-jitter, +jitter]`, then clamped to `[0, max_delay]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay without jitter before retry `k`, capped at `max_delay`
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry `k`, with jitter applied
    ///
    /// The nominal delay is shifted by a uniform offset in `±jitter` and the
    /// result is clamped to `0..=max_delay`.
    pub fn delay(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        if self.jitter.is_zero() {
            return nominal;
        }

        let jitter_ms = self.jitter.as_millis() as i64;
        let offset = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
        let delayed = nominal.as_millis() as i64 + offset;

        Duration::from_millis(delayed.max(0) as u64).min(self.max_delay)
    }

    /// Caps a server-requested delay
    pub fn cap(&self, requested: Duration) -> Duration {
        requested.min(self.max_delay)
    }

    /// Whether another attempt may follow attempt number `attempts` (1-based)
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}
