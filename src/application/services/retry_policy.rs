use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

use crate::shared::config::SyncConfig;

/// Bounded exponential backoff for failed queue entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            max_retries: max_retries.max(1),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            Duration::from_secs(config.backoff_base),
            Duration::from_secs(config.backoff_max),
            config.max_retry,
        )
    }

    /// Retries happen immediately on the next cycle.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, max_retries)
    }

    /// `retry_count` is the count after the failure being scheduled (1 for the
    /// first failure).
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Base delay plus up to 20% jitter.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let base = self.base_delay(retry_count);
        let jitter_ms = (base.as_millis() / 5) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    pub fn next_attempt_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay(retry_count))
            .unwrap_or_else(|_| chrono::Duration::seconds(self.max.as_secs() as i64));
        now + delay
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
