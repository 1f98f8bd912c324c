//! Exponential backoff for network calls
//!
//! Delay before retry `n` (0-based) is `base * 2^n`, capped, optionally
//! jittered. Terminal errors are returned immediately. Deadlines belong to
//! the individual network calls ([`with_timeout`]), never to a whole pass.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::error::{Result, SyncError};

/// Retry parameters for one class of network operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for RetryPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_millis(config.retry_cap_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        // Up to 25% either way, still capped
        let spread = delay.as_millis() as u64 / 4;
        let offset = rand::thread_rng().gen_range(0..=spread * 2);
        Duration::from_millis(delay.as_millis() as u64 - spread + offset).min(self.max_delay)
    }
}

/// Bound one network call by `limit`
pub async fn with_timeout<T, Fut>(limit: Duration, call: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}

/// Run `op` until it succeeds, fails terminally, or retries run out
///
/// Each attempt runs to completion; `op` is never dropped midway.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation = label, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(operation = label, attempt, error = %err, "Giving up");
                return Err(err);
            }
        }
    }
}
