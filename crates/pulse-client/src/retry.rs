use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use pulse_types::error::PulseError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Exponential ceiling for the wait after failed attempt `attempt`
    /// (zero-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Ceiling with jitter: a uniform pick from the upper half, so retries
    /// from many clients spread out but never collapse to zero.
    fn jittered(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt).as_millis() as u64;
        let floor = ceiling / 2;
        Duration::from_millis(rand::rng().random_range(floor..=ceiling))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs out
/// of attempts. Only [`PulseError::TransientDelivery`] is retried.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, PulseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PulseError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let wait = policy.jittered(attempt);
                debug!("Attempt {} failed ({}), retrying in {:?}", attempt + 1, e, wait);
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("Giving up after {} attempts: {}", attempts, e);
                }
                return Err(e);
            }
        }
    }
}
