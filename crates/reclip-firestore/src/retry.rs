//! Bounded retry with exponential backoff and full jitter.
//!
//! Only transport-level failures are retried (network, 429, 5xx). A caller
//! that sees an error from `with_retry` has already spent the whole budget.

use std::time::Duration;

use tracing::{info_span, warn, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_retry;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |name: &str, fallback: u64| {
            std::env::var(name)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(fallback)
        };

        Self {
            max_retries: read("FIRESTORE_MAX_RETRIES", defaults.max_retries as u64) as u32,
            base_delay_ms: read("FIRESTORE_RETRY_BASE_MS", defaults.base_delay_ms),
            max_delay_ms: read("FIRESTORE_RETRY_MAX_MS", defaults.max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        if let Some(after) = retry_after_ms {
            return Duration::from_millis(after);
        }

        let ceiling = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.max_delay_ms);

        Duration::from_millis(jitter(ceiling).max(self.base_delay_ms))
    }
}

/// Pseudo-random value in `0..=ceiling` from the clock's sub-second nanos.
fn jitter(ceiling: u64) -> u64 {
    if ceiling == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos % (ceiling + 1)
}

/// Run `op` until it succeeds, fails permanently, or the budget runs out.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    op: F,
) -> FirestoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = FirestoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        let span = info_span!("firestore_retry", operation = %operation, attempt = attempt + 1);

        match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = config.delay_for(attempt, e.retry_after_ms());
                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Firestore operation failed, retrying: {}",
                    e
                );
                record_retry(operation);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
