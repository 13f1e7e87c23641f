//! Worker configuration.

use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Share of the request ceiling the polling window may use.
const CEILING_BUDGET: f64 = 0.9;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay between task status polls
    pub poll_interval: Duration,
    /// Poll attempts before the job times out
    pub max_poll_attempts: u32,
    /// Sleep after a rate-limited poll
    pub rate_limit_cooldown: Duration,
    /// Attempts a rate-limited poll consumes
    pub rate_limit_attempt_cost: u32,
    /// Longest a hosting platform lets one invocation run
    pub request_ceiling: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 27,
            rate_limit_cooldown: Duration::from_secs(30),
            rate_limit_attempt_cost: 3,
            request_ceiling: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_secs(env_u64(
                "WORKER_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )),
            max_poll_attempts: env_u64(
                "WORKER_MAX_POLL_ATTEMPTS",
                defaults.max_poll_attempts as u64,
            ) as u32,
            rate_limit_cooldown: Duration::from_secs(env_u64(
                "WORKER_RATE_LIMIT_COOLDOWN_SECS",
                defaults.rate_limit_cooldown.as_secs(),
            )),
            rate_limit_attempt_cost: env_u64(
                "WORKER_RATE_LIMIT_ATTEMPT_COST",
                defaults.rate_limit_attempt_cost as u64,
            ) as u32,
            request_ceiling: Duration::from_secs(env_u64(
                "WORKER_REQUEST_CEILING_SECS",
                defaults.request_ceiling.as_secs(),
            )),
        }
    }

    /// Longest time the poll loop can keep a job.
    pub fn polling_window(&self) -> Duration {
        self.poll_interval * self.max_poll_attempts
    }

    /// Wall-clock limit for one polling session, whatever the vendor's
    /// response times.
    pub fn polling_deadline(&self) -> Duration {
        self.request_ceiling.mul_f64(CEILING_BUDGET)
    }

    /// Reject settings whose polling window would not fit in one request.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_poll_attempts == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_POLL_ATTEMPTS must be positive"));
        }
        if self.rate_limit_attempt_cost == 0 {
            return Err(WorkerError::config_error(
                "WORKER_RATE_LIMIT_ATTEMPT_COST must be positive",
            ));
        }

        let budget = self.polling_deadline();
        if self.polling_window() > budget {
            return Err(WorkerError::config_error(format!(
                "polling window {}s ({} x {}s) exceeds {}s, 90% of the {}s request ceiling",
                self.polling_window().as_secs(),
                self.max_poll_attempts,
                self.poll_interval.as_secs(),
                budget.as_secs(),
                self.request_ceiling.as_secs()
            )));
        }
        Ok(())
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
