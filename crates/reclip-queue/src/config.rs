//! Queue configuration.

use std::time::Duration;

/// Default staleness threshold: one full polling window (27 × 10s) plus slack.
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 300;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the queue owns
    pub key_prefix: String,
    /// A processing job without a heartbeat for this long is stale
    pub stale_threshold: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "reclip".to_string(),
            stale_threshold: Duration::from_secs(DEFAULT_STALE_THRESHOLD_SECS),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or_else(|_| "reclip".to_string()),
            stale_threshold: Duration::from_secs(
                std::env::var("QUEUE_STALE_THRESHOLD_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_STALE_THRESHOLD_SECS),
            ),
        }
    }

    /// Override the staleness threshold.
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub(crate) fn job_key(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.key_prefix, job_id)
    }

    pub(crate) fn job_key_prefix(&self) -> String {
        format!("{}:job:", self.key_prefix)
    }

    pub(crate) fn queued_key(&self) -> String {
        format!("{}:jobs:queued", self.key_prefix)
    }

    pub(crate) fn processing_key(&self) -> String {
        format!("{}:jobs:processing", self.key_prefix)
    }

    pub(crate) fn project_key(&self, project_id: &str) -> String {
        format!("{}:project:{}:jobs", self.key_prefix, project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_key_layout() {
        let config = QueueConfig::default();
        assert_eq!(config.job_key("abc"), "reclip:job:abc");
        assert_eq!(config.queued_key(), "reclip:jobs:queued");
        assert_eq!(config.processing_key(), "reclip:jobs:processing");
        assert_eq!(config.project_key("p1"), "reclip:project:p1:jobs");
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("QUEUE_KEY_PREFIX", "staging");
        std::env::set_var("QUEUE_STALE_THRESHOLD_SECS", "90");
        let config = QueueConfig::from_env();
        assert_eq!(config.key_prefix, "staging");
        assert_eq!(config.stale_threshold, Duration::from_secs(90));
        std::env::remove_var("QUEUE_KEY_PREFIX");
        std::env::remove_var("QUEUE_STALE_THRESHOLD_SECS");
    }
}
