//! Klap client error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for Klap operations.
pub type KlapResult<T> = Result<T, KlapError>;

/// Errors that can occur while talking to the Klap API.
#[derive(Debug, Error)]
pub enum KlapError {
    #[error("Task creation failed: {0}")]
    TaskCreation(String),

    #[error("Transient vendor error: {0}")]
    Transient(String),

    #[error("Rate limited by vendor")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KlapError {
    pub fn task_creation(msg: impl Into<String>) -> Self {
        Self::TaskCreation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map a non-success HTTP status to the error taxonomy used while polling.
    pub fn from_http_status(status: u16, retry_after: Option<Duration>, message: String) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Transient(format!("HTTP {}: {}", status, message)),
            _ => Self::Rejected { status, message },
        }
    }

    /// Check if the caller may retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KlapError::Transient(_) | KlapError::RateLimited { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, KlapError::RateLimited { .. })
    }

    /// HTTP status carried by the error, for metrics.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            KlapError::RateLimited { .. } => Some(429),
            KlapError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for KlapError {
    fn from(e: reqwest::Error) -> Self {
        // Connection resets and timeouts are absorbed by the poll budget
        Self::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            KlapError::from_http_status(429, Some(Duration::from_secs(5)), String::new()),
            KlapError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(5)
        ));
        assert!(KlapError::from_http_status(503, None, "down".into()).is_retryable());
        assert!(!KlapError::from_http_status(404, None, "missing".into()).is_retryable());
    }
}
