//! Structured job logging utilities.
//!
//! Every line carries the job id and the operation so a single job can be
//! followed through one worker invocation.

use tracing::{error, info, warn, Span};

use reclip_models::JobId;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Log the start of a job operation.
    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Log a progress update during job execution.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    /// Log the completion of a job operation.
    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}
