//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project store error: {0}")]
    ProjectStore(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] reclip_queue::QueueError),

    #[error("Vendor error: {0}")]
    Vendor(#[from] reclip_klap::KlapError),

    #[error("Storage error: {0}")]
    Storage(#[from] reclip_storage::StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] reclip_firestore::FirestoreError),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn project_not_found(project_id: impl Into<String>) -> Self {
        Self::ProjectNotFound(project_id.into())
    }

    pub fn project_store(msg: impl Into<String>) -> Self {
        Self::ProjectStore(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// The owning project is gone; the job should be removed, not failed.
    pub fn is_project_gone(&self) -> bool {
        match self {
            WorkerError::ProjectNotFound(_) => true,
            WorkerError::Firestore(e) => e.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_gone_detection() {
        assert!(WorkerError::project_not_found("p1").is_project_gone());
        assert!(WorkerError::from(reclip_firestore::FirestoreError::not_found("projects/p1"))
            .is_project_gone());
        assert!(!WorkerError::project_store("deadline exceeded").is_project_gone());
    }
}
