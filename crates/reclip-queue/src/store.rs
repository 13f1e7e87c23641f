//! Job store contract shared by the Redis and in-memory queues.

use async_trait::async_trait;

use reclip_models::{Clip, Job, JobId, JobPatch, ProjectId};

use crate::error::QueueResult;

/// Durable store of clip-generation jobs.
///
/// Every mutation is keyed by job id. Implementations must make the
/// `dequeue_next` claim atomic: among any number of concurrent callers,
/// at most one receives a given job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a `queued` job.
    async fn enqueue(&self, project_id: ProjectId, source_media_url: String) -> QueueResult<Job>;

    /// Claim the oldest `queued` job and move it to `processing`.
    async fn dequeue_next(&self) -> QueueResult<Option<Job>>;

    /// Merge fields into a `processing` job and refresh its heartbeat.
    ///
    /// Returns `false` when the job is gone or no longer processing.
    async fn update(&self, job_id: &JobId, patch: JobPatch) -> QueueResult<bool>;

    /// Terminal success. Returns `false` when the job was not processing.
    async fn complete(&self, job_id: &JobId, clips: Vec<Clip>) -> QueueResult<bool>;

    /// Terminal failure. Returns `false` when the job was not processing.
    async fn fail(&self, job_id: &JobId, reason: &str) -> QueueResult<bool>;

    /// Hard-delete a job whose project no longer exists.
    async fn remove_job(&self, job_id: &JobId, project_id: &ProjectId) -> QueueResult<bool>;

    /// Fail every `processing` job whose heartbeat is older than the
    /// staleness threshold. Returns how many were reclaimed.
    async fn cleanup_stale_jobs(&self) -> QueueResult<u64>;

    /// Read a job (dashboard polling).
    async fn get(&self, job_id: &JobId) -> QueueResult<Option<Job>>;

    /// All jobs for a project, oldest first.
    async fn list_for_project(&self, project_id: &ProjectId) -> QueueResult<Vec<Job>>;
}

/// Reason recorded on jobs reclaimed by `cleanup_stale_jobs`.
pub const STALE_JOB_REASON: &str =
    "timeout: worker stopped reporting progress before the job finished";
