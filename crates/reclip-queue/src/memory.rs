//! In-process job store for tests and local development.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use reclip_models::{Clip, Job, JobId, JobPatch, JobStatus, ProjectId};

use crate::config::DEFAULT_STALE_THRESHOLD_SECS;
use crate::error::QueueResult;
use crate::store::{JobStore, STALE_JOB_REASON};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    queued: VecDeque<JobId>,
}

/// Job store backed by a mutex-guarded map. Same semantics as the Redis queue.
pub struct InMemoryJobQueue {
    state: Mutex<State>,
    stale_threshold: Duration,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::with_stale_threshold(Duration::from_secs(DEFAULT_STALE_THRESHOLD_SECS))
    }

    pub fn with_stale_threshold(stale_threshold: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            stale_threshold,
        }
    }

    /// Insert a job as-is, bypassing `enqueue`. Queued jobs join the queue.
    pub async fn insert(&self, job: Job) {
        let mut state = self.state.lock().await;
        if job.status == JobStatus::Queued {
            state.queued.push_back(job.id.clone());
        }
        state.jobs.insert(job.id.clone(), job);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobQueue {
    async fn enqueue(&self, project_id: ProjectId, source_media_url: String) -> QueueResult<Job> {
        let job = Job::new(project_id, source_media_url);
        self.insert(job.clone()).await;
        Ok(job)
    }

    async fn dequeue_next(&self) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        while let Some(id) = state.queued.pop_front() {
            if let Some(job) = state.jobs.get_mut(&id) {
                if job.status == JobStatus::Queued {
                    job.start(Utc::now());
                    debug!(job_id = %id, "Claimed job");
                    return Ok(Some(job.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn update(&self, job_id: &JobId, patch: JobPatch) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.apply(&patch, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, job_id: &JobId, clips: Vec<Clip>) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.complete(clips, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(&self, job_id: &JobId, reason: &str) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.fail(reason, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_job(&self, job_id: &JobId, project_id: &ProjectId) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        match state.jobs.get(job_id) {
            Some(job) if &job.project_id == project_id => {
                state.jobs.remove(job_id);
                state.queued.retain(|id| id != job_id);
                Ok(true)
            }
            Some(_) => {
                warn!(job_id = %job_id, project_id = %project_id, "Refusing to remove job owned by another project");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn cleanup_stale_jobs(&self) -> QueueResult<u64> {
        let threshold = chrono::Duration::from_std(self.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_STALE_THRESHOLD_SECS as i64));
        let now = Utc::now();
        let cutoff = now - threshold;

        let mut state = self.state.lock().await;
        let mut reclaimed = 0;
        for job in state.jobs.values_mut() {
            if job.is_stale(cutoff) {
                job.fail(STALE_JOB_REASON, now);
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn get(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(job_id).cloned())
    }

    async fn list_for_project(&self, project_id: &ProjectId) -> QueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| &job.project_id == project_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn project() -> ProjectId {
        ProjectId::from("project-1")
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo() {
        let queue = InMemoryJobQueue::new();
        let first = queue.enqueue(project(), "https://a/1.mp4".into()).await.unwrap();
        let second = queue.enqueue(project(), "https://a/2.mp4".into()).await.unwrap();

        let claimed = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.last_polled_at.is_some());

        let claimed = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, second.id);
        assert!(queue.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_dequeue_claims_once() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let job = queue.enqueue(project(), "https://a/1.mp4".into()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move { queue.dequeue_next().await.unwrap() }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            if let Some(claimed) = handle.await.unwrap() {
                winners.push(claimed.id);
            }
        }
        assert_eq!(winners, vec![job.id]);
    }

    #[tokio::test]
    async fn test_update_is_monotonic_and_sets_task_once() {
        let queue = InMemoryJobQueue::new();
        let job = queue.enqueue(project(), "https://a/1.mp4".into()).await.unwrap();
        queue.dequeue_next().await.unwrap();

        assert!(queue
            .update(&job.id, JobPatch::progress(40).with_external_task_id("task-1"))
            .await
            .unwrap());
        assert!(queue
            .update(&job.id, JobPatch::progress(30).with_external_task_id("task-2"))
            .await
            .unwrap());

        let stored = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.progress, 40);
        assert_eq!(stored.external_task_id.as_deref(), Some("task-1"));
    }

    #[tokio::test]
    async fn test_terminal_jobs_ignore_writes() {
        let queue = InMemoryJobQueue::new();
        let job = queue.enqueue(project(), "https://a/1.mp4".into()).await.unwrap();

        // Not yet claimed
        assert!(!queue.update(&job.id, JobPatch::progress(10)).await.unwrap());

        queue.dequeue_next().await.unwrap();
        assert!(queue.fail(&job.id, "boom").await.unwrap());
        assert!(!queue.complete(&job.id, Vec::new()).await.unwrap());
        assert!(!queue.update(&job.id, JobPatch::progress(90)).await.unwrap());

        let stored = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_cleanup_reclaims_only_stale_processing_jobs() {
        let queue = InMemoryJobQueue::with_stale_threshold(Duration::from_secs(60));

        let mut stale = Job::new(project(), "https://a/1.mp4");
        stale.start(Utc::now() - chrono::Duration::seconds(120));
        let mut fresh = Job::new(project(), "https://a/2.mp4");
        fresh.start(Utc::now());
        let waiting = Job::new(project(), "https://a/3.mp4");

        queue.insert(stale.clone()).await;
        queue.insert(fresh.clone()).await;
        queue.insert(waiting.clone()).await;

        assert_eq!(queue.cleanup_stale_jobs().await.unwrap(), 1);

        let stale = queue.get(&stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, JobStatus::Failed);
        assert_eq!(stale.error.as_deref(), Some(STALE_JOB_REASON));
        assert_eq!(
            queue.get(&fresh.id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
        assert_eq!(
            queue.get(&waiting.id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );

        // A second sweep has nothing left to reclaim
        assert_eq!(queue.cleanup_stale_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remove_job_checks_owner() {
        let queue = InMemoryJobQueue::new();
        let job = queue.enqueue(project(), "https://a/1.mp4".into()).await.unwrap();

        assert!(!queue
            .remove_job(&job.id, &ProjectId::from("someone-else"))
            .await
            .unwrap());
        assert!(queue.remove_job(&job.id, &project()).await.unwrap());
        assert!(queue.get(&job.id).await.unwrap().is_none());
        assert!(queue.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_for_project() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(project(), "https://a/1.mp4".into()).await.unwrap();
        queue.enqueue(ProjectId::from("other"), "https://a/2.mp4".into()).await.unwrap();

        let jobs = queue.list_for_project(&project()).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source_media_url, "https://a/1.mp4");
    }
}
