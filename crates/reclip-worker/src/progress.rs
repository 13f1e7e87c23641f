//! Progress sink: the write path that exposes a job's progress.
//!
//! A report goes to three places, in order of authority:
//! 1. the job record (the dashboard's source of truth, merged monotonically)
//! 2. the owning project's clip-task progress (mirror, best effort)
//! 3. the progress channel, when configured (notifications, best effort)
//!
//! Every job write doubles as the claim check: once the queue refuses one,
//! the job belongs to nobody (it was reclaimed as stale) and the sink stops
//! writing anywhere.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use reclip_models::{JobId, JobPatch, ProjectId, ProjectUpdate};
use reclip_queue::{JobStore, ProgressEvent, ProgressPublisher};

use crate::logging::JobLogger;
use crate::stores::ProjectStore;

/// Per-job progress writer.
pub struct ProgressSink {
    jobs: Arc<dyn JobStore>,
    projects: Arc<dyn ProjectStore>,
    publisher: Option<Arc<dyn ProgressPublisher>>,
    job_id: JobId,
    project_id: ProjectId,
    logger: JobLogger,
    last: AtomicU8,
    claim_lost: AtomicBool,
}

impl ProgressSink {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        projects: Arc<dyn ProjectStore>,
        publisher: Option<Arc<dyn ProgressPublisher>>,
        job_id: JobId,
        project_id: ProjectId,
        initial: u8,
    ) -> Self {
        let logger = JobLogger::new(&job_id, "progress");
        Self {
            jobs,
            projects,
            publisher,
            job_id,
            project_id,
            logger,
            last: AtomicU8::new(initial.min(100)),
            claim_lost: AtomicBool::new(false),
        }
    }

    /// Highest progress reported so far.
    pub fn current(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    /// Whether the queue has refused a write for this job.
    pub fn claim_lost(&self) -> bool {
        self.claim_lost.load(Ordering::SeqCst)
    }

    /// Refresh the job's heartbeat without changing anything else.
    ///
    /// Returns `false` once the claim is lost. A store error is logged and
    /// does not count as a lost claim.
    pub async fn heartbeat(&self) -> bool {
        if self.claim_lost() {
            return false;
        }
        self.write_job(JobPatch::default()).await
    }

    /// Report a percentage. Lower values than already reported are raised
    /// to the current value so every consumer sees a non-decreasing series.
    pub async fn report(&self, progress: u8) {
        let value = self.advance(progress);
        self.write(
            JobPatch::progress(value),
            ProjectUpdate::new().clip_task_progress(value),
        )
        .await;
    }

    /// Record the vendor task id on the job and the project.
    pub async fn record_task(&self, task_id: &str, progress: u8) {
        let value = self.advance(progress);
        self.write(
            JobPatch::progress(value).with_external_task_id(task_id),
            ProjectUpdate::new()
                .klap_task_id(task_id)
                .clip_task_progress(value),
        )
        .await;
    }

    /// Record the vendor output folder on the job and the project.
    pub async fn record_folder(&self, folder_id: &str, progress: u8) {
        let value = self.advance(progress);
        self.write(
            JobPatch::progress(value).with_external_folder_id(folder_id),
            ProjectUpdate::new()
                .klap_folder_id(folder_id)
                .clip_task_progress(value),
        )
        .await;
    }

    /// Announce a completed job. The job record itself is written by `complete`.
    pub async fn completed(&self, clip_count: usize) {
        self.last.store(100, Ordering::SeqCst);
        self.publish(ProgressEvent::completed(&self.job_id, clip_count))
            .await;
    }

    /// Announce a failed job. The job record itself is written by `fail`.
    pub async fn failed(&self, reason: &str) {
        self.publish(ProgressEvent::failed(&self.job_id, reason)).await;
    }

    fn advance(&self, progress: u8) -> u8 {
        let progress = progress.min(100);
        self.last.fetch_max(progress, Ordering::SeqCst).max(progress)
    }

    async fn write_job(&self, patch: JobPatch) -> bool {
        match self.jobs.update(&self.job_id, patch).await {
            Ok(true) => true,
            Ok(false) => {
                self.claim_lost.store(true, Ordering::SeqCst);
                self.logger
                    .log_warning("job is no longer processing; this worker lost its claim");
                false
            }
            Err(e) => {
                self.logger
                    .log_warning(&format!("failed to write job record: {}", e));
                true
            }
        }
    }

    async fn write(&self, patch: JobPatch, project_update: ProjectUpdate) {
        if self.claim_lost() {
            return;
        }
        let value = patch.progress.unwrap_or_else(|| self.current());

        if !self.write_job(patch).await {
            return;
        }

        if let Err(e) = self
            .projects
            .update_project(&self.project_id, project_update)
            .await
        {
            self.logger.log_warning(&format!(
                "failed to mirror progress {} onto project {}: {}",
                value, self.project_id, e
            ));
        }

        self.publish(ProgressEvent::progress(&self.job_id, value)).await;
    }

    async fn publish(&self, event: ProgressEvent) {
        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(&event).await {
                self.logger
                    .log_warning(&format!("failed to publish progress event: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reclip_queue::{InMemoryJobQueue, ProgressMessage, QueueResult};
    use tokio::sync::Mutex;

    use crate::stores::{MemoryProjectStore, MockProjectStore};
    use crate::WorkerError;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<ProgressEvent>>,
    }

    #[async_trait]
    impl ProgressPublisher for RecordingPublisher {
        async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    async fn claimed_job(jobs: &InMemoryJobQueue, project_id: &ProjectId) -> JobId {
        jobs.enqueue(project_id.clone(), "https://cdn.example.com/v.mp4".into())
            .await
            .unwrap();
        jobs.dequeue_next().await.unwrap().unwrap().id
    }

    #[tokio::test]
    async fn test_report_writes_job_project_and_channel() {
        let jobs = Arc::new(InMemoryJobQueue::new());
        let projects = Arc::new(MemoryProjectStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let project_id = ProjectId::from("p1");
        projects.create(&project_id).await;
        let job_id = claimed_job(&jobs, &project_id).await;

        let sink = ProgressSink::new(
            jobs.clone(),
            projects.clone(),
            Some(publisher.clone()),
            job_id.clone(),
            project_id.clone(),
            0,
        );
        sink.record_task("task-1", 25).await;
        sink.report(40).await;
        sink.report(30).await;

        let job = jobs.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.progress, 40);
        assert_eq!(job.external_task_id.as_deref(), Some("task-1"));

        let stored = projects.snapshot(&project_id).await.unwrap();
        assert_eq!(stored.project.klap_task_id.as_deref(), Some("task-1"));
        assert_eq!(stored.clip_task_progress, Some(40));

        let values: Vec<u8> = publisher
            .events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e.message {
                ProgressMessage::Progress { value } => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![25, 40, 40]);
    }

    #[tokio::test]
    async fn test_refused_write_marks_claim_lost_and_stops_mirroring() {
        let jobs = Arc::new(InMemoryJobQueue::new());
        let projects = Arc::new(MemoryProjectStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let project_id = ProjectId::from("p1");
        projects.create(&project_id).await;
        let job_id = claimed_job(&jobs, &project_id).await;

        let sink = ProgressSink::new(
            jobs.clone(),
            projects.clone(),
            Some(publisher.clone()),
            job_id.clone(),
            project_id.clone(),
            0,
        );
        assert!(sink.heartbeat().await);
        sink.report(30).await;

        // Reclaimed by another invocation
        assert!(jobs.fail(&job_id, "worker stopped reporting").await.unwrap());

        sink.record_folder("folder-1", 50).await;
        assert!(sink.claim_lost());
        assert!(!sink.heartbeat().await);
        sink.report(60).await;

        let stored = projects.snapshot(&project_id).await.unwrap();
        assert_eq!(stored.clip_task_progress, Some(30));
        assert!(stored.project.klap_folder_id.is_none());
        assert_eq!(publisher.events.lock().await.len(), 1);
        assert_eq!(jobs.get(&job_id).await.unwrap().unwrap().progress, 30);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_last_polled_at() {
        let jobs = Arc::new(InMemoryJobQueue::new());
        let project_id = ProjectId::from("p1");
        let job_id = claimed_job(&jobs, &project_id).await;
        let claimed_at = jobs.get(&job_id).await.unwrap().unwrap().last_polled_at;

        let sink = ProgressSink::new(
            jobs.clone(),
            Arc::new(MemoryProjectStore::new()),
            None,
            job_id.clone(),
            project_id,
            0,
        );
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(sink.heartbeat().await);

        let job = jobs.get(&job_id).await.unwrap().unwrap();
        assert!(job.last_polled_at > claimed_at);
        assert_eq!(job.progress, 0);
    }

    #[tokio::test]
    async fn test_project_mirror_failure_is_tolerated() {
        let jobs = Arc::new(InMemoryJobQueue::new());
        let project_id = ProjectId::from("p1");
        let job_id = claimed_job(&jobs, &project_id).await;

        let mut projects = MockProjectStore::new();
        projects
            .expect_update_project()
            .times(1)
            .returning(|_, _| Err(WorkerError::project_store("deadline exceeded")));

        let sink = ProgressSink::new(jobs.clone(), Arc::new(projects), None, job_id.clone(), project_id, 0);
        sink.report(30).await;

        assert_eq!(jobs.get(&job_id).await.unwrap().unwrap().progress, 30);
        assert_eq!(sink.current(), 30);
    }
}
