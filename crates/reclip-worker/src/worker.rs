//! Single-job worker invocation.
//!
//! `ClipWorker::run_once` claims at most one job and drives it through
//! `TaskCreation -> Polling -> ClipExtraction` to a terminal outcome written
//! to the job record. After the claim nothing is raised to the caller: a
//! broken job must not keep the next invocation from the next job.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, Instrument};

use reclip_klap::{KlapError, TaskStatus};
use reclip_models::{Clip, Job, JobId, ProjectUpdate};

use crate::clip_pipeline::{process_clips, PIPELINE_START_PROGRESS};
use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics::{
    record_job_completed, record_job_failed, record_job_removed, record_rate_limited_poll,
    record_stale_reclaimed,
};
use crate::progress::ProgressSink;

/// Progress once the vendor task exists.
pub const TASK_CREATED_PROGRESS: u8 = 25;
/// Highest progress reported while the task is still pending.
const PENDING_PROGRESS_CAP: u8 = PIPELINE_START_PROGRESS - 1;

/// What one invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing was queued
    Idle,
    Completed { job_id: JobId, clip_count: usize },
    Failed { job_id: JobId, reason: String },
    /// The owning project was gone; the job was deleted
    Removed { job_id: JobId },
}

impl RunOutcome {
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            RunOutcome::Idle => None,
            RunOutcome::Completed { job_id, .. }
            | RunOutcome::Failed { job_id, .. }
            | RunOutcome::Removed { job_id } => Some(job_id),
        }
    }

    /// Whether the job ended the way its owner wanted (or no longer cares).
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. } | RunOutcome::Removed { .. })
    }

    pub fn message(&self) -> String {
        match self {
            RunOutcome::Idle => "No jobs to process".to_string(),
            RunOutcome::Completed { clip_count, .. } => {
                format!("Job completed with {} clips", clip_count)
            }
            RunOutcome::Failed { reason, .. } => format!("Job failed: {}", reason),
            RunOutcome::Removed { .. } => "Project no longer exists; job removed".to_string(),
        }
    }
}

enum State {
    TaskCreation,
    Polling { task_id: String },
    ClipExtraction { folder_id: String },
    Terminal(Terminal),
}

enum Terminal {
    Completed(Vec<Clip>),
    Failed { stage: &'static str, reason: String },
    Orphaned,
    /// The queue no longer lists this job as processing
    ClaimLost,
}

impl Terminal {
    fn failed(stage: &'static str, reason: impl Into<String>) -> Self {
        Terminal::Failed {
            stage,
            reason: reason.into(),
        }
    }
}

/// Progress while the task is pending: 25 rising toward 50 with the attempts used.
pub fn pending_progress(attempt: u32, max_attempts: u32) -> u8 {
    if max_attempts == 0 {
        return TASK_CREATED_PROGRESS;
    }
    let span = (PIPELINE_START_PROGRESS - TASK_CREATED_PROGRESS) as u64;
    let advanced = attempt.min(max_attempts) as u64 * span / max_attempts as u64;
    (TASK_CREATED_PROGRESS + advanced as u8).min(PENDING_PROGRESS_CAP)
}

/// Sleep for `duration`, cut short at `deadline`.
async fn sleep_until_deadline(duration: Duration, deadline: Instant) {
    let wake = Instant::now()
        .checked_add(duration)
        .map_or(deadline, |wake| wake.min(deadline));
    tokio::time::sleep_until(wake).await;
}

/// Clip generation worker.
pub struct ClipWorker {
    ctx: WorkerContext,
}

impl ClipWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Reclaim stale jobs, then claim and process at most one job.
    ///
    /// `Err` only when the queue fails before a job is claimed.
    pub async fn run_once(&self) -> WorkerResult<RunOutcome> {
        let reclaimed = self.ctx.jobs.cleanup_stale_jobs().await?;
        record_stale_reclaimed(reclaimed);
        if reclaimed > 0 {
            info!(count = reclaimed, "Reclaimed stale jobs");
        }

        let Some(job) = self.ctx.jobs.dequeue_next().await? else {
            return Ok(RunOutcome::Idle);
        };

        let logger = JobLogger::new(&job.id, "clip_generation");
        let span = logger.create_span();
        Ok(self.process_job(job, logger).instrument(span).await)
    }

    async fn process_job(&self, job: Job, logger: JobLogger) -> RunOutcome {
        logger.log_start(&format!(
            "project {} attempt {} source {}",
            job.project_id, job.attempts, job.source_media_url
        ));

        let sink = ProgressSink::new(
            Arc::clone(&self.ctx.jobs),
            Arc::clone(&self.ctx.projects),
            self.ctx.publisher.clone(),
            job.id.clone(),
            job.project_id.clone(),
            job.progress,
        );

        let terminal = self.drive(&job, &sink, &logger).await;
        self.finish(&job, &sink, &logger, terminal).await
    }

    async fn drive(&self, job: &Job, sink: &ProgressSink, logger: &JobLogger) -> Terminal {
        match self.project_exists(job).await {
            Ok(true) => {}
            Ok(false) => return Terminal::Orphaned,
            Err(t) => return t,
        }

        let mut state = match &job.external_task_id {
            Some(task_id) => {
                logger.log_progress(&format!("resuming vendor task {}", task_id));
                sink.report(TASK_CREATED_PROGRESS).await;
                State::Polling {
                    task_id: task_id.clone(),
                }
            }
            None => State::TaskCreation,
        };

        loop {
            state = match state {
                State::TaskCreation => self.create_task(job, sink, logger).await,
                State::Polling { task_id } => self.poll_task(job, &task_id, sink, logger).await,
                State::ClipExtraction { folder_id } => {
                    self.extract_clips(job, &folder_id, sink, logger).await
                }
                State::Terminal(terminal) => return terminal,
            };
        }
    }

    async fn create_task(&self, job: &Job, sink: &ProgressSink, logger: &JobLogger) -> State {
        match self.ctx.vendor.create_task(&job.source_media_url).await {
            Ok(task_id) => {
                logger.log_progress(&format!("created vendor task {}", task_id));
                sink.record_task(&task_id, TASK_CREATED_PROGRESS).await;
                State::Polling { task_id }
            }
            Err(e) => State::Terminal(Terminal::failed(
                "task_creation",
                format!("task creation failed: {}", e),
            )),
        }
    }

    async fn poll_task(
        &self,
        job: &Job,
        task_id: &str,
        sink: &ProgressSink,
        logger: &JobLogger,
    ) -> State {
        let config = &self.ctx.config;
        let max_attempts = config.max_poll_attempts;
        let deadline = Instant::now() + config.polling_deadline();
        let mut attempt = 0u32;
        let mut last_error: Option<String> = None;
        let mut deadline_reached = false;

        while attempt < max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                deadline_reached = true;
                break;
            }

            let status =
                match tokio::time::timeout(remaining, self.ctx.vendor.get_task_status(task_id)).await {
                    Ok(status) => status,
                    Err(_) => {
                        last_error = Some("status check still running at the polling deadline".to_string());
                        deadline_reached = true;
                        break;
                    }
                };

            match status {
                Ok(TaskStatus::Ready { folder_id }) => {
                    logger.log_progress(&format!("task {} ready, folder {}", task_id, folder_id));
                    return match self.project_exists(job).await {
                        Ok(true) => {
                            sink.record_folder(&folder_id, PIPELINE_START_PROGRESS).await;
                            if sink.claim_lost() {
                                State::Terminal(Terminal::ClaimLost)
                            } else {
                                State::ClipExtraction { folder_id }
                            }
                        }
                        Ok(false) => State::Terminal(Terminal::Orphaned),
                        Err(t) => State::Terminal(t),
                    };
                }
                Ok(TaskStatus::Failed { reason }) => {
                    return State::Terminal(Terminal::failed(
                        "polling",
                        format!("vendor task failed: {}", reason),
                    ));
                }
                Ok(TaskStatus::Pending) => {
                    attempt += 1;
                    sink.report(pending_progress(attempt, max_attempts)).await;
                }
                Err(KlapError::RateLimited { retry_after }) => {
                    record_rate_limited_poll();
                    let cooldown = retry_after
                        .unwrap_or(config.rate_limit_cooldown)
                        .max(config.rate_limit_cooldown);
                    let consumed = self.attempts_for(cooldown);
                    attempt = attempt.saturating_add(consumed);
                    last_error = Some(KlapError::RateLimited { retry_after }.to_string());
                    logger.log_warning(&format!(
                        "rate limited while polling; cooling down {}s ({}/{} attempts used)",
                        cooldown.as_secs(),
                        attempt.min(max_attempts),
                        max_attempts
                    ));
                    if !sink.heartbeat().await {
                        return State::Terminal(Terminal::ClaimLost);
                    }
                    if attempt < max_attempts {
                        sleep_until_deadline(cooldown, deadline).await;
                    }
                    continue;
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    logger.log_warning(&format!(
                        "transient error polling task {} ({}/{}): {}",
                        task_id, attempt, max_attempts, e
                    ));
                    last_error = Some(e.to_string());
                    sink.heartbeat().await;
                }
                Err(e) => {
                    return State::Terminal(Terminal::failed(
                        "polling",
                        format!("task status check failed: {}", e),
                    ));
                }
            }

            if sink.claim_lost() {
                return State::Terminal(Terminal::ClaimLost);
            }
            if attempt < max_attempts {
                sleep_until_deadline(config.poll_interval, deadline).await;
            }
        }

        let mut reason = if deadline_reached {
            format!(
                "timeout: task {} not ready within the {:?} polling deadline ({} poll attempts)",
                task_id,
                config.polling_deadline(),
                attempt
            )
        } else {
            format!(
                "timeout: task {} not ready after {} poll attempts",
                task_id, max_attempts
            )
        };
        if let Some(error) = last_error {
            reason.push_str(&format!("; last error: {}", error));
        }
        State::Terminal(Terminal::failed("polling", reason))
    }

    /// Attempts a rate-limit cooldown costs: at least the configured cost,
    /// and never less than the poll intervals the cooldown spans.
    fn attempts_for(&self, cooldown: Duration) -> u32 {
        let config = &self.ctx.config;
        let spanned = if config.poll_interval.is_zero() {
            0
        } else {
            cooldown.as_millis().div_ceil(config.poll_interval.as_millis()) as u32
        };
        config.rate_limit_attempt_cost.max(spanned)
    }

    async fn extract_clips(
        &self,
        job: &Job,
        folder_id: &str,
        sink: &ProgressSink,
        logger: &JobLogger,
    ) -> State {
        let results = match process_clips(&self.ctx, sink, logger, &job.project_id, folder_id).await {
            Ok(results) => results,
            Err(e) => {
                return State::Terminal(Terminal::failed(
                    "clip_extraction",
                    format!("listing clips failed: {}", e),
                ));
            }
        };

        if sink.claim_lost() {
            return State::Terminal(Terminal::ClaimLost);
        }

        if results.clips.is_empty() {
            let reason = if results.total == 0 {
                "vendor produced no clips".to_string()
            } else {
                format!("no clips could be extracted ({} of {} failed)", results.skipped.len(), results.total)
            };
            return State::Terminal(Terminal::failed("clip_extraction", reason));
        }

        match self.project_exists(job).await {
            Ok(true) => {}
            Ok(false) => return State::Terminal(Terminal::Orphaned),
            Err(t) => return State::Terminal(t),
        }

        if !sink.heartbeat().await {
            return State::Terminal(Terminal::ClaimLost);
        }

        let update = ProjectUpdate::new()
            .clips(results.clips.clone())
            .clip_task_progress(100);
        match self.ctx.projects.update_project(&job.project_id, update).await {
            Ok(()) => State::Terminal(Terminal::Completed(results.clips)),
            Err(e) if e.is_project_gone() => State::Terminal(Terminal::Orphaned),
            Err(e) => State::Terminal(Terminal::failed(
                "persist",
                format!("saving clips to project failed: {}", e),
            )),
        }
    }

    async fn project_exists(&self, job: &Job) -> Result<bool, Terminal> {
        self.ctx
            .projects
            .get_project(&job.project_id)
            .await
            .map(|project| project.is_some())
            .map_err(|e| Terminal::failed("project_lookup", format!("project lookup failed: {}", e)))
    }

    async fn finish(
        &self,
        job: &Job,
        sink: &ProgressSink,
        logger: &JobLogger,
        terminal: Terminal,
    ) -> RunOutcome {
        match terminal {
            Terminal::Completed(clips) => {
                let clip_count = clips.len();
                match self.ctx.jobs.complete(&job.id, clips).await {
                    Ok(true) => {
                        sink.completed(clip_count).await;
                        record_job_completed();
                        logger.log_completion(&format!("{} clips", clip_count));
                        RunOutcome::Completed {
                            job_id: job.id.clone(),
                            clip_count,
                        }
                    }
                    Ok(false) => {
                        let reason = "job was no longer processing when it completed".to_string();
                        logger.log_warning(&reason);
                        RunOutcome::Failed {
                            job_id: job.id.clone(),
                            reason,
                        }
                    }
                    Err(e) => {
                        let reason = format!("recording completion failed: {}", e);
                        logger.log_error(&reason);
                        RunOutcome::Failed {
                            job_id: job.id.clone(),
                            reason,
                        }
                    }
                }
            }
            Terminal::Failed { stage, reason } => {
                logger.log_error(&reason);
                match self.ctx.jobs.fail(&job.id, &reason).await {
                    Ok(true) => {}
                    Ok(false) => logger.log_warning("job was no longer processing; failure not recorded"),
                    Err(e) => logger.log_error(&format!("recording failure failed: {}", e)),
                }
                sink.failed(&reason).await;
                record_job_failed(stage);
                RunOutcome::Failed {
                    job_id: job.id.clone(),
                    reason,
                }
            }
            Terminal::ClaimLost => {
                let reason = "job was reclaimed while this worker was still running it".to_string();
                logger.log_warning(&reason);
                record_job_failed("claim_lost");
                RunOutcome::Failed {
                    job_id: job.id.clone(),
                    reason,
                }
            }
            Terminal::Orphaned => {
                logger.log_warning(&format!(
                    "project {} no longer exists; removing job",
                    job.project_id
                ));
                match self.ctx.jobs.remove_job(&job.id, &job.project_id).await {
                    Ok(true) => {}
                    Ok(false) => logger.log_warning("job was already gone"),
                    Err(e) => logger.log_error(&format!("removing job failed: {}", e)),
                }
                record_job_removed();
                RunOutcome::Removed {
                    job_id: job.id.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    use reclip_klap::{ClipDetails, KlapResult, TaskVendor};
    use reclip_models::{ClipRef, JobStatus, ProjectId};
    use reclip_queue::{
        InMemoryJobQueue, JobStore, ProgressEvent, ProgressMessage, ProgressPublisher, QueueResult,
        STALE_JOB_REASON,
    };

    use crate::config::WorkerConfig;
    use crate::error::{WorkerError, WorkerResult};
    use crate::stores::{MemoryBlobStore, MemoryProjectStore, MockBlobStore, ProjectStore};

    /// Vendor call during which the job is reclaimed as stale.
    #[derive(Debug, Clone, Copy, PartialEq)]
    enum ReclaimAt {
        StatusCall(usize),
        ExportCall(usize),
    }

    #[derive(Default)]
    struct ScriptedVendor {
        fail_create: bool,
        status_delay: Duration,
        reclaim_at: Option<ReclaimAt>,
        queue: Mutex<Option<(Arc<InMemoryJobQueue>, JobId)>>,
        seen_polled_at: Mutex<Vec<chrono::DateTime<Utc>>>,
        statuses: Mutex<VecDeque<KlapResult<TaskStatus>>>,
        clips: Vec<ClipRef>,
        failing_exports: Vec<ClipRef>,
        delete_on_ready: Option<(Arc<MemoryProjectStore>, ProjectId)>,
        create_calls: AtomicUsize,
        status_calls: AtomicUsize,
        export_calls: AtomicUsize,
    }

    impl ScriptedVendor {
        fn with_clips(n: usize) -> Self {
            Self {
                clips: (1..=n).map(|i| ClipRef::from(format!("c{}", i))).collect(),
                ..Default::default()
            }
        }

        fn statuses(self, statuses: Vec<KlapResult<TaskStatus>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..self
            }
        }

        async fn on_call(&self, call: ReclaimAt) {
            let queue = self.queue.lock().await;
            let Some((jobs, job_id)) = queue.as_ref() else {
                return;
            };
            if let ReclaimAt::StatusCall(_) = call {
                if let Some(polled_at) = jobs.get(job_id).await.unwrap().and_then(|j| j.last_polled_at) {
                    self.seen_polled_at.lock().await.push(polled_at);
                }
            }
            if self.reclaim_at == Some(call) {
                assert!(jobs.fail(job_id, STALE_JOB_REASON).await.unwrap());
            }
        }
    }

    fn ready() -> KlapResult<TaskStatus> {
        Ok(TaskStatus::Ready {
            folder_id: "folder-1".to_string(),
        })
    }

    #[async_trait]
    impl TaskVendor for ScriptedVendor {
        async fn create_task(&self, _media_url: &str) -> KlapResult<String> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(KlapError::task_creation("HTTP 400: unsupported media"));
            }
            Ok("task-1".to_string())
        }

        async fn get_task_status(&self, _task_id: &str) -> KlapResult<TaskStatus> {
            let call = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.status_delay.is_zero() {
                tokio::time::sleep(self.status_delay).await;
            }
            self.on_call(ReclaimAt::StatusCall(call)).await;
            let status = self
                .statuses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Ok(TaskStatus::Pending));
            if let (Ok(TaskStatus::Ready { .. }), Some((projects, project_id))) =
                (&status, &self.delete_on_ready)
            {
                projects.delete(project_id).await;
            }
            status
        }

        async fn list_clips(&self, _folder_id: &str) -> KlapResult<Vec<ClipRef>> {
            Ok(self.clips.clone())
        }

        async fn get_clip_details(&self, _folder_id: &str, _clip: &ClipRef) -> KlapResult<ClipDetails> {
            Err(KlapError::transient("details unavailable"))
        }

        async fn export_clip(&self, _folder_id: &str, clip: &ClipRef) -> KlapResult<String> {
            let call = self.export_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.on_call(ReclaimAt::ExportCall(call)).await;
            if self.failing_exports.contains(clip) {
                return Err(KlapError::export(format!("export of {} errored", clip)));
            }
            Ok(format!("https://exports.example.com/{}.mp4", clip))
        }

        async fn download_export(&self, download_url: &str) -> KlapResult<Vec<u8>> {
            Ok(download_url.as_bytes().to_vec())
        }
    }

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

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::ZERO,
            max_poll_attempts: 27,
            rate_limit_cooldown: Duration::ZERO,
            rate_limit_attempt_cost: 3,
            request_ceiling: Duration::from_secs(300),
        }
    }

    struct Harness {
        jobs: Arc<InMemoryJobQueue>,
        projects: Arc<MemoryProjectStore>,
        blobs: Arc<MemoryBlobStore>,
        publisher: Arc<RecordingPublisher>,
        vendor: Arc<ScriptedVendor>,
        project_id: ProjectId,
        job_id: JobId,
    }

    impl Harness {
        async fn new(vendor: ScriptedVendor) -> Self {
            Self::with_projects(vendor, Arc::new(MemoryProjectStore::new())).await
        }

        async fn with_projects(vendor: ScriptedVendor, projects: Arc<MemoryProjectStore>) -> Self {
            let project_id = ProjectId::from("p1");
            projects.create(&project_id).await;
            let jobs = Arc::new(InMemoryJobQueue::new());
            let job = jobs
                .enqueue(project_id.clone(), "https://cdn.example.com/talk.mp4".into())
                .await
                .unwrap();

            Self {
                jobs,
                projects,
                blobs: Arc::new(MemoryBlobStore::new("https://media.example.com")),
                publisher: Arc::new(RecordingPublisher::default()),
                vendor: Arc::new(vendor),
                project_id,
                job_id: job.id,
            }
        }

        fn worker(&self) -> ClipWorker {
            self.worker_with(test_config())
        }

        fn worker_with(&self, config: WorkerConfig) -> ClipWorker {
            let ctx = WorkerContext::new(
                self.jobs.clone(),
                self.vendor.clone(),
                self.projects.clone(),
                self.blobs.clone(),
                config,
            )
            .with_publisher(self.publisher.clone());
            ClipWorker::new(ctx)
        }

        /// Let the vendor see (and reclaim) this harness's job.
        async fn watch_job(&self) {
            *self.vendor.queue.lock().await = Some((self.jobs.clone(), self.job_id.clone()));
        }

        async fn job(&self) -> Option<Job> {
            self.jobs.get(&self.job_id).await.unwrap()
        }

        async fn progress_values(&self) -> Vec<u8> {
            self.publisher
                .events
                .lock()
                .await
                .iter()
                .map(|e| match e.message {
                    ProgressMessage::Progress { value } => value,
                    ProgressMessage::Completed { .. } => 100,
                    ProgressMessage::Failed { .. } => 0,
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_idle_queue_reclaims_stale_jobs_first() {
        let jobs = Arc::new(InMemoryJobQueue::with_stale_threshold(Duration::from_secs(60)));
        let mut stale = Job::new(ProjectId::from("p1"), "https://cdn.example.com/a.mp4");
        stale.start(Utc::now() - chrono::Duration::minutes(10));
        let stale_id = stale.id.clone();
        jobs.insert(stale).await;

        let worker = ClipWorker::new(WorkerContext::new(
            jobs.clone(),
            Arc::new(ScriptedVendor::default()),
            Arc::new(MemoryProjectStore::new()),
            Arc::new(MemoryBlobStore::new("https://media.example.com")),
            test_config(),
        ));

        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Idle);
        let reclaimed = jobs.get(&stale_id).await.unwrap().unwrap();
        assert_eq!(reclaimed.status, JobStatus::Failed);
        assert_eq!(reclaimed.error.as_deref(), Some(STALE_JOB_REASON));
    }

    #[tokio::test]
    async fn test_partial_export_failures_keep_surviving_clips_in_order() {
        let vendor = ScriptedVendor {
            failing_exports: vec![ClipRef::from("c2"), ClipRef::from("c4")],
            ..ScriptedVendor::with_clips(5)
        }
        .statuses(vec![Ok(TaskStatus::Pending), Ok(TaskStatus::Pending), ready()]);
        let h = Harness::new(vendor).await;

        let outcome = h.worker().run_once().await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                job_id: h.job_id.clone(),
                clip_count: 3
            }
        );

        let job = h.job().await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.external_task_id.as_deref(), Some("task-1"));
        assert_eq!(job.external_folder_id.as_deref(), Some("folder-1"));
        let ids: Vec<&str> = job.result.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3", "c5"]);
        assert!(job.result.iter().all(|c| c.is_persisted()));
        assert_eq!(
            job.result[1].export_url,
            "https://media.example.com/projects/p1/clips/clip_003.mp4"
        );
        assert_eq!(job.result[1].title, "Clip 3");

        let stored = h.projects.snapshot(&h.project_id).await.unwrap();
        assert_eq!(stored.clips.as_ref().map(Vec::len), Some(3));
        assert_eq!(stored.clip_task_progress, Some(100));
        assert_eq!(stored.project.klap_task_id.as_deref(), Some("task-1"));
        assert_eq!(stored.project.klap_folder_id.as_deref(), Some("folder-1"));
        assert_eq!(h.blobs.len().await, 3);
        assert!(h.blobs.get("projects/p1/clips/clip_002.mp4").await.is_none());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let vendor = ScriptedVendor::with_clips(3).statuses(vec![
            Ok(TaskStatus::Pending),
            Err(KlapError::transient("HTTP 502: bad gateway")),
            Ok(TaskStatus::Pending),
            ready(),
        ]);
        let h = Harness::new(vendor).await;

        h.worker().run_once().await.unwrap();

        let values = h.progress_values().await;
        assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
        assert_eq!(values.first(), Some(&TASK_CREATED_PROGRESS));
        assert_eq!(values.last(), Some(&100));
        assert!(values.contains(&50));
        assert!(values.contains(&90));
    }

    #[tokio::test]
    async fn test_all_exports_failing_fails_the_job() {
        let vendor = ScriptedVendor {
            failing_exports: vec![ClipRef::from("c1"), ClipRef::from("c2")],
            ..ScriptedVendor::with_clips(2)
        }
        .statuses(vec![ready()]);
        let h = Harness::new(vendor).await;

        let outcome = h.worker().run_once().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));

        let job = h.job().await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_empty());
        assert!(job.error.unwrap().contains("2 of 2"));
        assert!(h.projects.snapshot(&h.project_id).await.unwrap().clips.is_none());
    }

    #[tokio::test]
    async fn test_missing_project_removes_job_before_task_creation() {
        let h = Harness::new(ScriptedVendor::with_clips(1)).await;
        h.projects.delete(&h.project_id).await;

        let outcome = h.worker().run_once().await.unwrap();
        assert_eq!(outcome, RunOutcome::Removed { job_id: h.job_id.clone() });
        assert!(h.job().await.is_none());
        assert_eq!(h.vendor.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_project_deleted_while_polling_writes_no_clips() {
        let projects = Arc::new(MemoryProjectStore::new());
        let vendor = ScriptedVendor {
            delete_on_ready: Some((projects.clone(), ProjectId::from("p1"))),
            ..ScriptedVendor::with_clips(3)
        }
        .statuses(vec![Ok(TaskStatus::Pending), ready()]);
        let h = Harness::with_projects(vendor, projects).await;

        let outcome = h.worker().run_once().await.unwrap();
        assert_eq!(outcome, RunOutcome::Removed { job_id: h.job_id.clone() });
        assert!(h.job().await.is_none());
        assert!(h.projects.snapshot(&h.project_id).await.is_none());
        assert_eq!(h.vendor.export_calls.load(Ordering::SeqCst), 0);
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_rate_limits_consume_budget_without_failing() {
        let limited = || Err(KlapError::RateLimited { retry_after: None });
        let vendor = ScriptedVendor::with_clips(1)
            .statuses(vec![limited(), limited(), limited(), limited(), ready()]);
        let h = Harness::new(vendor).await;

        let outcome = h.worker().run_once().await.unwrap();
        assert!(outcome.is_success(), "{:?}", outcome);
        assert_eq!(h.vendor.status_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_rate_limits_alone_can_exhaust_the_budget() {
        let limited = || Err(KlapError::RateLimited { retry_after: None });
        let vendor = ScriptedVendor::with_clips(1)
            .statuses(vec![limited(), limited(), limited(), ready()]);
        let h = Harness::new(vendor).await;
        let config = WorkerConfig {
            max_poll_attempts: 9,
            ..test_config()
        };

        let outcome = h.worker_with(config).run_once().await.unwrap();
        let RunOutcome::Failed { reason, .. } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert!(reason.starts_with("timeout"));
        assert!(reason.contains("Rate limited"));
        assert_eq!(h.vendor.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_reports_last_transient_error() {
        let vendor = ScriptedVendor::with_clips(1).statuses(vec![
            Err(KlapError::transient("HTTP 503: upstream down")),
            Ok(TaskStatus::Pending),
            Err(KlapError::transient("HTTP 504: gateway timeout")),
        ]);
        let h = Harness::new(vendor).await;
        let config = WorkerConfig {
            max_poll_attempts: 3,
            ..test_config()
        };

        let outcome = h.worker_with(config).run_once().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));

        let job = h.job().await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert!(error.starts_with("timeout"));
        assert!(error.contains("HTTP 504"));
        assert!(job.progress < 50);
    }

    #[tokio::test]
    async fn test_vendor_failure_fails_job_with_reason() {
        let vendor = ScriptedVendor::with_clips(1).statuses(vec![
            Ok(TaskStatus::Pending),
            Ok(TaskStatus::Failed {
                reason: "video too short".to_string(),
            }),
        ]);
        let h = Harness::new(vendor).await;

        h.worker().run_once().await.unwrap();

        let job = h.job().await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("video too short"));
        let events = h.publisher.events.lock().await;
        assert!(matches!(
            events.last().map(|e| &e.message),
            Some(ProgressMessage::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_status_check_fails_immediately() {
        let vendor = ScriptedVendor::with_clips(1).statuses(vec![Err(KlapError::Rejected {
            status: 404,
            message: "task not found".to_string(),
        })]);
        let h = Harness::new(vendor).await;

        let outcome = h.worker().run_once().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert_eq!(h.vendor.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_creation_failure_is_fatal() {
        let vendor = ScriptedVendor {
            fail_create: true,
            ..ScriptedVendor::with_clips(1)
        };
        let h = Harness::new(vendor).await;

        let outcome = h.worker().run_once().await.unwrap();
        let RunOutcome::Failed { reason, .. } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("task creation failed"));
        assert_eq!(h.vendor.status_calls.load(Ordering::SeqCst), 0);
        assert!(h.job().await.unwrap().external_task_id.is_none());
    }

    #[tokio::test]
    async fn test_job_with_task_id_resumes_polling() {
        let projects = Arc::new(MemoryProjectStore::new());
        let project_id = ProjectId::from("p1");
        projects.create(&project_id).await;
        let jobs = Arc::new(InMemoryJobQueue::new());
        let mut job = Job::new(project_id, "https://cdn.example.com/talk.mp4");
        job.external_task_id = Some("task-earlier".to_string());
        let job_id = job.id.clone();
        jobs.insert(job).await;

        let vendor = Arc::new(ScriptedVendor::with_clips(2).statuses(vec![ready()]));
        let worker = ClipWorker::new(WorkerContext::new(
            jobs.clone(),
            vendor.clone(),
            projects,
            Arc::new(MemoryBlobStore::new("https://media.example.com")),
            test_config(),
        ));

        let outcome = worker.run_once().await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { job_id: job_id.clone(), clip_count: 2 });
        assert_eq!(vendor.create_calls.load(Ordering::SeqCst), 0);
        let job = jobs.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.external_task_id.as_deref(), Some("task-earlier"));
    }

    #[tokio::test]
    async fn test_upload_failure_skips_only_that_clip() {
        let h = Harness::new(ScriptedVendor::with_clips(3).statuses(vec![ready()])).await;

        let mut blobs = MockBlobStore::new();
        blobs.expect_upload().times(3).returning(|path, _| {
            if path.ends_with("clip_002.mp4") {
                Err(WorkerError::upload_failed("bucket unavailable"))
            } else {
                Ok(format!("https://media.example.com/{}", path))
            }
        });
        let worker = ClipWorker::new(WorkerContext::new(
            h.jobs.clone(),
            h.vendor.clone(),
            h.projects.clone(),
            Arc::new(blobs),
            test_config(),
        ));

        let outcome = worker.run_once().await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed { job_id: h.job_id.clone(), clip_count: 2 });
        let ids: Vec<String> = h.job().await.unwrap().result.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_status_checks_stop_at_the_polling_deadline() {
        let transient = || Err(KlapError::transient("request timed out"));
        let vendor = ScriptedVendor {
            status_delay: Duration::from_millis(400),
            ..ScriptedVendor::with_clips(1)
        }
        .statuses((0..10).map(|_| transient()).collect());
        let h = Harness::new(vendor).await;
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(100),
            max_poll_attempts: 5,
            request_ceiling: Duration::from_secs(1),
            ..test_config()
        };
        assert!(config.validate().is_ok());

        let started = Instant::now();
        let outcome = h.worker_with(config.clone()).run_once().await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed <= config.polling_deadline(), "{:?}", elapsed);
        let RunOutcome::Failed { reason, .. } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert!(reason.contains("polling deadline"), "{}", reason);
        assert!(h.vendor.status_calls.load(Ordering::SeqCst) < 5);
        assert_eq!(h.job().await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_every_poll_attempt_refreshes_the_heartbeat() {
        let vendor = ScriptedVendor::with_clips(1).statuses(vec![
            Err(KlapError::transient("HTTP 502: bad gateway")),
            Err(KlapError::transient("HTTP 503: unavailable")),
            Err(KlapError::RateLimited { retry_after: None }),
            Err(KlapError::transient("HTTP 504: gateway timeout")),
            ready(),
        ]);
        let h = Harness::new(vendor).await;
        h.watch_job().await;
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(2),
            rate_limit_cooldown: Duration::from_millis(2),
            rate_limit_attempt_cost: 1,
            ..test_config()
        };

        let outcome = h.worker_with(config).run_once().await.unwrap();
        assert!(outcome.is_success(), "{:?}", outcome);

        let seen = h.vendor.seen_polled_at.lock().await.clone();
        assert_eq!(seen.len(), 5);
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "{:?}", seen);
    }

    #[tokio::test]
    async fn test_job_reclaimed_while_polling_writes_nothing_more() {
        let vendor = ScriptedVendor {
            reclaim_at: Some(ReclaimAt::StatusCall(2)),
            ..ScriptedVendor::with_clips(3)
        }
        .statuses(vec![
            Ok(TaskStatus::Pending),
            Err(KlapError::transient("HTTP 504: gateway timeout")),
            ready(),
        ]);
        let h = Harness::new(vendor).await;
        h.watch_job().await;

        let outcome = h.worker().run_once().await.unwrap();
        let RunOutcome::Failed { reason, .. } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert!(reason.contains("reclaimed"));

        let job = h.job().await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(STALE_JOB_REASON));
        assert_eq!(h.vendor.status_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.vendor.export_calls.load(Ordering::SeqCst), 0);

        let stored = h.projects.snapshot(&h.project_id).await.unwrap();
        assert!(stored.clips.is_none());
        assert!(stored.project.klap_folder_id.is_none());
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_job_reclaimed_when_task_turns_ready_extracts_nothing() {
        let vendor = ScriptedVendor {
            reclaim_at: Some(ReclaimAt::StatusCall(1)),
            ..ScriptedVendor::with_clips(3)
        }
        .statuses(vec![ready()]);
        let h = Harness::new(vendor).await;
        h.watch_job().await;

        let outcome = h.worker().run_once().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert_eq!(h.vendor.export_calls.load(Ordering::SeqCst), 0);

        let stored = h.projects.snapshot(&h.project_id).await.unwrap();
        assert!(stored.clips.is_none());
        assert!(stored.project.klap_folder_id.is_none());
        assert_eq!(h.job().await.unwrap().error.as_deref(), Some(STALE_JOB_REASON));
    }

    #[tokio::test]
    async fn test_job_reclaimed_during_extraction_abandons_remaining_clips() {
        let vendor = ScriptedVendor {
            reclaim_at: Some(ReclaimAt::ExportCall(2)),
            ..ScriptedVendor::with_clips(4)
        }
        .statuses(vec![ready()]);
        let h = Harness::new(vendor).await;
        h.watch_job().await;

        let outcome = h.worker().run_once().await.unwrap();
        let RunOutcome::Failed { reason, .. } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert!(reason.contains("reclaimed"));
        assert_eq!(h.vendor.export_calls.load(Ordering::SeqCst), 2);

        let job = h.job().await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(STALE_JOB_REASON));
        assert!(job.result.is_empty());

        let stored = h.projects.snapshot(&h.project_id).await.unwrap();
        assert!(stored.clips.is_none());
        assert_ne!(stored.clip_task_progress, Some(100));
    }

    /// Project store that lets the job be reclaimed while the clip set is written.
    struct ReclaimOnClipWrite {
        inner: Arc<MemoryProjectStore>,
        jobs: Arc<InMemoryJobQueue>,
        job_id: JobId,
    }

    #[async_trait]
    impl ProjectStore for ReclaimOnClipWrite {
        async fn get_project(&self, project_id: &ProjectId) -> WorkerResult<Option<reclip_models::Project>> {
            self.inner.get_project(project_id).await
        }

        async fn update_project(&self, project_id: &ProjectId, update: ProjectUpdate) -> WorkerResult<()> {
            if update.clips.is_some() {
                self.jobs.fail(&self.job_id, STALE_JOB_REASON).await.unwrap();
            }
            self.inner.update_project(project_id, update).await
        }
    }

    #[tokio::test]
    async fn test_completion_refused_after_reclaim_is_reported_as_failure() {
        let h = Harness::new(ScriptedVendor::with_clips(2).statuses(vec![ready()])).await;
        let projects = Arc::new(ReclaimOnClipWrite {
            inner: h.projects.clone(),
            jobs: h.jobs.clone(),
            job_id: h.job_id.clone(),
        });
        let worker = ClipWorker::new(
            WorkerContext::new(
                h.jobs.clone(),
                h.vendor.clone(),
                projects,
                h.blobs.clone(),
                test_config(),
            )
            .with_publisher(h.publisher.clone()),
        );

        let outcome = worker.run_once().await.unwrap();
        let RunOutcome::Failed { reason, .. } = outcome else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert!(reason.contains("no longer processing"));

        let job = h.job().await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(STALE_JOB_REASON));
        assert!(job.result.is_empty());
        let events = h.publisher.events.lock().await;
        assert!(!events
            .iter()
            .any(|e| matches!(e.message, ProgressMessage::Completed { .. })));
    }

    #[test]
    fn test_pending_progress_stays_below_pipeline() {
        assert_eq!(pending_progress(0, 27), 25);
        assert_eq!(pending_progress(1, 27), 25);
        assert_eq!(pending_progress(14, 27), 37);
        assert_eq!(pending_progress(27, 27), 49);
        assert_eq!(pending_progress(40, 27), 49);
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(RunOutcome::Idle.message(), "No jobs to process");
        assert!(RunOutcome::Removed { job_id: JobId::from("j") }.is_success());
        assert!(!RunOutcome::Failed {
            job_id: JobId::from("j"),
            reason: "timeout".into()
        }
        .is_success());
    }
}
