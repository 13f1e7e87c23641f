//! Worker counters.
//!
//! Recorded through the `metrics` facade; the API process installs the
//! Prometheus exporter, the one-shot binary leaves them as no-ops.

use metrics::counter;

pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "reclip_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "reclip_jobs_failed_total";
    pub const JOBS_REMOVED_TOTAL: &str = "reclip_jobs_removed_total";
    pub const STALE_JOBS_RECLAIMED_TOTAL: &str = "reclip_stale_jobs_reclaimed_total";
    pub const CLIPS_PERSISTED_TOTAL: &str = "reclip_clips_persisted_total";
    pub const CLIPS_SKIPPED_TOTAL: &str = "reclip_clips_skipped_total";
    pub const POLLS_RATE_LIMITED_TOTAL: &str = "reclip_polls_rate_limited_total";
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

/// `stage` is the state the job failed in (`task_creation`, `polling`, ...).
pub fn record_job_failed(stage: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "stage" => stage).increment(1);
}

pub fn record_job_removed() {
    counter!(names::JOBS_REMOVED_TOTAL).increment(1);
}

pub fn record_stale_reclaimed(count: u64) {
    if count > 0 {
        counter!(names::STALE_JOBS_RECLAIMED_TOTAL).increment(count);
    }
}

pub fn record_clip_persisted() {
    counter!(names::CLIPS_PERSISTED_TOTAL).increment(1);
}

/// `reason` is the step that dropped the clip (`export`, `download`, `upload`).
pub fn record_clip_skipped(reason: &'static str) {
    counter!(names::CLIPS_SKIPPED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_rate_limited_poll() {
    counter!(names::POLLS_RATE_LIMITED_TOTAL).increment(1);
}
