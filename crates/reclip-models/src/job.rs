//! Clip-generation job record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{Clip, ProjectId};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle state.
///
/// Jobs only move forward: `queued -> processing -> (completed | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed by a worker
    #[default]
    Queued,
    /// Claimed by a worker invocation
    Processing,
    /// Finished with at least one clip
    Completed,
    /// Finished without a usable result
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct ParseJobStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ParseJobStatusError(other.to_string())),
        }
    }
}

/// A durable request to turn one source video into clips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Owning content project
    pub project_id: ProjectId,

    /// Input video location
    pub source_media_url: String,

    /// Lifecycle state
    #[serde(default)]
    pub status: JobStatus,

    /// Vendor task identifier, set at most once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,

    /// Vendor clip folder, set once the task is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_folder_id: Option<String>,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Number of times the job was claimed
    #[serde(default)]
    pub attempts: u32,

    /// Last heartbeat written by the owning worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_polled_at: Option<DateTime<Utc>>,

    /// Failure reason (only when failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Produced clips (only when completed)
    #[serde(default)]
    pub result: Vec<Clip>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(project_id: ProjectId, source_media_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            project_id,
            source_media_url: source_media_url.into(),
            status: JobStatus::Queued,
            external_task_id: None,
            external_folder_id: None,
            progress: 0,
            attempts: 0,
            last_polled_at: None,
            error: None,
            result: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Claim the job for processing.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.last_polled_at = Some(now);
        self.updated_at = now;
    }

    /// Merge a partial update. Progress never decreases and the task id is
    /// written only once.
    pub fn apply(&mut self, patch: &JobPatch, now: DateTime<Utc>) {
        if let Some(progress) = patch.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if self.external_task_id.is_none() {
            if let Some(task_id) = &patch.external_task_id {
                self.external_task_id = Some(task_id.clone());
            }
        }
        if let Some(folder_id) = &patch.external_folder_id {
            self.external_folder_id = Some(folder_id.clone());
        }
        self.last_polled_at = Some(now);
        self.updated_at = now;
    }

    /// Mark job as completed.
    pub fn complete(&mut self, clips: Vec<Clip>, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = clips;
        self.error = None;
        self.updated_at = now;
    }

    /// Mark job as failed.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(reason.into());
        self.updated_at = now;
    }

    /// Whether the job has been processing without a heartbeat since `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.last_polled_at.map(|t| t <= cutoff).unwrap_or(true)
    }
}

/// Partial-field merge applied by the queue's `update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPatch {
    pub progress: Option<u8>,
    pub external_task_id: Option<String>,
    pub external_folder_id: Option<String>,
}

impl JobPatch {
    pub fn progress(value: u8) -> Self {
        Self {
            progress: Some(value),
            ..Default::default()
        }
    }

    pub fn with_external_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.external_task_id = Some(task_id.into());
        self
    }

    pub fn with_external_folder_id(mut self, folder_id: impl Into<String>) -> Self {
        self.external_folder_id = Some(folder_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_none() && self.external_task_id.is_none() && self.external_folder_id.is_none()
    }
}
