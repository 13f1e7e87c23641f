//! Content project as seen by the clip pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Clip;

/// Identifier of the owning content project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Read view of a project. The worker only cares that it exists and which
/// vendor identifiers it has been cross-referenced with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub klap_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub klap_folder_id: Option<String>,
    #[serde(default)]
    pub clip_count: u32,
}

/// Partial project write. Only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectUpdate {
    pub klap_task_id: Option<String>,
    pub klap_folder_id: Option<String>,
    /// Replaces the project's whole clip set
    pub clips: Option<Vec<Clip>>,
    /// Progress of the project's clip task (0-100)
    pub clip_task_progress: Option<u8>,
}

impl ProjectUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn klap_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.klap_task_id = Some(task_id.into());
        self
    }

    pub fn klap_folder_id(mut self, folder_id: impl Into<String>) -> Self {
        self.klap_folder_id = Some(folder_id.into());
        self
    }

    pub fn clips(mut self, clips: Vec<Clip>) -> Self {
        self.clips = Some(clips);
        self
    }

    pub fn clip_task_progress(mut self, progress: u8) -> Self {
        self.clip_task_progress = Some(progress.min(100));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.klap_task_id.is_none()
            && self.klap_folder_id.is_none()
            && self.clips.is_none()
            && self.clip_task_progress.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_update_builder() {
        let update = ProjectUpdate::new().klap_task_id("t1").clip_task_progress(120);
        assert_eq!(update.klap_task_id.as_deref(), Some("t1"));
        assert_eq!(update.clip_task_progress, Some(100));
        assert!(!update.is_empty());
        assert!(ProjectUpdate::new().is_empty());
    }
}
