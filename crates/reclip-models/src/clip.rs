//! Clip records produced by a completed job.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque vendor-side identifier for one produced clip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ClipRef(pub String);

impl ClipRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClipRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClipRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A fully persisted clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    /// Vendor clip reference
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Start offset in the source video (seconds)
    pub start_time: f64,
    /// End offset in the source video (seconds)
    pub end_time: f64,
    /// Clip length (seconds)
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Vendor virality score, normalized to 0-1
    pub virality_score: f64,
    /// Durable storage location
    pub export_url: String,
    #[serde(default)]
    pub transcript: String,
    /// Raw vendor metadata, kept for debugging
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Clip {
    /// A clip only belongs in a result set once its bytes are in durable storage.
    pub fn is_persisted(&self) -> bool {
        !self.export_url.is_empty()
    }
}

/// Storage key for a clip's exported bytes.
pub fn clip_storage_key(project_id: &str, index: usize) -> String {
    format!("projects/{}/clips/clip_{:03}.mp4", project_id, index + 1)
}
