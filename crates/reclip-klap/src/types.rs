//! Klap API types.

use serde::{Deserialize, Serialize};

/// Observed state of a vendor task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Still converting
    Pending,
    /// Conversion done; clips live in the output folder
    Ready { folder_id: String },
    /// Vendor gave up on the task
    Failed { reason: String },
}

/// Best-effort clip metadata. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipDetails {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub duration: Option<f64>,
    pub thumbnail_url: Option<String>,
    pub tags: Vec<String>,
    /// Normalized to 0-1
    pub virality_score: Option<f64>,
    pub transcript: Option<String>,
    /// Vendor payload as received
    pub raw: serde_json::Value,
}

impl ClipDetails {
    /// Build from a raw vendor payload, tolerating missing or odd fields.
    pub fn from_raw(raw: serde_json::Value) -> Self {
        let parsed: RawClipDetails = serde_json::from_value(raw.clone()).unwrap_or_default();
        Self {
            title: parsed.name.filter(|s| !s.trim().is_empty()),
            description: parsed.description,
            start_time: parsed.start_time,
            end_time: parsed.end_time,
            duration: parsed.duration.or(match (parsed.start_time, parsed.end_time) {
                (Some(start), Some(end)) if end > start => Some(end - start),
                _ => None,
            }),
            thumbnail_url: parsed.thumbnail,
            tags: parsed.tags,
            virality_score: parsed.virality_score.map(normalize_score),
            transcript: parsed.transcript,
            raw,
        }
    }
}

/// Vendor scores come as 0-100; some older payloads are already 0-1.
pub fn normalize_score(score: f64) -> f64 {
    let scaled = if score > 1.0 { score / 100.0 } else { score };
    scaled.clamp(0.0, 1.0)
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct CreateTaskRequest<'a> {
    pub source_video_url: &'a str,
    pub language: &'a str,
    pub max_duration: u32,
    pub max_clip_count: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskResponse {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClipSummary {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExportRequest {
    pub watermark: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExportResponse {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub src_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawClipDetails {
    #[serde(default, alias = "title")]
    name: Option<String>,
    #[serde(default, alias = "virality_score_explanation")]
    description: Option<String>,
    #[serde(default, alias = "start")]
    start_time: Option<f64>,
    #[serde(default, alias = "end")]
    end_time: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default, alias = "thumbnail_url")]
    thumbnail: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    virality_score: Option<f64>,
    #[serde(default)]
    transcript: Option<String>,
}
