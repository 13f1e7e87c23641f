use reclip_klap::ClipDetails;
use reclip_models::{clip_storage_key, Clip, ClipRef, ProjectId};

use crate::context::WorkerContext;
use crate::logging::JobLogger;

/// Length assumed for a clip the vendor gave no timing for.
pub(super) const DEFAULT_CLIP_SECONDS: f64 = 30.0;

/// Why a clip was dropped from the result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipSkipped {
    /// Step that failed: `export`, `download` or `upload`
    pub stage: &'static str,
    pub message: String,
}

impl ClipSkipped {
    fn new(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Score for a clip without one: earlier clips rank higher.
pub(super) fn default_score(index: usize) -> f64 {
    (0.9 - 0.1 * index as f64).clamp(0.1, 1.0)
}

/// Build the clip record, filling gaps in the vendor metadata from the
/// clip's position in the folder.
pub(super) fn assemble_clip(
    index: usize,
    clip_ref: &ClipRef,
    details: ClipDetails,
    export_url: String,
) -> Clip {
    let start_time = details
        .start_time
        .unwrap_or(index as f64 * DEFAULT_CLIP_SECONDS);
    let duration = details
        .duration
        .filter(|d| *d > 0.0)
        .unwrap_or(DEFAULT_CLIP_SECONDS);
    let end_time = details
        .end_time
        .filter(|end| *end > start_time)
        .unwrap_or(start_time + duration);

    Clip {
        id: clip_ref.to_string(),
        title: details
            .title
            .unwrap_or_else(|| format!("Clip {}", index + 1)),
        description: details.description.unwrap_or_default(),
        start_time,
        end_time,
        duration,
        thumbnail_url: details.thumbnail_url,
        tags: details.tags,
        virality_score: details
            .virality_score
            .unwrap_or_else(|| default_score(index)),
        export_url,
        transcript: details.transcript.unwrap_or_default(),
        raw: details.raw,
    }
}

/// Take one clip reference from vendor folder to durable storage.
///
/// Metadata is best effort. Export, download and upload failures drop the
/// clip; nothing is stored for it.
pub async fn process_single_clip(
    ctx: &WorkerContext,
    logger: &JobLogger,
    project_id: &ProjectId,
    folder_id: &str,
    index: usize,
    clip_ref: &ClipRef,
) -> Result<Clip, ClipSkipped> {
    let details = match ctx.vendor.get_clip_details(folder_id, clip_ref).await {
        Ok(details) => details,
        Err(e) => {
            logger.log_warning(&format!(
                "clip {} details unavailable, using defaults: {}",
                clip_ref, e
            ));
            ClipDetails::default()
        }
    };

    let download_url = ctx
        .vendor
        .export_clip(folder_id, clip_ref)
        .await
        .map_err(|e| ClipSkipped::new("export", e.to_string()))?;

    let bytes = ctx
        .vendor
        .download_export(&download_url)
        .await
        .map_err(|e| ClipSkipped::new("download", e.to_string()))?;
    if bytes.is_empty() {
        return Err(ClipSkipped::new("download", "export is empty"));
    }

    let key = clip_storage_key(project_id.as_str(), index);
    let export_url = ctx
        .blobs
        .upload(&key, bytes)
        .await
        .map_err(|e| ClipSkipped::new("upload", e.to_string()))?;
    if export_url.is_empty() {
        return Err(ClipSkipped::new("upload", "storage returned no URL"));
    }

    Ok(assemble_clip(index, clip_ref, details, export_url))
}
