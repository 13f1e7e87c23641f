//! Per-folder clip extraction.
//!
//! Clip references are handled one at a time, in vendor order: the vendor
//! rate-limits exports aggressively. Successful clips are accumulated, failed
//! ones are dropped.

use reclip_models::{Clip, ProjectId};

use crate::context::WorkerContext;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics::{record_clip_persisted, record_clip_skipped};
use crate::progress::ProgressSink;

pub mod clip;

pub use clip::{process_single_clip, ClipSkipped};

/// Progress when clip extraction starts.
pub const PIPELINE_START_PROGRESS: u8 = 50;
/// Progress once every reference has been processed.
pub const PIPELINE_END_PROGRESS: u8 = 90;

pub struct ClipProcessingResults {
    /// Persisted clips, in vendor order
    pub clips: Vec<Clip>,
    pub skipped: Vec<ClipSkipped>,
    pub total: usize,
}

/// Progress after `processed` of `total` references.
pub fn pipeline_progress(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return PIPELINE_END_PROGRESS;
    }
    let span = (PIPELINE_END_PROGRESS - PIPELINE_START_PROGRESS) as usize;
    PIPELINE_START_PROGRESS + (processed.min(total) * span / total) as u8
}

/// Export, download and persist every clip in a ready folder.
///
/// Only listing the folder can fail the call; per-clip failures are
/// recorded in `skipped`. Stops early, with partial results, once the sink
/// reports the job's claim lost.
pub async fn process_clips(
    ctx: &WorkerContext,
    sink: &ProgressSink,
    logger: &JobLogger,
    project_id: &ProjectId,
    folder_id: &str,
) -> WorkerResult<ClipProcessingResults> {
    let clip_refs = ctx.vendor.list_clips(folder_id).await?;
    let total = clip_refs.len();
    logger.log_progress(&format!("extracting {} clips from folder {}", total, folder_id));

    let mut clips = Vec::with_capacity(total);
    let mut skipped = Vec::new();

    for (index, clip_ref) in clip_refs.iter().enumerate() {
        if sink.claim_lost() {
            logger.log_warning(&format!(
                "claim lost; abandoning extraction after {} of {} clips",
                index, total
            ));
            break;
        }

        match process_single_clip(ctx, logger, project_id, folder_id, index, clip_ref).await {
            Ok(clip) => {
                record_clip_persisted();
                clips.push(clip);
            }
            Err(skip) => {
                logger.log_warning(&format!(
                    "skipping clip {} ({}/{}) at {}: {}",
                    clip_ref,
                    index + 1,
                    total,
                    skip.stage,
                    skip.message
                ));
                record_clip_skipped(skip.stage);
                skipped.push(skip);
            }
        }

        sink.report(pipeline_progress(index + 1, total)).await;
    }

    logger.log_progress(&format!(
        "persisted {} of {} clips ({} skipped)",
        clips.len(),
        total,
        skipped.len()
    ));

    Ok(ClipProcessingResults {
        clips,
        skipped,
        total,
    })
}
