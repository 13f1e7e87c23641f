//! Contract of the external conversion vendor.

use async_trait::async_trait;

use reclip_models::ClipRef;

use crate::error::KlapResult;
use crate::types::{ClipDetails, TaskStatus};

/// Video-to-clips conversion service.
///
/// Implementations hold no per-job state; every call is keyed by the ids
/// the vendor handed out.
#[async_trait]
pub trait TaskVendor: Send + Sync {
    /// Start converting a source video. Any error is fatal for the job.
    async fn create_task(&self, media_url: &str) -> KlapResult<String>;

    /// Poll a task. `Transient` and `RateLimited` errors are retryable.
    async fn get_task_status(&self, task_id: &str) -> KlapResult<TaskStatus>;

    /// Clip references in an output folder, in vendor order.
    async fn list_clips(&self, folder_id: &str) -> KlapResult<Vec<ClipRef>>;

    /// Metadata for one clip. Callers treat failures as "use defaults".
    async fn get_clip_details(&self, folder_id: &str, clip: &ClipRef) -> KlapResult<ClipDetails>;

    /// Export a clip and wait for its download URL.
    async fn export_clip(&self, folder_id: &str, clip: &ClipRef) -> KlapResult<String>;

    /// Fetch the exported bytes.
    async fn download_export(&self, download_url: &str) -> KlapResult<Vec<u8>>;
}
