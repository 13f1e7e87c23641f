//! Collaborators the worker writes to besides the job queue.
//!
//! `ProjectStore` is the owning-project view (existence plus a few merged
//! fields); `BlobStore` is durable object storage for exported clips. Both
//! have production adapters and in-memory versions for tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use reclip_firestore::ProjectRepository;
use reclip_models::{Clip, Project, ProjectId, ProjectUpdate};
use reclip_storage::{public_object_url, R2Client};

use crate::error::{WorkerError, WorkerResult};

/// Content type of exported clips.
pub const CLIP_CONTENT_TYPE: &str = "video/mp4";

/// Owning-project collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// `None` when the project was deleted.
    async fn get_project(&self, project_id: &ProjectId) -> WorkerResult<Option<Project>>;

    /// Merge fields into an existing project.
    ///
    /// Must fail with `WorkerError::ProjectNotFound` when the project is gone
    /// and must never recreate it.
    async fn update_project(&self, project_id: &ProjectId, update: ProjectUpdate) -> WorkerResult<()>;
}

/// Durable object storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `path` and return their durable public URL.
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> WorkerResult<String>;
}

// =============================================================================
// Production adapters
// =============================================================================

#[async_trait]
impl ProjectStore for ProjectRepository {
    async fn get_project(&self, project_id: &ProjectId) -> WorkerResult<Option<Project>> {
        Ok(self.get(project_id).await?)
    }

    async fn update_project(&self, project_id: &ProjectId, update: ProjectUpdate) -> WorkerResult<()> {
        self.update(project_id, &update).await.map_err(|e| {
            if e.is_not_found() {
                WorkerError::project_not_found(project_id.as_str())
            } else {
                WorkerError::Firestore(e)
            }
        })
    }
}

#[async_trait]
impl BlobStore for R2Client {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> WorkerResult<String> {
        Ok(self.upload_bytes(bytes, path, CLIP_CONTENT_TYPE).await?)
    }
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// A project as held by `MemoryProjectStore`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredProject {
    pub project: Project,
    pub clips: Option<Vec<Clip>>,
    pub clip_task_progress: Option<u8>,
}

/// In-memory project store.
#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    projects: Mutex<HashMap<ProjectId, StoredProject>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) a project with the given id.
    pub async fn create(&self, project_id: &ProjectId) {
        let project = Project {
            id: project_id.to_string(),
            ..Default::default()
        };
        self.projects.lock().await.insert(
            project_id.clone(),
            StoredProject {
                project,
                ..Default::default()
            },
        );
    }

    /// Delete a project. Returns whether it existed.
    pub async fn delete(&self, project_id: &ProjectId) -> bool {
        self.projects.lock().await.remove(project_id).is_some()
    }

    pub async fn snapshot(&self, project_id: &ProjectId) -> Option<StoredProject> {
        self.projects.lock().await.get(project_id).cloned()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get_project(&self, project_id: &ProjectId) -> WorkerResult<Option<Project>> {
        Ok(self
            .projects
            .lock()
            .await
            .get(project_id)
            .map(|stored| stored.project.clone()))
    }

    async fn update_project(&self, project_id: &ProjectId, update: ProjectUpdate) -> WorkerResult<()> {
        let mut projects = self.projects.lock().await;
        let stored = projects
            .get_mut(project_id)
            .ok_or_else(|| WorkerError::project_not_found(project_id.as_str()))?;

        if let Some(task_id) = update.klap_task_id {
            stored.project.klap_task_id = Some(task_id);
        }
        if let Some(folder_id) = update.klap_folder_id {
            stored.project.klap_folder_id = Some(folder_id);
        }
        if let Some(clips) = update.clips {
            stored.project.clip_count = clips.len() as u32;
            stored.clips = Some(clips);
        }
        if let Some(progress) = update.clip_task_progress {
            stored.clip_task_progress = Some(progress);
        }
        Ok(())
    }
}

/// In-memory blob store with public URLs under `base_url`.
#[derive(Debug)]
pub struct MemoryBlobStore {
    base_url: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(path).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> WorkerResult<String> {
        if path.is_empty() || path.starts_with('/') {
            return Err(WorkerError::upload_failed(format!("invalid path: {:?}", path)));
        }
        self.objects.lock().await.insert(path.to_string(), bytes);
        Ok(public_object_url(&self.base_url, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_project_update_never_recreates() {
        let store = MemoryProjectStore::new();
        let project_id = ProjectId::from("p1");

        let err = store
            .update_project(&project_id, ProjectUpdate::new().clip_task_progress(10))
            .await
            .unwrap_err();
        assert!(err.is_project_gone());
        assert!(store.get_project(&project_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_project_merge() {
        let store = MemoryProjectStore::new();
        let project_id = ProjectId::from("p1");
        store.create(&project_id).await;

        store
            .update_project(&project_id, ProjectUpdate::new().klap_task_id("task-1"))
            .await
            .unwrap();
        store
            .update_project(&project_id, ProjectUpdate::new().clip_task_progress(40))
            .await
            .unwrap();

        let stored = store.snapshot(&project_id).await.unwrap();
        assert_eq!(stored.project.klap_task_id.as_deref(), Some("task-1"));
        assert_eq!(stored.clip_task_progress, Some(40));
        assert!(stored.clips.is_none());
    }

    #[tokio::test]
    async fn test_memory_blob_upload_returns_public_url() {
        let blobs = MemoryBlobStore::new("https://media.example.com/");
        let url = blobs
            .upload("projects/p1/clips/clip_001.mp4", vec![1, 2, 3])
            .await
            .unwrap();

        assert_eq!(url, "https://media.example.com/projects/p1/clips/clip_001.mp4");
        assert_eq!(blobs.get("projects/p1/clips/clip_001.mp4").await, Some(vec![1, 2, 3]));
        assert!(blobs.upload("/absolute", vec![]).await.is_err());
    }
}
