//! Project documents as seen by the clip pipeline.
//!
//! The pipeline reads only existence and the vendor cross-references, and
//! writes a handful of fields with an update mask so the rest of the
//! project document is left alone:
//! - `klapTaskId`, `klapFolderId`
//! - `folders.clips` (whole clip set, replaced) and `clipCount`
//! - `tasks.clips.progress`

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use reclip_models::{Clip, Project, ProjectId, ProjectUpdate};

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{field_at, Document, FromFirestoreValue, ToFirestoreValue, Value};

pub const PROJECTS_COLLECTION: &str = "projects";

/// Repository for project documents.
#[derive(Clone)]
pub struct ProjectRepository {
    client: FirestoreClient,
    collection: String,
}

impl ProjectRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self::with_collection(client, PROJECTS_COLLECTION)
    }

    pub fn with_collection(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    /// Get a project. `None` when it was deleted.
    pub async fn get(&self, project_id: &ProjectId) -> FirestoreResult<Option<Project>> {
        let doc = self
            .client
            .with_retry("get_project", || {
                self.client.get_document(&self.collection, project_id.as_str())
            })
            .await?;

        Ok(doc.map(|d| document_to_project(&d, project_id)))
    }

    /// Merge an update into an existing project.
    ///
    /// Fails with `NotFound` when the project no longer exists; the write
    /// never recreates a deleted project.
    pub async fn update(&self, project_id: &ProjectId, update: &ProjectUpdate) -> FirestoreResult<()> {
        if update.is_empty() {
            return Ok(());
        }

        let (fields, mask) = project_update_to_fields(update);
        debug!(project_id = %project_id, fields = ?mask, "Updating project");

        self.client
            .with_retry("update_project", || {
                self.client.update_document(
                    &self.collection,
                    project_id.as_str(),
                    fields.clone(),
                    &mask,
                    true,
                )
            })
            .await?;
        Ok(())
    }
}

/// Build the patch body and its update mask.
pub fn project_update_to_fields(update: &ProjectUpdate) -> (HashMap<String, Value>, Vec<String>) {
    let mut fields = HashMap::new();
    let mut mask = Vec::new();

    if let Some(task_id) = &update.klap_task_id {
        fields.insert("klapTaskId".to_string(), task_id.to_firestore_value());
        mask.push("klapTaskId".to_string());
    }
    if let Some(folder_id) = &update.klap_folder_id {
        fields.insert("klapFolderId".to_string(), folder_id.to_firestore_value());
        mask.push("klapFolderId".to_string());
    }
    if let Some(clips) = &update.clips {
        let values = clips.iter().map(clip_to_value).collect();
        fields.insert(
            "folders".to_string(),
            Value::map(HashMap::from([("clips".to_string(), Value::array(values))])),
        );
        fields.insert("clipCount".to_string(), clips.len().to_firestore_value());
        mask.push("folders.clips".to_string());
        mask.push("clipCount".to_string());
    }
    if let Some(progress) = update.clip_task_progress {
        let clips_task = Value::map(HashMap::from([(
            "progress".to_string(),
            progress.to_firestore_value(),
        )]));
        fields.insert(
            "tasks".to_string(),
            Value::map(HashMap::from([("clips".to_string(), clips_task)])),
        );
        mask.push("tasks.clips.progress".to_string());
    }

    fields.insert("updatedAt".to_string(), Utc::now().to_firestore_value());
    mask.push("updatedAt".to_string());

    (fields, mask)
}

fn clip_to_value(clip: &Clip) -> Value {
    let mut f = HashMap::new();
    f.insert("id".to_string(), clip.id.to_firestore_value());
    f.insert("title".to_string(), clip.title.to_firestore_value());
    f.insert("description".to_string(), clip.description.to_firestore_value());
    f.insert("startTime".to_string(), clip.start_time.to_firestore_value());
    f.insert("endTime".to_string(), clip.end_time.to_firestore_value());
    f.insert("duration".to_string(), clip.duration.to_firestore_value());
    f.insert("thumbnailUrl".to_string(), clip.thumbnail_url.to_firestore_value());
    f.insert("tags".to_string(), clip.tags.to_firestore_value());
    f.insert("viralityScore".to_string(), clip.virality_score.to_firestore_value());
    f.insert("exportUrl".to_string(), clip.export_url.to_firestore_value());
    f.insert("transcript".to_string(), clip.transcript.to_firestore_value());
    f.insert("raw".to_string(), clip.raw.to_firestore_value());
    Value::map(f)
}

fn document_to_project(doc: &Document, project_id: &ProjectId) -> Project {
    let empty = HashMap::new();
    let fields = doc.fields.as_ref().unwrap_or(&empty);
    let string = |name: &str| {
        fields
            .get(name)
            .and_then(String::from_firestore_value)
            .filter(|s| !s.is_empty())
    };

    let clip_count = fields
        .get("clipCount")
        .and_then(u32::from_firestore_value)
        .or_else(|| {
            field_at(fields, "folders.clips")
                .and_then(Value::as_array)
                .map(|clips| clips.len() as u32)
        })
        .unwrap_or(0);

    Project {
        id: doc.id().unwrap_or(project_id.as_str()).to_string(),
        klap_task_id: string("klapTaskId"),
        klap_folder_id: string("klapFolderId"),
        clip_count,
    }
}
