//! Redis hash encoding of a job record.
//!
//! Scalars are stored as individual hash fields so the Lua scripts can
//! guard and merge them in place. Timestamps are epoch milliseconds.
//! Only the clip list is stored as JSON.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use reclip_models::{Job, JobId, JobStatus, ProjectId};

use crate::error::{QueueError, QueueResult};

pub(crate) mod field {
    pub const ID: &str = "id";
    pub const PROJECT_ID: &str = "project_id";
    pub const SOURCE_MEDIA_URL: &str = "source_media_url";
    pub const STATUS: &str = "status";
    pub const EXTERNAL_TASK_ID: &str = "external_task_id";
    pub const EXTERNAL_FOLDER_ID: &str = "external_folder_id";
    pub const PROGRESS: &str = "progress";
    pub const ATTEMPTS: &str = "attempts";
    pub const LAST_POLLED_AT: &str = "last_polled_at";
    pub const ERROR: &str = "error";
    pub const RESULT: &str = "result";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

/// Flatten a job into hash field/value pairs.
pub(crate) fn encode(job: &Job) -> QueueResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        (field::ID, job.id.to_string()),
        (field::PROJECT_ID, job.project_id.to_string()),
        (field::SOURCE_MEDIA_URL, job.source_media_url.clone()),
        (field::STATUS, job.status.as_str().to_string()),
        (field::PROGRESS, job.progress.to_string()),
        (field::ATTEMPTS, job.attempts.to_string()),
        (field::RESULT, serde_json::to_string(&job.result)?),
        (field::CREATED_AT, job.created_at.timestamp_millis().to_string()),
        (field::UPDATED_AT, job.updated_at.timestamp_millis().to_string()),
    ];
    if let Some(task_id) = &job.external_task_id {
        fields.push((field::EXTERNAL_TASK_ID, task_id.clone()));
    }
    if let Some(folder_id) = &job.external_folder_id {
        fields.push((field::EXTERNAL_FOLDER_ID, folder_id.clone()));
    }
    if let Some(at) = job.last_polled_at {
        fields.push((field::LAST_POLLED_AT, at.timestamp_millis().to_string()));
    }
    if let Some(error) = &job.error {
        fields.push((field::ERROR, error.clone()));
    }
    Ok(fields)
}

/// Rebuild a job from `HGETALL` output. An empty map means the job is gone.
pub(crate) fn decode(map: HashMap<String, String>) -> QueueResult<Option<Job>> {
    if map.is_empty() {
        return Ok(None);
    }

    let id = required(&map, field::ID, "?")?;
    let status: JobStatus = required(&map, field::STATUS, &id)?
        .parse()
        .map_err(|e: reclip_models::ParseJobStatusError| QueueError::corrupt(&id, e.to_string()))?;

    let result = match map.get(field::RESULT) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
            .map_err(|e| QueueError::corrupt(&id, format!("result: {}", e)))?,
        _ => Vec::new(),
    };

    Ok(Some(Job {
        id: JobId::from_string(&id),
        project_id: ProjectId::from_string(required(&map, field::PROJECT_ID, &id)?),
        source_media_url: required(&map, field::SOURCE_MEDIA_URL, &id)?,
        status,
        external_task_id: optional(&map, field::EXTERNAL_TASK_ID),
        external_folder_id: optional(&map, field::EXTERNAL_FOLDER_ID),
        progress: number(&map, field::PROGRESS, &id)?.unwrap_or(0).min(100) as u8,
        attempts: number(&map, field::ATTEMPTS, &id)?.unwrap_or(0) as u32,
        last_polled_at: timestamp(&map, field::LAST_POLLED_AT, &id)?,
        error: optional(&map, field::ERROR),
        result,
        created_at: timestamp(&map, field::CREATED_AT, &id)?.unwrap_or_else(Utc::now),
        updated_at: timestamp(&map, field::UPDATED_AT, &id)?.unwrap_or_else(Utc::now),
    }))
}

fn required(map: &HashMap<String, String>, name: &str, id: &str) -> QueueResult<String> {
    map.get(name)
        .cloned()
        .ok_or_else(|| QueueError::corrupt(id, format!("missing field {}", name)))
}

fn optional(map: &HashMap<String, String>, name: &str) -> Option<String> {
    map.get(name).filter(|v| !v.is_empty()).cloned()
}

fn number(map: &HashMap<String, String>, name: &str, id: &str) -> QueueResult<Option<i64>> {
    match map.get(name) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|e| QueueError::corrupt(id, format!("{}: {}", name, e))),
        _ => Ok(None),
    }
}

fn timestamp(
    map: &HashMap<String, String>,
    name: &str,
    id: &str,
) -> QueueResult<Option<DateTime<Utc>>> {
    Ok(number(map, name, id)?.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
}
