//! Job enqueue and status handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use reclip_models::{Job, JobId, ProjectId};
use reclip_queue::JobStore;

use crate::auth::WorkerAuth;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::validate_media_url;
use crate::state::AppState;

/// Enqueue request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    #[validate(length(min = 1, max = 128))]
    pub project_id: String,
    #[validate(custom(function = "validate_media_url"))]
    pub source_media_url: String,
}

/// Enqueue a clip job for a project.
pub async fn create_job(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let project_id = ProjectId::from(request.project_id.trim());
    let job = state
        .jobs
        .enqueue(project_id, request.source_media_url.trim().to_string())
        .await?;

    metrics::record_job_enqueued();
    info!(job_id = %job.id, project_id = %job.project_id, "Job enqueued");

    Ok((StatusCode::CREATED, Json(job)))
}

/// Current state of one job.
pub async fn get_job(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    state
        .jobs
        .get(&JobId::from(job_id.as_str()))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))
}

/// Jobs of one project.
#[derive(Debug, Serialize)]
pub struct ProjectJobsResponse {
    pub jobs: Vec<Job>,
}

pub async fn list_project_jobs(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectJobsResponse>> {
    let jobs = state
        .jobs
        .list_for_project(&ProjectId::from(project_id.as_str()))
        .await?;
    Ok(Json(ProjectJobsResponse { jobs }))
}
