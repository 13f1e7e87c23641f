//! Worker trigger handler.
//!
//! An external scheduler calls this route repeatedly; each call runs at most
//! one job to a terminal state before responding.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use reclip_worker::RunOutcome;

use crate::auth::WorkerAuth;
use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

/// Trigger response.
///
/// An idle run only carries `message`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_count: Option<usize>,
}

impl From<&RunOutcome> for TriggerResponse {
    fn from(outcome: &RunOutcome) -> Self {
        let clip_count = match outcome {
            RunOutcome::Completed { clip_count, .. } => Some(*clip_count),
            _ => None,
        };
        let is_idle = matches!(outcome, RunOutcome::Idle);

        Self {
            success: (!is_idle).then(|| outcome.is_success()),
            job_id: outcome.job_id().map(|id| id.to_string()),
            message: outcome.message(),
            status: (!is_idle).then(|| outcome_label(outcome)),
            clip_count,
        }
    }
}

fn outcome_label(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Idle => "idle",
        RunOutcome::Completed { .. } => "completed",
        RunOutcome::Failed { .. } => "failed",
        RunOutcome::Removed { .. } => "removed",
    }
}

/// Process the next queued job.
///
/// Every recorded outcome is a 200; only a queue failure before a job was
/// claimed surfaces as an error.
pub async fn process_next_job(
    _auth: WorkerAuth,
    State(state): State<AppState>,
) -> ApiResult<Json<TriggerResponse>> {
    let outcome = state.worker.run_once().await.map_err(|e| {
        warn!(error = %e, "Worker trigger could not claim a job");
        metrics::record_worker_trigger("error");
        e
    })?;

    metrics::record_worker_trigger(outcome_label(&outcome));
    info!(
        job_id = ?outcome.job_id(),
        status = outcome_label(&outcome),
        "{}",
        outcome.message()
    );

    Ok(Json(TriggerResponse::from(&outcome)))
}
