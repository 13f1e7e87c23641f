//! Application state.

use std::sync::Arc;

use reclip_queue::{JobQueue, JobStore};
use reclip_worker::{ClipWorker, WorkerContext};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::security::SecretVerifier;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: Arc<dyn JobStore>,
    pub worker: Arc<ClipWorker>,
    pub secret: Arc<SecretVerifier>,
}

impl AppState {
    /// Create application state from its parts.
    pub fn new(config: ApiConfig, worker: ClipWorker) -> ApiResult<Self> {
        let secret = config
            .worker_secret
            .as_deref()
            .and_then(SecretVerifier::new)
            .ok_or_else(|| ApiError::config("WORKER_SECRET must be set"))?;

        Ok(Self {
            jobs: Arc::clone(&worker.context().jobs),
            worker: Arc::new(worker),
            secret: Arc::new(secret),
            config,
        })
    }

    /// Connect the Redis queue and the worker's collaborators from the environment.
    pub async fn from_env(config: ApiConfig) -> ApiResult<Self> {
        let queue: Arc<dyn JobStore> = Arc::new(JobQueue::from_env()?);
        let ctx = WorkerContext::from_env(queue).await?;
        Self::new(config, ClipWorker::new(ctx))
    }
}
