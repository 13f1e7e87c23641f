//! Shared handles for one worker invocation.

use std::sync::Arc;

use tracing::info;

use reclip_firestore::{FirestoreClient, ProjectRepository};
use reclip_klap::{KlapClient, TaskVendor};
use reclip_queue::{JobStore, ProgressChannel, ProgressPublisher, QueueConfig};
use reclip_storage::R2Client;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::stores::{BlobStore, ProjectStore};

/// Everything the worker talks to.
#[derive(Clone)]
pub struct WorkerContext {
    pub jobs: Arc<dyn JobStore>,
    pub vendor: Arc<dyn TaskVendor>,
    pub projects: Arc<dyn ProjectStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub publisher: Option<Arc<dyn ProgressPublisher>>,
    pub config: WorkerConfig,
}

impl WorkerContext {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        vendor: Arc<dyn TaskVendor>,
        projects: Arc<dyn ProjectStore>,
        blobs: Arc<dyn BlobStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            vendor,
            projects,
            blobs,
            publisher: None,
            config,
        }
    }

    /// Also publish progress events.
    pub fn with_publisher(mut self, publisher: Arc<dyn ProgressPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Build the production collaborators around an existing job store.
    ///
    /// Fails when the worker configuration is invalid or any collaborator
    /// is missing its settings.
    pub async fn from_env(jobs: Arc<dyn JobStore>) -> WorkerResult<Self> {
        let config = WorkerConfig::from_env();
        config.validate()?;

        let vendor = KlapClient::from_env()?;
        let blobs = R2Client::from_env().await?;
        let projects = ProjectRepository::new(FirestoreClient::from_env().await?);
        let publisher = ProgressChannel::new(&QueueConfig::from_env().redis_url)?;

        info!(
            poll_interval_secs = config.poll_interval.as_secs(),
            max_poll_attempts = config.max_poll_attempts,
            "Worker collaborators initialized"
        );

        Ok(Self::new(
            jobs,
            Arc::new(vendor),
            Arc::new(projects),
            Arc::new(blobs),
            config,
        )
        .with_publisher(Arc::new(publisher)))
    }
}
