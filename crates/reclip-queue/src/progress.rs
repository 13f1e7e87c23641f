//! Progress events via Redis Pub/Sub.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use reclip_models::JobId;

use crate::error::QueueResult;

/// Message carried by a progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    Progress { value: u8 },
    Completed { clip_count: usize },
    Failed { message: String },
}

/// Progress event published to Redis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Job ID
    pub job_id: JobId,
    pub message: ProgressMessage,
}

impl ProgressEvent {
    pub fn progress(job_id: &JobId, value: u8) -> Self {
        Self {
            job_id: job_id.clone(),
            message: ProgressMessage::Progress {
                value: value.min(100),
            },
        }
    }

    pub fn completed(job_id: &JobId, clip_count: usize) -> Self {
        Self {
            job_id: job_id.clone(),
            message: ProgressMessage::Completed { clip_count },
        }
    }

    pub fn failed(job_id: &JobId, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.clone(),
            message: ProgressMessage::Failed {
                message: message.into(),
            },
        }
    }
}

/// Fire-and-forget publication of progress events.
#[async_trait]
pub trait ProgressPublisher: Send + Sync {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()>;
}

/// Channel for publishing/subscribing to progress events.
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    /// Create a new progress channel.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("progress:{}", job_id)
    }

    /// Subscribe to progress events for a job.
    /// Returns a pinned stream that can be polled with `.next()`.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = ProgressEvent> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl ProgressPublisher for ProgressChannel {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing progress event to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }
}
