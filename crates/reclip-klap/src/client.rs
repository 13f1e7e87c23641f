//! Klap REST API client.
//!
//! Maps HTTP outcomes onto the vendor error taxonomy:
//! - 429 becomes `RateLimited` (with `Retry-After` when sent)
//! - 5xx and network failures become `Transient`
//! - Other non-2xx become `TaskCreation` on create and `Export` on export

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, info_span, warn, Instrument};

use reclip_models::ClipRef;

use crate::error::{KlapError, KlapResult};
use crate::metrics::record_request;
use crate::types::{
    ClipDetails, ClipSummary, CreateTaskRequest, ExportRequest, ExportResponse, TaskResponse,
    TaskStatus,
};
use crate::vendor::TaskVendor;

// =============================================================================
// Configuration
// =============================================================================

/// Klap client configuration.
#[derive(Debug, Clone)]
pub struct KlapConfig {
    /// API base URL
    pub api_url: String,
    /// Static API key sent as a bearer token
    pub api_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Export status checks before giving up on a clip
    pub export_poll_attempts: u32,
    /// Delay between export status checks
    pub export_poll_interval: Duration,
    /// Transcription language hint
    pub language: String,
    /// Longest clip the vendor should cut (seconds)
    pub max_clip_duration: u32,
    /// Upper bound on clips per task
    pub max_clip_count: u32,
}

impl KlapConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            export_poll_attempts: 30,
            export_poll_interval: Duration::from_secs(2),
            language: "en".to_string(),
            max_clip_duration: 60,
            max_clip_count: 10,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> KlapResult<Self> {
        let api_key = std::env::var("KLAP_API_KEY")
            .map_err(|_| KlapError::config("KLAP_API_KEY not set"))?;
        if api_key.is_empty() {
            return Err(KlapError::config("KLAP_API_KEY cannot be empty"));
        }

        let api_url = std::env::var("KLAP_API_URL")
            .unwrap_or_else(|_| "https://api.klap.app/v2".to_string());
        url::Url::parse(&api_url)
            .map_err(|e| KlapError::config(format!("KLAP_API_URL is invalid: {}", e)))?;

        let defaults = Self::new(api_url, api_key);
        Ok(Self {
            timeout: Duration::from_secs(env_or("KLAP_TIMEOUT_SECS", 30)),
            export_poll_attempts: env_or("KLAP_EXPORT_POLL_ATTEMPTS", 30) as u32,
            export_poll_interval: Duration::from_millis(env_or("KLAP_EXPORT_POLL_INTERVAL_MS", 2000)),
            language: std::env::var("KLAP_LANGUAGE").unwrap_or(defaults.language.clone()),
            ..defaults
        })
    }
}

fn env_or(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Client
// =============================================================================

/// Klap REST API client.
#[derive(Clone)]
pub struct KlapClient {
    http: Client,
    config: KlapConfig,
}

impl KlapClient {
    /// Create a new Klap client.
    pub fn new(config: KlapConfig) -> KlapResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("reclip-klap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| KlapError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> KlapResult<Self> {
        Self::new(KlapConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn execute_request<T, F>(&self, operation: &str, resource: &str, fut: F) -> KlapResult<T>
    where
        F: std::future::Future<Output = KlapResult<T>>,
    {
        let span = info_span!("klap_request", operation = %operation, resource = %resource);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> KlapResult<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> KlapResult<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::handle_error_response(response).await);
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| KlapError::invalid_response(format!("{}: {}", e, truncate(&body))))
    }

    async fn handle_error_response(response: Response) -> KlapError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        KlapError::from_http_status(status, retry_after, truncate(&body))
    }

    async fn export_status(
        &self,
        folder_id: &str,
        clip: &ClipRef,
        export_id: &str,
    ) -> KlapResult<ExportResponse> {
        let url = self.endpoint(&format!(
            "projects/{}/{}/exports/{}",
            folder_id, clip, export_id
        ));
        self.get_json(&url).await
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[async_trait]
impl TaskVendor for KlapClient {
    async fn create_task(&self, media_url: &str) -> KlapResult<String> {
        let url = self.endpoint("tasks/video-to-shorts");
        let body = CreateTaskRequest {
            source_video_url: media_url,
            language: &self.config.language,
            max_duration: self.config.max_clip_duration,
            max_clip_count: self.config.max_clip_count,
        };

        self.execute_request("create_task", "tasks", async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| KlapError::task_creation(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(KlapError::task_creation(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    truncate(&text)
                )));
            }

            let task: TaskResponse = response
                .json()
                .await
                .map_err(|e| KlapError::task_creation(format!("unreadable response: {}", e)))?;
            if task.id.is_empty() {
                return Err(KlapError::task_creation("vendor returned an empty task id"));
            }

            info!(task_id = %task.id, "Created vendor task");
            Ok(task.id)
        })
        .await
    }

    async fn get_task_status(&self, task_id: &str) -> KlapResult<TaskStatus> {
        let url = self.endpoint(&format!("tasks/{}", task_id));

        self.execute_request("get_task_status", task_id, async {
            let task: TaskResponse = self.get_json(&url).await?;
            debug!(task_id = %task.id, status = %task.status, "Polled vendor task");

            let status = match task.status.as_str() {
                "ready" => match task.output_id.filter(|id| !id.is_empty()) {
                    Some(folder_id) => TaskStatus::Ready { folder_id },
                    None => {
                        warn!(task_id = %task_id, "Task reported ready without an output folder");
                        TaskStatus::Pending
                    }
                },
                "error" | "failed" => TaskStatus::Failed {
                    reason: task
                        .error
                        .unwrap_or_else(|| "vendor reported task failure".to_string()),
                },
                _ => TaskStatus::Pending,
            };
            Ok(status)
        })
        .await
    }

    async fn list_clips(&self, folder_id: &str) -> KlapResult<Vec<ClipRef>> {
        let url = self.endpoint(&format!("projects/{}", folder_id));

        self.execute_request("list_clips", folder_id, async {
            let clips: Vec<ClipSummary> = self.get_json(&url).await?;
            Ok(clips.into_iter().map(|c| ClipRef::from(c.id)).collect())
        })
        .await
    }

    async fn get_clip_details(&self, folder_id: &str, clip: &ClipRef) -> KlapResult<ClipDetails> {
        let url = self.endpoint(&format!("projects/{}/{}", folder_id, clip));

        self.execute_request("get_clip_details", clip.as_str(), async {
            let raw: serde_json::Value = self.get_json(&url).await?;
            Ok(ClipDetails::from_raw(raw))
        })
        .await
    }

    async fn export_clip(&self, folder_id: &str, clip: &ClipRef) -> KlapResult<String> {
        let url = self.endpoint(&format!("projects/{}/{}/exports", folder_id, clip));

        self.execute_request("export_clip", clip.as_str(), async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&ExportRequest { watermark: false })
                .send()
                .await
                .map_err(|e| KlapError::export(e.to_string()))?;

            let mut export: ExportResponse = Self::read_json(response)
                .await
                .map_err(|e| KlapError::export(format!("export request rejected: {}", e)))?;

            for attempt in 1..=self.config.export_poll_attempts {
                match export.status.as_str() {
                    "ready" => {
                        if let Some(src) = export.src_url.filter(|u| !u.is_empty()) {
                            debug!(clip = %clip, attempt, "Export ready");
                            return Ok(src);
                        }
                        return Err(KlapError::export("export ready without a download URL"));
                    }
                    "error" | "failed" => {
                        return Err(KlapError::export(
                            export
                                .error
                                .unwrap_or_else(|| "vendor reported export failure".to_string()),
                        ));
                    }
                    _ => {}
                }

                tokio::time::sleep(self.config.export_poll_interval).await;

                export = match self.export_status(folder_id, clip, &export.id).await {
                    Ok(next) => next,
                    Err(e) if e.is_retryable() => {
                        warn!(clip = %clip, attempt, "Export status check failed, retrying: {}", e);
                        continue;
                    }
                    Err(e) => return Err(KlapError::export(e.to_string())),
                };
            }

            Err(KlapError::export(format!(
                "export not ready after {} checks",
                self.config.export_poll_attempts
            )))
        })
        .await
    }

    async fn download_export(&self, download_url: &str) -> KlapResult<Vec<u8>> {
        self.execute_request("download_export", "export", async {
            let response = self
                .http
                .get(download_url)
                .send()
                .await
                .map_err(|e| KlapError::download(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(KlapError::download(format!("HTTP {}", status.as_u16())));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| KlapError::download(e.to_string()))?;
            if bytes.is_empty() {
                return Err(KlapError::download("empty export body"));
            }
            Ok(bytes.to_vec())
        })
        .await
    }
}

// =============================================================================
// Tests
// =============================================================================
