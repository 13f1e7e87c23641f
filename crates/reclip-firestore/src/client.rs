//! Firestore REST API client.
//!
//! - Token caching with refresh margin and one re-auth on expired tokens
//! - HTTP client tuning (pooling, timeouts)
//! - Bounded retry with jitter for transport failures
//! - Tracing spans and request metrics

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_request;
use crate::retry::{self, RetryConfig};
use crate::token_cache::TokenCache;
use crate::types::{Document, Value};

// =============================================================================
// Configuration
// =============================================================================

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// GCP project ID
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
        })
    }

    /// REST base URL for documents in this database.
    pub fn documents_url(&self) -> String {
        format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }
}

// =============================================================================
// Client
// =============================================================================

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    token_cache: Arc<TokenCache>,
}

impl FirestoreClient {
    /// Create a new client authenticated with the service account from the environment.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        let provider = Self::create_auth_provider()?;
        Self::with_token_provider(config, provider)
    }

    /// Create a client with an explicit token provider.
    pub fn with_token_provider(
        config: FirestoreConfig,
        provider: Arc<dyn TokenProvider>,
    ) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("reclip-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        Ok(Self {
            http,
            base_url: config.documents_url(),
            config,
            token_cache: Arc::new(TokenCache::new(provider)),
        })
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        let config = FirestoreConfig::from_env()?;
        Self::new(config).await
    }

    fn document_path(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    /// Send an authenticated request, re-authenticating once on an expired token.
    async fn send<F>(&self, url: &str, build: F) -> FirestoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.token_cache.get_token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&body) {
            return Err(FirestoreError::from_http_status(
                401,
                format!("{} failed: {}", url, body),
            ));
        }

        self.token_cache.invalidate().await;
        let token = self.token_cache.get_token().await?;
        Ok(build(&token).send().await?)
    }

    // =========================================================================
    // Document operations
    // =========================================================================

    /// Get a document. A missing document is `Ok(None)`.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_path(collection, doc_id);

        self.execute_request("get_document", collection, Some(doc_id), async {
            let response = self
                .send(&url, |token| self.http.get(&url).bearer_auth(token))
                .await?;

            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Patch the fields named in `update_mask`.
    ///
    /// With `must_exist`, a missing document is `NotFound` instead of being
    /// created by the patch.
    pub async fn update_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: &[String],
        must_exist: bool,
    ) -> FirestoreResult<Document> {
        let mut params: Vec<String> = update_mask
            .iter()
            .map(|f| format!("updateMask.fieldPaths={}", urlencoding::encode(f)))
            .collect();
        if must_exist {
            params.push("currentDocument.exists=true".to_string());
        }

        let mut url = self.document_path(collection, doc_id);
        if !params.is_empty() {
            url = format!("{}?{}", url, params.join("&"));
        }
        let body = Document::new(fields);

        self.execute_request("update_document", collection, Some(doc_id), async {
            let response = self
                .send(&url, |token| self.http.patch(&url).bearer_auth(token).json(&body))
                .await?;

            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                StatusCode::NOT_FOUND => Err(FirestoreError::not_found(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Execute with this client's retry policy.
    pub async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = FirestoreResult<T>>,
    {
        retry::with_retry(&self.config.retry, operation, op).await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = info_span!(
            "firestore_request",
            operation = %operation,
            collection = %collection,
            doc_id = doc_id.unwrap_or("-")
        );

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

    async fn handle_error_response(status: StatusCode, url: &str, response: Response) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}
