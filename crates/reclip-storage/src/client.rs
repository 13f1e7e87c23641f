//! R2 client implementation.

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Public base URL the bucket is served from
    pub public_url: String,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::MissingSetting("R2_ENDPOINT_URL"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::MissingSetting("R2_ACCESS_KEY_ID"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::MissingSetting("R2_SECRET_ACCESS_KEY"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::MissingSetting("R2_BUCKET_NAME"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_url: std::env::var("R2_PUBLIC_URL")
                .map_err(|_| StorageError::MissingSetting("R2_PUBLIC_URL"))?,
        })
    }
}

/// Public URL of an object under a base URL.
pub fn public_object_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
    public_url: String,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub async fn new(config: R2Config) -> StorageResult<Self> {
        if config.public_url.is_empty() {
            return Err(StorageError::invalid_config("R2_PUBLIC_URL cannot be empty"));
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(sdk_config);

        Ok(Self {
            client,
            bucket: config.bucket_name,
            public_url: config.public_url,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = R2Config::from_env()?;
        Self::new(config).await
    }

    /// Public URL for a key.
    pub fn public_url(&self, key: &str) -> String {
        public_object_url(&self.public_url, key)
    }

    /// Upload bytes to R2 and return the object's public URL.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        if key.is_empty() || key.starts_with('/') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let size = data.len();
        debug!("Uploading {} bytes to {}", size, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload(key, e))?;

        info!("Uploaded {} bytes to {}", size, key);
        Ok(self.public_url(key))
    }
}
