//! Errors raised while storing exported clips.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A required `R2_*` variable is absent.
    #[error("clip storage is not configured: {0} is not set")]
    MissingSetting(&'static str),

    #[error("invalid clip storage configuration: {0}")]
    InvalidConfig(String),

    /// Keys are relative to the bucket root.
    #[error("clip object key {0:?} is empty or absolute")]
    InvalidKey(String),

    #[error("uploading clip object {key} failed: {message}")]
    Upload { key: String, message: String },
}

impl StorageError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn upload(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Upload {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Configuration problems will not clear up on their own.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::MissingSetting(_) | Self::InvalidConfig(_))
    }
}
