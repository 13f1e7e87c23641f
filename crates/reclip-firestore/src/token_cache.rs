//! OAuth token cache for the Firestore REST API.
//!
//! Tokens are refreshed a minute before they expire. Refresh is
//! single-flight behind the write lock, and a refresh failure falls back to
//! the cached token while it is still technically valid.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gcp_auth::TokenProvider;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{FirestoreError, FirestoreResult};

const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// OAuth scope for Firestore REST access.
pub const FIRESTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }

    fn alive(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Thread-safe token cache with single-flight refresh.
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    slot: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            slot: RwLock::new(None),
        }
    }

    /// Drop the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }

    /// Current access token, refreshing when close to expiry.
    pub async fn get_token(&self) -> FirestoreResult<String> {
        if let Some(token) = self.slot.read().await.as_ref().filter(|t| t.fresh()) {
            return Ok(token.value.clone());
        }

        let mut slot = self.slot.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = slot.as_ref().filter(|t| t.fresh()) {
            return Ok(token.value.clone());
        }

        match self.provider.token(&[FIRESTORE_SCOPE]).await {
            Ok(token) => {
                // An already-expired token is cached as expired so the next call refreshes
                let ttl = (token.expires_at() - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                let value = token.as_str().to_string();
                *slot = Some(CachedToken {
                    value: value.clone(),
                    expires_at: Instant::now() + ttl,
                });
                debug!(ttl_secs = ttl.as_secs(), "Refreshed Firestore auth token");
                Ok(value)
            }
            Err(e) => match slot.as_ref().filter(|t| t.alive()) {
                Some(token) => {
                    warn!("Token refresh failed, using cached token: {}", e);
                    Ok(token.value.clone())
                }
                None => Err(FirestoreError::auth_error(format!(
                    "Failed to obtain auth token: {}",
                    e
                ))),
            },
        }
    }
}
