//! Firestore REST API client.
//!
//! This crate provides:
//! - `FirestoreClient`: service account auth via gcp_auth, masked merge
//!   updates, bounded retry
//! - `ProjectRepository`: the clip pipeline's view of project documents

pub mod client;
pub mod error;
pub mod metrics;
pub mod project_repo;
pub mod retry;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use project_repo::{ProjectRepository, PROJECTS_COLLECTION};
pub use retry::RetryConfig;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
