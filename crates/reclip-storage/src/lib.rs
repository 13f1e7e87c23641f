//! Cloudflare R2 storage client.
//!
//! Durable home for exported clip bytes. Objects are written once under a
//! project-scoped key and served from the bucket's public domain.

pub mod client;
pub mod error;

pub use client::{public_object_url, R2Client, R2Config};
pub use error::{StorageError, StorageResult};
