//! Durable clip job queue on Redis.
//!
//! This crate provides:
//! - The `JobStore` contract and its Redis implementation (Lua-scripted,
//!   atomic claims and guarded transitions)
//! - An in-memory store with identical semantics
//! - Progress events via Redis Pub/Sub

pub mod config;
pub mod error;
pub mod memory;
pub mod progress;
pub mod queue;
mod record;
pub mod store;

pub use config::{QueueConfig, DEFAULT_STALE_THRESHOLD_SECS};
pub use error::{QueueError, QueueResult};
pub use memory::InMemoryJobQueue;
pub use progress::{ProgressChannel, ProgressEvent, ProgressMessage, ProgressPublisher};
pub use queue::JobQueue;
pub use store::{JobStore, STALE_JOB_REASON};
