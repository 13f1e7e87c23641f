//! Clip generation worker.
//!
//! This crate provides:
//! - `ClipWorker`: one job per invocation, from vendor task to persisted clips
//! - The per-folder clip pipeline
//! - `ProgressSink`: job, project and channel progress writes
//! - Collaborator traits for the project store and object storage

pub mod clip_pipeline;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod stores;
pub mod worker;

pub use config::WorkerConfig;
pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use progress::ProgressSink;
pub use stores::{BlobStore, MemoryBlobStore, MemoryProjectStore, ProjectStore};
pub use worker::{ClipWorker, RunOutcome};
