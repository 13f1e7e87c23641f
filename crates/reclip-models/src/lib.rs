//! Shared data models for the Reclip clip pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Clip-generation jobs and their lifecycle
//! - Clip records and vendor clip references
//! - The project view the worker reads and writes

pub mod clip;
pub mod job;
pub mod project;

// Re-export common types
pub use clip::{clip_storage_key, Clip, ClipRef};
pub use job::{Job, JobId, JobPatch, JobStatus, ParseJobStatusError};
pub use project::{Project, ProjectId, ProjectUpdate};
