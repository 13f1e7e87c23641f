//! Client for the Klap video-to-shorts API.
//!
//! This crate provides:
//! - The `TaskVendor` contract the worker drives
//! - `KlapClient`, its REST implementation

pub mod client;
pub mod error;
pub mod metrics;
pub mod types;
pub mod vendor;

pub use client::{KlapClient, KlapConfig};
pub use error::{KlapError, KlapResult};
pub use types::{normalize_score, ClipDetails, TaskStatus};
pub use vendor::TaskVendor;
