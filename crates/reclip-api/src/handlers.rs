//! Request handlers.

pub mod health;
pub mod jobs;
pub mod worker;

pub use health::*;
pub use jobs::*;
pub use worker::*;
