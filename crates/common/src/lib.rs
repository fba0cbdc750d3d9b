//! FrameForge Common Utilities
//!
//! Shared infrastructure for all FrameForge crates:
//! - Error taxonomy, structured error payloads, and result aliases
//! - Run clock and progress throttling
//! - Cooperative cancellation tokens
//! - Tracing/logging initialization
//! - Configuration loading (analysis thresholds, pipeline, annotation)

pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use cancel::CancelToken;
pub use clock::*;
pub use config::*;
pub use error::*;
