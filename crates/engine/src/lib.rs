//! FrameForge Engine
//!
//! Runs analyses end to end: opens the source, drives the pipelined
//! measurement and detection stages, renders the optional annotated copy,
//! and validates the report before handing it back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      AnalysisPool                         │
//! │   Semaphore(cores) ─▶ spawn_blocking ─▶ analyze_video     │
//! │                                                           │
//! │  ┌────────────┐    ┌──────────────┐    ┌───────────────┐  │
//! │  │ Decode     │───▶│ Extraction   │───▶│ Detector +    │  │
//! │  │ thread     │    │ thread       │    │ Aggregator    │  │
//! │  └────────────┘    └──────────────┘    └───────┬───────┘  │
//! │        bounded queues, one CancelToken         │          │
//! │                                                ▼          │
//! │                          Annotation pass (optional)       │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod pipeline;
pub mod pool;
pub mod session;

pub use pipeline::{run_pipeline, PipelineOutput};
pub use pool::AnalysisPool;
pub use session::*;
