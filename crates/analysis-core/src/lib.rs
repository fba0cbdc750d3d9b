//! FrameForge Analysis Core
//!
//! Turns decoded frames into a forensic report:
//! - **Metrics:** Optical-flow motion, Laplacian sharpness, mean brightness
//! - **Baselines:** Rolling per-metric mean and deviation
//! - **Detection:** Debounced state machines for drops, stutters and blur spikes
//! - **Aggregation:** Analytics series, ordered error list, health score
//!
//! This crate is pure computation. Frames come in as data and a
//! [`Report`](frameforge_report_model::Report) comes out; all run state lives in
//! explicit per-run objects.

pub mod aggregator;
pub mod analyzer;
pub mod baseline;
pub mod blur;
pub mod detector;
pub mod extract;
pub mod motion;

pub use aggregator::{health_score, Aggregator, RunContext};
pub use analyzer::{analyze_frames, expected_interval, FrameAnalyzer, RunAnalysis, SkipBudget};
pub use baseline::{BaselineStats, RollingBaseline};
pub use detector::AnomalyDetector;
pub use extract::{ExtractionError, FrameMetrics, MetricExtractor};
