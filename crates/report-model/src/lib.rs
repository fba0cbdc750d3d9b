//! FrameForge Report Model
//!
//! Defines the data contract between the analysis engine and its callers:
//! - **Samples:** Per-frame motion and sharpness measurements
//! - **Anomalies:** Classified, timestamped deviations (drops, stutters, blur)
//! - **Report:** Summary, analytics series, error list, and optional extras
//!
//! All timestamps are seconds from the start of the video.

pub mod anomaly;
pub mod report;
pub mod sample;

pub use anomaly::*;
pub use report::*;
pub use sample::*;
