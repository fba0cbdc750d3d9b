//! FrameForge Annotated-Video Writer
//!
//! Re-encodes a copy of the analyzed video with anomaly overlays. Runs as a
//! second pass once the event list is final, so frames are never buffered.

pub mod export;
pub mod overlay;

pub use export::{
    annotated_output_path, AnnotationBackend, AnnotationJob, AnnotationProgress, AnnotationStage,
    FfmpegAnnotator, ProgressCallback,
};
pub use overlay::{draw_overlay, OverlaySchedule};
