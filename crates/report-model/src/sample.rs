//! Per-frame metric samples.

use serde::{Deserialize, Serialize};

/// Motion and sharpness measured on one sampled frame.
///
/// Serialized as one entry of the report's `analytics` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Presentation time of the frame (seconds).
    pub timestamp: f64,

    /// Mean optical-flow magnitude, normalized to analysis pixels per 1/30 s.
    pub motion_score: f64,

    /// Laplacian variance of the analysis-width luma frame. Higher = sharper.
    pub blur_score: f64,
}

impl MetricSample {
    pub fn new(timestamp: f64, motion_score: f64, blur_score: f64) -> Self {
        Self {
            timestamp,
            motion_score,
            blur_score,
        }
    }

    /// Whether both scores are finite and non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.timestamp.is_finite()
            && self.motion_score.is_finite()
            && self.motion_score >= 0.0
            && self.blur_score.is_finite()
            && self.blur_score >= 0.0
    }
}

/// Label attached to each sampled frame in the classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FrameLabel {
    Normal,
    FrameDrop,
    MotionStutter,
    BlurSpike,
}

impl FrameLabel {
    pub const ALL: [FrameLabel; 4] = [
        FrameLabel::Normal,
        FrameLabel::FrameDrop,
        FrameLabel::MotionStutter,
        FrameLabel::BlurSpike,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FrameLabel::Normal => "Normal",
            FrameLabel::FrameDrop => "FrameDrop",
            FrameLabel::MotionStutter => "MotionStutter",
            FrameLabel::BlurSpike => "BlurSpike",
        }
    }
}

/// One row of the per-frame classification table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameClassification {
    pub frame: u64,
    pub timestamp: f64,
    pub classification: FrameLabel,
    pub motion_score: f64,
    pub blur_score: f64,
    pub brightness: f64,
}
