//! Per-frame metric extraction.

use image::imageops::{self, FilterType};
use image::GrayImage;

use frameforge_common::config::MetricsConfig;
use frameforge_frame_source::Frame;

use crate::blur::{laplacian_variance, mean_brightness};
use crate::motion::{mean_flow_magnitude, FlowParams, Pyramid};

/// Measurements for one sampled frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetrics {
    pub frame_index: u64,
    pub timestamp: f64,

    /// Normalized motion relative to the previous sampled frame. `None` for
    /// the first frame (and the first after a reference reset).
    pub motion: Option<f64>,

    pub blur_score: f64,

    /// Mean luma, 0–255.
    pub brightness: f64,
}

impl FrameMetrics {
    /// Motion as recorded in the analytics series.
    pub fn motion_score(&self) -> f64 {
        self.motion.unwrap_or(0.0)
    }
}

/// A frame that could not be measured. The run skips it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("frame {frame} has an empty pixel buffer")]
    EmptyBuffer { frame: u64 },

    #[error("frame {frame} buffer is {actual} bytes, expected {expected}")]
    LengthMismatch {
        frame: u64,
        expected: usize,
        actual: usize,
    },

    #[error("frame {frame} changed dimensions from {from:?} to {to:?}")]
    DimensionChange {
        frame: u64,
        from: (u32, u32),
        to: (u32, u32),
    },

    #[error("frame {frame} timestamp {timestamp} does not follow {previous}")]
    NonMonotonicTimestamp {
        frame: u64,
        timestamp: f64,
        previous: f64,
    },
}

impl ExtractionError {
    pub fn frame(&self) -> u64 {
        match self {
            Self::EmptyBuffer { frame }
            | Self::LengthMismatch { frame, .. }
            | Self::DimensionChange { frame, .. }
            | Self::NonMonotonicTimestamp { frame, .. } => *frame,
        }
    }
}

struct Reference {
    pyramid: Pyramid,
    timestamp: f64,
    dimensions: (u32, u32),
}

/// Computes motion, blur and brightness for a stream of frames.
///
/// Holds only the previous frame's luma pyramid.
pub struct MetricExtractor {
    config: MetricsConfig,
    flow: FlowParams,
    reference: Option<Reference>,
}

impl MetricExtractor {
    pub fn new(config: MetricsConfig) -> Self {
        let flow = FlowParams {
            pyramid_levels: config.pyramid_levels,
            grid_step: config.grid_step,
            window_radius: config.window_radius,
            max_iterations: config.max_iterations,
            min_eigenvalue: config.min_eigenvalue,
        };
        Self {
            config,
            flow,
            reference: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MetricsConfig::default())
    }

    pub fn extract(&mut self, frame: &Frame) -> Result<FrameMetrics, ExtractionError> {
        if frame.pixels.is_empty() {
            return Err(ExtractionError::EmptyBuffer { frame: frame.index });
        }
        if !frame.is_consistent() {
            return Err(ExtractionError::LengthMismatch {
                frame: frame.index,
                expected: frame.expected_len(),
                actual: frame.pixels.len(),
            });
        }
        if let Some(reference) = &self.reference {
            if frame.timestamp <= reference.timestamp {
                return Err(ExtractionError::NonMonotonicTimestamp {
                    frame: frame.index,
                    timestamp: frame.timestamp,
                    previous: reference.timestamp,
                });
            }
        }

        let luma = GrayImage::from_raw(frame.width, frame.height, frame.luma()).ok_or(
            ExtractionError::LengthMismatch {
                frame: frame.index,
                expected: frame.width as usize * frame.height as usize,
                actual: frame.pixels.len(),
            },
        )?;

        let motion_image = resize_to_width(&luma, self.config.motion_width);
        let pyramid = Pyramid::build(&motion_image, self.config.pyramid_levels);
        let dimensions = (frame.width, frame.height);

        let previous = self.reference.replace(Reference {
            pyramid,
            timestamp: frame.timestamp,
            dimensions,
        });

        let motion = match &previous {
            Some(prev) if prev.dimensions != dimensions => {
                return Err(ExtractionError::DimensionChange {
                    frame: frame.index,
                    from: prev.dimensions,
                    to: dimensions,
                });
            }
            Some(prev) => {
                let current = self.reference.as_ref().map(|r| &r.pyramid);
                let magnitude = current
                    .and_then(|current| mean_flow_magnitude(&prev.pyramid, current, &self.flow))
                    .unwrap_or(0.0);
                let dt = frame.timestamp - prev.timestamp;
                Some(magnitude / (dt * self.config.reference_fps))
            }
            None => None,
        };

        let blur_image = resize_to_width(&luma, self.config.blur_width);

        Ok(FrameMetrics {
            frame_index: frame.index,
            timestamp: frame.timestamp,
            motion,
            blur_score: laplacian_variance(&blur_image),
            brightness: mean_brightness(&blur_image),
        })
    }
}

/// Resize keeping the aspect ratio so the result is `target_width` wide.
fn resize_to_width(image: &GrayImage, target_width: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == target_width {
        return image.clone();
    }
    let target_height =
        ((height as f64 * target_width as f64 / width as f64).round() as u32).max(1);
    imageops::resize(image, target_width, target_height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameforge_frame_source::{PixelFormat, SyntheticClip};

    fn clip_frames(clip: SyntheticClip) -> Vec<Frame> {
        clip.into_source().map(|f| f.unwrap()).collect()
    }

    #[test]
    fn test_first_frame_has_no_motion() {
        let frames = clip_frames(SyntheticClip::new(320, 180, 30.0, 3));
        let mut extractor = MetricExtractor::with_defaults();
        let first = extractor.extract(&frames[0]).unwrap();
        assert_eq!(first.motion, None);
        assert_eq!(first.motion_score(), 0.0);
        assert!(first.blur_score > 0.0);

        let second = extractor.extract(&frames[1]).unwrap();
        assert!(second.motion.unwrap() > 0.5, "{second:?}");
    }

    #[test]
    fn test_motion_is_normalized_by_frame_interval() {
        // Same per-frame displacement, half the frame rate: half the score.
        let fast = clip_frames(SyntheticClip::new(320, 180, 30.0, 2));
        let slow = clip_frames(SyntheticClip::new(320, 180, 15.0, 2));

        let mut a = MetricExtractor::with_defaults();
        a.extract(&fast[0]).unwrap();
        let fast_motion = a.extract(&fast[1]).unwrap().motion.unwrap();

        let mut b = MetricExtractor::with_defaults();
        b.extract(&slow[0]).unwrap();
        let slow_motion = b.extract(&slow[1]).unwrap().motion.unwrap();

        assert!((fast_motion / slow_motion - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_buffers_are_rejected() {
        let mut extractor = MetricExtractor::with_defaults();
        let empty = Frame::new(0, 0.0, 4, 4, PixelFormat::Gray8, vec![]);
        assert_eq!(
            extractor.extract(&empty),
            Err(ExtractionError::EmptyBuffer { frame: 0 })
        );

        let short = Frame::new(1, 0.1, 4, 4, PixelFormat::Rgb8, vec![0; 16]);
        assert!(matches!(
            extractor.extract(&short),
            Err(ExtractionError::LengthMismatch {
                expected: 48,
                actual: 16,
                ..
            })
        ));
    }

    #[test]
    fn test_dimension_change_becomes_new_reference() {
        let big = clip_frames(SyntheticClip::new(320, 180, 30.0, 1));
        let small = clip_frames(SyntheticClip::new(160, 90, 30.0, 3));

        let mut extractor = MetricExtractor::with_defaults();
        extractor.extract(&big[0]).unwrap();

        let mut switched = small[1].clone();
        switched.index = 1;
        assert!(matches!(
            extractor.extract(&switched),
            Err(ExtractionError::DimensionChange { frame: 1, .. })
        ));

        let mut next = small[2].clone();
        next.index = 2;
        let metrics = extractor.extract(&next).unwrap();
        assert!(metrics.motion.is_some());
    }
}
