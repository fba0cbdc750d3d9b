//! Procedural clips with known defects.
//!
//! A [`SyntheticClip`] renders a smooth multi-frequency texture that pans at a
//! constant velocity. Freezes, timestamp gaps and blurred frames can be
//! injected at chosen frame indices, which gives every detector a clip with a
//! known answer.

use std::collections::VecDeque;
use std::ops::Range;

use image::{GrayImage, Luma};

use frameforge_common::error::FrameforgeResult;

use crate::frame::{Frame, PixelFormat, SourceMetadata};
use crate::source::FrameSource;

/// Description of a synthetic clip.
#[derive(Debug, Clone)]
pub struct SyntheticClip {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,

    /// Texture displacement per frame (px).
    pub velocity: (f64, f64),

    /// Frames that repeat the content of the frame before the range.
    pub freezes: Vec<Range<u64>>,

    /// `(frame, seconds)`: extra time inserted before `frame`.
    pub gaps: Vec<(u64, f64)>,

    /// Frames blurred with a Gaussian of the given sigma.
    pub blurs: Vec<(Range<u64>, f32)>,

    pub format: PixelFormat,
}

impl SyntheticClip {
    /// A panning clip with no defects.
    pub fn new(width: u32, height: u32, fps: f64, frame_count: u64) -> Self {
        Self {
            width,
            height,
            fps,
            frame_count,
            velocity: (2.0, 1.0),
            freezes: Vec::new(),
            gaps: Vec::new(),
            blurs: Vec::new(),
            format: PixelFormat::Gray8,
        }
    }

    pub fn velocity(mut self, dx: f64, dy: f64) -> Self {
        self.velocity = (dx, dy);
        self
    }

    /// A scene that never moves.
    pub fn static_scene(self) -> Self {
        self.velocity(0.0, 0.0)
    }

    pub fn freeze(mut self, frames: Range<u64>) -> Self {
        self.freezes.push(frames);
        self
    }

    pub fn gap_before(mut self, frame: u64, secs: f64) -> Self {
        self.gaps.push((frame, secs));
        self
    }

    pub fn blur(mut self, frames: Range<u64>, sigma: f32) -> Self {
        self.blurs.push((frames, sigma));
        self
    }

    pub fn format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Presentation time of `frame`.
    pub fn timestamp(&self, frame: u64) -> f64 {
        let extra: f64 = self
            .gaps
            .iter()
            .filter(|(at, _)| *at <= frame)
            .map(|(_, secs)| secs)
            .sum();
        frame as f64 / self.fps + extra
    }

    fn is_frozen(&self, frame: u64) -> bool {
        self.freezes.iter().any(|range| range.contains(&frame))
    }

    fn blur_sigma(&self, frame: u64) -> Option<f32> {
        self.blurs
            .iter()
            .find(|(range, _)| range.contains(&frame))
            .map(|(_, sigma)| *sigma)
    }

    /// Render every frame and wrap them in a source.
    pub fn into_source(self) -> SyntheticSource {
        let mut frames = VecDeque::with_capacity(self.frame_count as usize);
        let mut phase = 0.0f64;
        let mut held: Option<GrayImage> = None;
        let mut previous_time: Option<f64> = None;

        for index in 0..self.frame_count {
            let timestamp = self.timestamp(index);
            if let Some(prev) = previous_time {
                // Content keeps moving through gaps, as if frames were lost.
                phase += ((timestamp - prev) * self.fps).round().max(1.0);
            }
            previous_time = Some(timestamp);

            let frozen = self.is_frozen(index);
            let gray = match (&held, frozen) {
                (Some(image), true) => image.clone(),
                _ => {
                    let offset = (self.velocity.0 * phase, self.velocity.1 * phase);
                    let mut image = render_texture(self.width, self.height, offset);
                    if let Some(sigma) = self.blur_sigma(index) {
                        image = imageproc::filter::gaussian_blur_f32(&image, sigma);
                    }
                    image
                }
            };
            if !frozen || held.is_none() {
                held = Some(gray.clone());
            }

            let pixels = match self.format {
                PixelFormat::Gray8 => gray.into_raw(),
                PixelFormat::Rgb8 => gray
                    .into_raw()
                    .into_iter()
                    .flat_map(|v| [v, v, v])
                    .collect(),
            };
            frames.push_back(Frame::new(
                index,
                timestamp,
                self.width,
                self.height,
                self.format,
                pixels,
            ));
        }

        let duration = self.timestamp(self.frame_count.saturating_sub(1)) + 1.0 / self.fps;
        SyntheticSource {
            metadata: SourceMetadata {
                width: self.width,
                height: self.height,
                nominal_fps: Some(self.fps),
                duration_secs: Some(duration),
                total_frames: Some(self.frame_count),
                decoder: "synthetic".to_string(),
            },
            frames: frames.into_iter().map(Ok).collect(),
        }
    }
}

/// Multi-frequency texture with strong gradients in both axes, sampled at
/// `offset`. The fine component gives blur something to destroy.
fn render_texture(width: u32, height: u32, offset: (f64, f64)) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let fx = x as f64 + offset.0;
        let fy = y as f64 + offset.1;
        let v = 128.0
            + 40.0 * (fx * 0.19 + 0.8 * (fy * 0.043).sin()).sin()
            + 30.0 * (fy * 0.23 + fx * 0.031).sin()
            + 20.0 * ((fx + fy) * 0.097).sin() * (fx * 0.013 - fy * 0.017).cos()
            + 25.0 * (fx * 0.9).sin() * (fy * 0.8).sin();
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// In-memory source over pre-built frames (or decode failures).
pub struct SyntheticSource {
    metadata: SourceMetadata,
    frames: VecDeque<FrameforgeResult<Frame>>,
}

impl SyntheticSource {
    /// Wrap explicit items, e.g. to feed malformed frames to the pipeline.
    pub fn from_items(
        metadata: SourceMetadata,
        items: impl IntoIterator<Item = FrameforgeResult<Frame>>,
    ) -> Self {
        Self {
            metadata,
            frames: items.into_iter().collect(),
        }
    }
}

impl Iterator for SyntheticSource {
    type Item = FrameforgeResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.frames.pop_front()
    }
}

impl FrameSource for SyntheticSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(clip: SyntheticClip) -> Vec<Frame> {
        clip.into_source().map(|f| f.unwrap()).collect()
    }

    #[test]
    fn test_timestamps_include_gaps() {
        let clip = SyntheticClip::new(32, 24, 30.0, 40).gap_before(20, 0.5);
        assert!((clip.timestamp(19) - 19.0 / 30.0).abs() < 1e-12);
        assert!((clip.timestamp(20) - (20.0 / 30.0 + 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_frozen_frames_repeat_content() {
        let frames = frames(SyntheticClip::new(48, 32, 30.0, 10).freeze(4..7));
        assert_eq!(frames[3].pixels, frames[4].pixels);
        assert_eq!(frames[4].pixels, frames[6].pixels);
        assert_ne!(frames[6].pixels, frames[7].pixels);
        assert_ne!(frames[2].pixels, frames[3].pixels);
    }

    #[test]
    fn test_static_scene_is_constant() {
        let frames = frames(SyntheticClip::new(16, 16, 25.0, 3).static_scene());
        assert_eq!(frames[0].pixels, frames[2].pixels);
    }

    #[test]
    fn test_rgb_format_expands_channels() {
        let frames = frames(SyntheticClip::new(8, 4, 30.0, 1).format(PixelFormat::Rgb8));
        assert_eq!(frames[0].pixels.len(), 8 * 4 * 3);
        assert!(frames[0].is_consistent());
    }

    #[test]
    fn test_metadata_covers_last_frame() {
        let source = SyntheticClip::new(8, 8, 30.0, 30).into_source();
        let meta = source.metadata().clone();
        assert_eq!(meta.total_frames, Some(30));
        assert!((meta.duration_secs.unwrap() - 1.0).abs() < 1e-9);
    }
}
