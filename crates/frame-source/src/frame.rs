//! Decoded frames and source metadata.

use serde::{Deserialize, Serialize};

/// Pixel layout of a decoded frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit luma, one byte per pixel.
    Gray8,
    /// Packed 8-bit RGB, three bytes per pixel.
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Name of the matching ffmpeg `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "gray",
            PixelFormat::Rgb8 => "rgb24",
        }
    }
}

/// One decoded frame. Owned by whichever pipeline stage currently holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position in the source stream (0-based, before any sampling).
    pub index: u64,

    /// Presentation time in seconds from the start of the video.
    pub timestamp: f64,

    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,

    /// Row-major pixel data, `width * height * bytes_per_pixel` bytes.
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(
        index: u64,
        timestamp: f64,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Vec<u8>,
    ) -> Self {
        Self {
            index,
            timestamp,
            width,
            height,
            format,
            pixels,
        }
    }

    /// Buffer length implied by the frame's dimensions and format.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Whether the buffer is non-empty and matches the dimensions.
    pub fn is_consistent(&self) -> bool {
        !self.pixels.is_empty() && self.pixels.len() == self.expected_len()
    }

    /// Luma plane (BT.601 weights for RGB input).
    ///
    /// Callers must check [`Frame::is_consistent`] first; a short buffer
    /// yields a short plane.
    pub fn luma(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Gray8 => self.pixels.clone(),
            PixelFormat::Rgb8 => self
                .pixels
                .chunks_exact(3)
                .map(|px| {
                    let y = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32;
                    ((y + 128) >> 8) as u8
                })
                .collect(),
        }
    }
}

/// What a source knows about its stream before decoding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub width: u32,
    pub height: u32,

    /// Nominal frame rate, when the container declares one.
    pub nominal_fps: Option<f64>,

    /// Stream duration in seconds.
    pub duration_secs: Option<f64>,

    /// Frame count estimate.
    pub total_frames: Option<u64>,

    /// Decoder that produced the frames (`y4m`, `ffmpeg`, `synthetic`).
    pub decoder: String,
}

impl SourceMetadata {
    /// Interval between frames at the nominal rate.
    pub fn nominal_interval(&self) -> Option<f64> {
        self.nominal_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| 1.0 / fps)
    }
}
