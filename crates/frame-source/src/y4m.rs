//! YUV4MPEG2 decoding and encoding.
//!
//! Y4M is a plain header line followed by `FRAME` markers and raw planar
//! YUV payloads. It needs no codec, which makes it the interchange format for
//! generated clips and file-based tests.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use frameforge_common::error::{FrameforgeError, FrameforgeResult};

use crate::frame::{Frame, PixelFormat, SourceMetadata};
use crate::source::FrameSource;

pub const Y4M_MAGIC: &[u8; 10] = b"YUV4MPEG2 ";

/// Header lines longer than this are treated as corrupt.
const MAX_HEADER_LEN: usize = 4096;

/// Chroma layout declared by the `C` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chroma {
    C420,
    C422,
    C444,
    Mono,
}

impl Chroma {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "420" | "420jpeg" | "420paldv" | "420mpeg2" => Some(Chroma::C420),
            "422" => Some(Chroma::C422),
            "444" => Some(Chroma::C444),
            "mono" => Some(Chroma::Mono),
            _ => None,
        }
    }

    /// Dimensions of one chroma plane.
    fn plane_dims(self, width: usize, height: usize) -> (usize, usize) {
        match self {
            Chroma::C420 => (width.div_ceil(2), height.div_ceil(2)),
            Chroma::C422 => (width.div_ceil(2), height),
            Chroma::C444 => (width, height),
            Chroma::Mono => (0, 0),
        }
    }
}

#[derive(Debug, Clone)]
struct StreamHeader {
    width: u32,
    height: u32,
    fps: f64,
    chroma: Chroma,
    /// Bytes in one planar frame payload.
    payload_len: usize,
}

impl StreamHeader {
    fn parse(line: &str) -> FrameforgeResult<Self> {
        let mut width = None;
        let mut height = None;
        let mut fps = None;
        let mut chroma = Chroma::C420;

        for token in line.split_ascii_whitespace().skip(1) {
            let mut chars = token.chars();
            let tag = chars.next();
            let value = chars.as_str();
            match tag {
                Some('W') => width = value.parse::<u32>().ok(),
                Some('H') => height = value.parse::<u32>().ok(),
                Some('F') => fps = parse_ratio(value),
                Some('C') => {
                    chroma = Chroma::parse(value).ok_or_else(|| {
                        FrameforgeError::decode_at(
                            format!("unsupported Y4M colour space C{value}"),
                            Some(0),
                            None,
                        )
                    })?;
                }
                _ => {}
            }
        }

        let (Some(width), Some(height)) = (width, height) else {
            return Err(FrameforgeError::decode_at(
                "Y4M header is missing W/H",
                Some(0),
                None,
            ));
        };
        if width == 0 || height == 0 {
            return Err(FrameforgeError::decode_at(
                format!("invalid Y4M dimensions {width}x{height}"),
                Some(0),
                None,
            ));
        }
        let fps = fps.ok_or_else(|| {
            FrameforgeError::decode_at("Y4M header is missing a valid F tag", Some(0), None)
        })?;

        let payload_len = frame_payload_len(width, height, chroma).ok_or_else(|| {
            FrameforgeError::decode_at(
                format!("Y4M dimensions {width}x{height} are too large"),
                Some(0),
                None,
            )
        })?;

        Ok(Self {
            width,
            height,
            fps,
            chroma,
            payload_len,
        })
    }

    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn chroma_len(&self) -> usize {
        let (cw, ch) = self
            .chroma
            .plane_dims(self.width as usize, self.height as usize);
        cw * ch
    }

    fn payload_len(&self) -> usize {
        self.payload_len
    }
}

/// Luma plus both chroma planes, or `None` if the size does not fit `usize`.
fn frame_payload_len(width: u32, height: u32, chroma: Chroma) -> Option<usize> {
    let width = usize::try_from(width).ok()?;
    let height = usize::try_from(height).ok()?;
    let luma = width.checked_mul(height)?;
    let (cw, ch) = chroma.plane_dims(width, height);
    let chroma = cw.checked_mul(ch)?.checked_mul(2)?;
    luma.checked_add(chroma)
}

fn parse_ratio(value: &str) -> Option<f64> {
    let (num, den) = value.split_once(':')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    let fps = num / den;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Streaming Y4M decoder.
pub struct Y4mSource {
    reader: BufReader<File>,
    header: StreamHeader,
    metadata: SourceMetadata,
    format: PixelFormat,
    offset: u64,
    next_index: u64,
    payload: Vec<u8>,
    done: bool,
}

impl Y4mSource {
    pub fn open(path: &Path, format: PixelFormat) -> FrameforgeResult<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut line = Vec::new();
        let read = (&mut reader)
            .take(MAX_HEADER_LEN as u64)
            .read_until(b'\n', &mut line)?;
        if read == 0 || line.last() != Some(&b'\n') || !line.starts_with(Y4M_MAGIC) {
            return Err(FrameforgeError::decode_at(
                "malformed Y4M stream header",
                Some(0),
                None,
            ));
        }
        let header = StreamHeader::parse(String::from_utf8_lossy(&line).trim_end())?;

        // A stream with frames must hold at least one full payload.
        let body_len = file_len.saturating_sub(read as u64);
        let payload_len = header.payload_len() as u64;
        if body_len > 0 && payload_len > body_len {
            return Err(FrameforgeError::decode_at(
                format!(
                    "truncated Y4M stream: frame payload is {payload_len} bytes but only {body_len} follow the header"
                ),
                Some(read as u64),
                Some(0),
            ));
        }

        // Frame headers are usually a bare "FRAME\n".
        let total_frames = body_len / payload_len.saturating_add(6);

        let metadata = SourceMetadata {
            width: header.width,
            height: header.height,
            nominal_fps: Some(header.fps),
            duration_secs: Some(total_frames as f64 / header.fps),
            total_frames: Some(total_frames),
            decoder: "y4m".to_string(),
        };

        tracing::debug!(
            width = header.width,
            height = header.height,
            fps = header.fps,
            total_frames,
            "Parsed Y4M header"
        );

        Ok(Self {
            payload: Vec::new(),
            reader,
            header,
            metadata,
            format,
            offset: read as u64,
            next_index: 0,
            done: false,
        })
    }

    fn read_frame(&mut self) -> FrameforgeResult<Option<Frame>> {
        let index = self.next_index;
        let marker_offset = self.offset;

        let mut line = Vec::new();
        let read = (&mut self.reader)
            .take(MAX_HEADER_LEN as u64)
            .read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(None);
        }
        if !line.starts_with(b"FRAME") || line.last() != Some(&b'\n') {
            return Err(FrameforgeError::decode_at(
                "bad Y4M frame marker",
                Some(marker_offset),
                Some(index),
            ));
        }
        self.offset += read as u64;

        if self.payload.is_empty() {
            self.payload = vec![0; self.header.payload_len()];
        }
        let payload_offset = self.offset;
        if let Err(e) = self.reader.read_exact(&mut self.payload) {
            return Err(if e.kind() == ErrorKind::UnexpectedEof {
                FrameforgeError::decode_at(
                    "truncated Y4M frame payload",
                    Some(payload_offset),
                    Some(index),
                )
            } else {
                FrameforgeError::Io(e)
            });
        }
        self.offset += self.payload.len() as u64;
        self.next_index += 1;

        let pixels = match self.format {
            PixelFormat::Gray8 => self.payload[..self.header.luma_len()].to_vec(),
            PixelFormat::Rgb8 => self.payload_to_rgb(),
        };

        Ok(Some(Frame::new(
            index,
            index as f64 / self.header.fps,
            self.header.width,
            self.header.height,
            self.format,
            pixels,
        )))
    }

    fn payload_to_rgb(&self) -> Vec<u8> {
        let width = self.header.width as usize;
        let height = self.header.height as usize;
        let luma_len = self.header.luma_len();
        let chroma_len = self.header.chroma_len();
        let (cw, ch) = self.header.chroma.plane_dims(width, height);

        let y_plane = &self.payload[..luma_len];
        let u_plane = &self.payload[luma_len..luma_len + chroma_len];
        let v_plane = &self.payload[luma_len + chroma_len..];

        let mut rgb = Vec::with_capacity(luma_len * 3);
        for y in 0..height {
            for x in 0..width {
                let luma = y_plane[y * width + x];
                let (u, v) = if cw == 0 {
                    (128, 128)
                } else {
                    let cx = x * cw / width;
                    let cy = y * ch / height;
                    (u_plane[cy * cw + cx], v_plane[cy * cw + cx])
                };
                rgb.extend_from_slice(&yuv_to_rgb(luma, u, v));
            }
        }
        rgb
    }
}

impl Iterator for Y4mSource {
    type Item = FrameforgeResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl FrameSource for Y4mSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }
}

/// Writes frames as a `C420jpeg` Y4M stream.
pub struct Y4mWriter {
    writer: BufWriter<File>,
    width: u32,
    height: u32,
    frames_written: u64,
}

impl Y4mWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> FrameforgeResult<Self> {
        if width == 0 || height == 0 {
            return Err(FrameforgeError::config(format!(
                "cannot write a {width}x{height} Y4M stream"
            )));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(FrameforgeError::config(format!("invalid frame rate {fps}")));
        }

        let mut writer = BufWriter::new(File::create(path)?);
        let (num, den) = fps_ratio(fps);
        writeln!(
            writer,
            "YUV4MPEG2 W{width} H{height} F{num}:{den} Ip A1:1 C420jpeg"
        )?;

        Ok(Self {
            writer,
            width,
            height,
            frames_written: 0,
        })
    }

    /// Append one frame. Its dimensions must match the stream header.
    pub fn write_frame(&mut self, frame: &Frame) -> FrameforgeResult<()> {
        if frame.width != self.width || frame.height != self.height || !frame.is_consistent() {
            return Err(FrameforgeError::config(format!(
                "frame {} ({}x{}, {} bytes) does not fit a {}x{} stream",
                frame.index,
                frame.width,
                frame.height,
                frame.pixels.len(),
                self.width,
                self.height
            )));
        }

        let width = self.width as usize;
        let height = self.height as usize;
        let (cw, ch) = Chroma::C420.plane_dims(width, height);

        let (luma, u, v) = match frame.format {
            PixelFormat::Gray8 => (
                frame.pixels.clone(),
                vec![128u8; cw * ch],
                vec![128u8; cw * ch],
            ),
            PixelFormat::Rgb8 => rgb_to_yuv420(&frame.pixels, width, height),
        };

        self.writer.write_all(b"FRAME\n")?;
        self.writer.write_all(&luma)?;
        self.writer.write_all(&u)?;
        self.writer.write_all(&v)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and close the stream, returning the number of frames written.
    pub fn finish(mut self) -> FrameforgeResult<u64> {
        self.writer.flush()?;
        Ok(self.frames_written)
    }
}

fn fps_ratio(fps: f64) -> (u64, u64) {
    if (fps - fps.round()).abs() < 1e-9 {
        return (fps.round() as u64, 1);
    }
    let num = (fps * 1000.0).round() as u64;
    let den = 1000;
    let divisor = gcd(num, den);
    (num / divisor, den / divisor)
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a.max(1)
    } else {
        gcd(b, a % b)
    }
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// BT.601 limited-range YCbCr to RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 1.164 * (y as f32 - 16.0);
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    [
        clamp_u8(c + 1.596 * e),
        clamp_u8(c - 0.392 * d - 0.813 * e),
        clamp_u8(c + 2.017 * d),
    ]
}

fn rgb_to_yuv(px: &[u8]) -> (f32, f32, f32) {
    let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
    (
        16.0 + 0.257 * r + 0.504 * g + 0.098 * b,
        128.0 - 0.148 * r - 0.291 * g + 0.439 * b,
        128.0 + 0.439 * r - 0.368 * g - 0.071 * b,
    )
}

fn rgb_to_yuv420(rgb: &[u8], width: usize, height: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let (cw, ch) = Chroma::C420.plane_dims(width, height);
    let mut luma = Vec::with_capacity(width * height);
    let mut u_sum = vec![0.0f32; cw * ch];
    let mut v_sum = vec![0.0f32; cw * ch];
    let mut counts = vec![0u32; cw * ch];

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * 3;
            let (yy, u, v) = rgb_to_yuv(&rgb[idx..idx + 3]);
            luma.push(clamp_u8(yy));
            let c = (y / 2) * cw + x / 2;
            u_sum[c] += u;
            v_sum[c] += v;
            counts[c] += 1;
        }
    }

    let average = |sums: Vec<f32>| -> Vec<u8> {
        sums.into_iter()
            .zip(&counts)
            .map(|(sum, n)| clamp_u8(sum / (*n).max(1) as f32))
            .collect()
    };
    (luma, average(u_sum), average(v_sum))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("frameforge-y4m-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn gray_frame(index: u64, width: u32, height: u32, fill: u8) -> Frame {
        let pixels = (0..width * height)
            .map(|i| fill.wrapping_add(i as u8))
            .collect();
        Frame::new(index, 0.0, width, height, PixelFormat::Gray8, pixels)
    }

    #[test]
    fn test_header_parsing() {
        let header = StreamHeader::parse("YUV4MPEG2 W64 H48 F30000:1001 Ip A1:1 C420jpeg").unwrap();
        assert_eq!((header.width, header.height), (64, 48));
        assert!((header.fps - 29.97).abs() < 0.001);
        assert_eq!(header.payload_len(), 64 * 48 + 2 * 32 * 24);

        let mono = StreamHeader::parse("YUV4MPEG2 W5 H3 F25:1 Cmono").unwrap();
        assert_eq!(mono.payload_len(), 15);
    }

    #[test]
    fn test_header_rejects_high_bit_depth() {
        let err = StreamHeader::parse("YUV4MPEG2 W64 H48 F30:1 C420p10").unwrap_err();
        assert!(matches!(err, FrameforgeError::Decode { .. }));
    }

    #[test]
    fn test_header_rejects_malformed_dimensions() {
        for line in [
            "YUV4MPEG2 Wabc H48 F30:1",
            "YUV4MPEG2 W64 F30:1",
            "YUV4MPEG2 W0 H48 F30:1",
            "YUV4MPEG2 W64 H48 F30:0",
        ] {
            let err = StreamHeader::parse(line).unwrap_err();
            assert!(matches!(err, FrameforgeError::Decode { .. }), "{line}: {err:?}");
        }
    }

    #[test]
    fn test_payload_len_overflow_is_a_decode_error() {
        assert_eq!(frame_payload_len(6, 4, Chroma::C420), Some(24 + 2 * 6));
        assert_eq!(frame_payload_len(u32::MAX, u32::MAX, Chroma::C444), None);

        match StreamHeader::parse("YUV4MPEG2 W4000000000 H4000000000 F30:1") {
            Err(FrameforgeError::Decode { byte_offset, .. }) => assert_eq!(byte_offset, Some(0)),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_header_on_short_file_is_truncated() {
        let path = temp_path("oversized.y4m");
        let header = b"YUV4MPEG2 W200000 H200000 F30:1\n";
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(b"FRAME\nabc");
        std::fs::write(&path, &bytes).unwrap();

        match Y4mSource::open(&path, PixelFormat::Gray8) {
            Err(FrameforgeError::Decode {
                byte_offset,
                frame_index,
                ..
            }) => {
                assert_eq!(byte_offset, Some(header.len() as u64));
                assert_eq!(frame_index, Some(0));
            }
            Err(other) => panic!("expected decode error, got {other:?}"),
            Ok(_) => panic!("expected decode error, got a source"),
        }
    }

    #[test]
    fn test_header_without_newline_is_rejected() {
        let path = temp_path("no-newline.y4m");
        std::fs::write(&path, b"YUV4MPEG2 W64 H48 F30:1").unwrap();
        assert!(matches!(
            Y4mSource::open(&path, PixelFormat::Gray8),
            Err(FrameforgeError::Decode {
                byte_offset: Some(0),
                ..
            })
        ));
    }

    #[test]
    fn test_header_only_stream_has_no_frames() {
        let path = temp_path("empty-stream.y4m");
        Y4mWriter::create(&path, 8, 8, 30.0).unwrap().finish().unwrap();
        let mut source = Y4mSource::open(&path, PixelFormat::Gray8).unwrap();
        assert_eq!(source.metadata().total_frames, Some(0));
        assert!(source.next().is_none());

        // Declared size alone never allocates.
        let huge = temp_path("huge-header-only.y4m");
        std::fs::write(&huge, b"YUV4MPEG2 W200000 H200000 F30:1\n").unwrap();
        let mut source = Y4mSource::open(&huge, PixelFormat::Gray8).unwrap();
        assert!(source.next().is_none());
    }

    #[test]
    fn test_gray_roundtrip_through_file() {
        let path = temp_path("roundtrip.y4m");
        let mut writer = Y4mWriter::create(&path, 6, 4, 30.0).unwrap();
        for i in 0..3 {
            writer.write_frame(&gray_frame(i, 6, 4, i as u8 * 10)).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);

        let source = Y4mSource::open(&path, PixelFormat::Gray8).unwrap();
        assert_eq!(source.metadata().total_frames, Some(3));
        let frames: Vec<_> = source.map(|f| f.unwrap()).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].pixels, gray_frame(2, 6, 4, 20).pixels);
        assert!((frames[1].timestamp - 1.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_truncated_payload_reports_offset_and_frame() {
        let path = temp_path("truncated.y4m");
        let mut writer = Y4mWriter::create(&path, 4, 4, 25.0).unwrap();
        writer.write_frame(&gray_frame(0, 4, 4, 0)).unwrap();
        writer.write_frame(&gray_frame(1, 4, 4, 0)).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let mut source = Y4mSource::open(&path, PixelFormat::Gray8).unwrap();
        assert!(source.next().unwrap().is_ok());
        match source.next() {
            Some(Err(FrameforgeError::Decode {
                byte_offset,
                frame_index,
                ..
            })) => {
                assert_eq!(frame_index, Some(1));
                assert!(byte_offset.unwrap() > 0);
            }
            other => panic!("expected decode error, got {other:?}"),
        }
        assert!(source.next().is_none());
    }

    #[test]
    fn test_rgb_decode_of_neutral_gray() {
        let path = temp_path("neutral.y4m");
        let mut writer = Y4mWriter::create(&path, 2, 2, 30.0).unwrap();
        writer
            .write_frame(&Frame::new(0, 0.0, 2, 2, PixelFormat::Gray8, vec![126; 4]))
            .unwrap();
        writer.finish().unwrap();

        let frame = Y4mSource::open(&path, PixelFormat::Rgb8)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(frame.pixels.len(), 12);
        assert!(frame.pixels.iter().all(|&c| c == frame.pixels[0]));
    }

    #[test]
    fn test_fps_ratio() {
        assert_eq!(fps_ratio(30.0), (30, 1));
        assert_eq!(fps_ratio(29.97), (2997, 100));
        assert_eq!(fps_ratio(12.5), (25, 2));
    }
}
