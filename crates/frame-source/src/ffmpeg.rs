//! Decoding through ffmpeg/ffprobe child processes.
//!
//! Metadata and packet timestamps come from `ffprobe`; pixels come from an
//! `ffmpeg` process writing raw frames to a pipe. The child is killed when the
//! source is dropped, so abandoning a run never leaves a decoder behind.

use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use serde::Deserialize;

use frameforge_common::error::{FrameforgeError, FrameforgeResult};

use crate::frame::{Frame, PixelFormat, SourceMetadata};
use crate::source::FrameSource;

/// Check whether `binary` is on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Read stream metadata with ffprobe.
pub fn probe(path: &Path) -> FrameforgeResult<SourceMetadata> {
    require_binary("ffprobe")?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,duration:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| FrameforgeError::decode(format!("Failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(FrameforgeError::decode(format!(
            "ffprobe could not read {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| FrameforgeError::decode(format!("Unexpected ffprobe output: {e}")))?;
    metadata_from_probe(parsed, path)
}

fn metadata_from_probe(parsed: ProbeOutput, path: &Path) -> FrameforgeResult<SourceMetadata> {
    let stream = parsed.streams.into_iter().next().ok_or_else(|| {
        FrameforgeError::decode(format!("{} has no video stream", path.display()))
    })?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(FrameforgeError::decode(format!(
            "{} has a video stream without dimensions",
            path.display()
        )));
    };
    if width == 0 || height == 0 {
        return Err(FrameforgeError::decode(format!(
            "{} has invalid dimensions {width}x{height}",
            path.display()
        )));
    }

    let nominal_fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rational)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational));
    let duration_secs = stream
        .duration
        .as_deref()
        .and_then(parse_positive)
        .or_else(|| {
            parsed
                .format
                .and_then(|f| f.duration)
                .as_deref()
                .and_then(parse_positive)
        });
    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| match (duration_secs, nominal_fps) {
            (Some(d), Some(fps)) => Some((d * fps).round() as u64),
            _ => None,
        });

    Ok(SourceMetadata {
        width,
        height,
        nominal_fps,
        duration_secs,
        total_frames,
        decoder: "ffmpeg".to_string(),
    })
}

/// Parse an ffprobe rational such as `30000/1001`. `0/0` yields `None`.
fn parse_rational(value: &str) -> Option<f64> {
    let (num, den) = value.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    let rate = num / den;
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_positive(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Presentation timestamps of every video packet, sorted.
fn probe_packet_times(path: &Path) -> FrameforgeResult<Vec<f64>> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "packet=pts_time",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output()
        .map_err(|e| FrameforgeError::decode(format!("Failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(FrameforgeError::decode(format!(
            "ffprobe could not list packets of {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let mut times: Vec<f64> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().trim_end_matches(',').parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .collect();
    times.sort_by(f64::total_cmp);
    Ok(times)
}

/// Assigns strictly increasing timestamps to decoded frames.
///
/// Probed packet times are rebased so the first frame is at zero. Missing
/// or non-increasing entries are extrapolated from the previous timestamp
/// with the nominal interval.
#[derive(Debug, Clone)]
pub struct TimestampTrack {
    times: Vec<f64>,
    origin: f64,
    interval: f64,
    last: Option<f64>,
}

impl TimestampTrack {
    pub fn new(times: Vec<f64>, interval: f64) -> Self {
        let origin = times
            .first()
            .copied()
            .filter(|t| t.is_finite())
            .unwrap_or(0.0);
        let interval = if interval.is_finite() && interval > 0.0 {
            interval
        } else {
            1.0 / 30.0
        };
        Self {
            times,
            origin,
            interval,
            last: None,
        }
    }

    /// Timestamp for the frame at `index`. Must be called in index order.
    pub fn next(&mut self, index: u64) -> f64 {
        let probed = self
            .times
            .get(index as usize)
            .map(|t| t - self.origin)
            .filter(|t| t.is_finite() && *t >= 0.0);

        let timestamp = match (probed, self.last) {
            (Some(t), Some(last)) if t > last => t,
            (Some(t), None) => t,
            (_, Some(last)) => last + self.interval,
            (None, None) => 0.0,
        };
        self.last = Some(timestamp);
        timestamp
    }
}

/// Frames decoded by an `ffmpeg` child process.
pub struct FfmpegSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<String>>,
    metadata: SourceMetadata,
    format: PixelFormat,
    timestamps: TimestampTrack,
    frame_len: usize,
    bytes_read: u64,
    next_index: u64,
    done: bool,
}

impl FfmpegSource {
    pub fn open(path: &Path, format: PixelFormat) -> FrameforgeResult<Self> {
        require_binary("ffmpeg")?;
        let metadata = probe(path)?;
        let frame_len = raw_frame_len(metadata.width, metadata.height, format)?;
        let packet_times = probe_packet_times(path)?;
        let interval = metadata.nominal_interval().unwrap_or(1.0 / 30.0);

        let args = decode_args(path, format);
        tracing::debug!(?args, "Running ffmpeg decoder");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FrameforgeError::decode(format!("Failed to start ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FrameforgeError::decode("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FrameforgeError::decode("Failed to capture ffmpeg stderr"))?;

        // Drain stderr so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        tracing::info!(
            pid = child.id(),
            width = metadata.width,
            height = metadata.height,
            fps = ?metadata.nominal_fps,
            packets = packet_times.len(),
            "ffmpeg decoder started"
        );

        Ok(Self {
            frame_len,
            child,
            stdout: BufReader::new(stdout),
            stderr_task: Some(stderr_task),
            metadata,
            format,
            timestamps: TimestampTrack::new(packet_times, interval),
            bytes_read: 0,
            next_index: 0,
            done: false,
        })
    }

    fn read_frame(&mut self) -> FrameforgeResult<Option<Frame>> {
        let index = self.next_index;
        let mut pixels = vec![0u8; self.frame_len];
        let mut filled = 0;

        while filled < pixels.len() {
            match self.stdout.read(&mut pixels[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FrameforgeError::Io(e)),
            }
        }

        if filled == 0 {
            self.finish_process(index)?;
            return Ok(None);
        }
        if filled < pixels.len() {
            let stderr = self.finish_stderr();
            return Err(FrameforgeError::decode_at(
                format!(
                    "short read mid-frame ({filled} of {} bytes){}",
                    pixels.len(),
                    stderr_suffix(&stderr)
                ),
                Some(self.bytes_read + filled as u64),
                Some(index),
            ));
        }

        self.bytes_read += filled as u64;
        self.next_index += 1;

        Ok(Some(Frame::new(
            index,
            self.timestamps.next(index),
            self.metadata.width,
            self.metadata.height,
            self.format,
            pixels,
        )))
    }

    fn finish_process(&mut self, index: u64) -> FrameforgeResult<()> {
        let status = self
            .child
            .wait()
            .map_err(|e| FrameforgeError::decode(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr = self.finish_stderr();

        if !status.success() {
            return Err(FrameforgeError::decode_at(
                format!("ffmpeg decode failed (status {status}){}", stderr_suffix(&stderr)),
                Some(self.bytes_read),
                Some(index),
            ));
        }
        tracing::debug!(frames = index, "ffmpeg decoder finished");
        Ok(())
    }

    fn finish_stderr(&mut self) -> String {
        self.stderr_task
            .take()
            .map(|task| {
                task.join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default()
    }
}

impl Iterator for FfmpegSource {
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

impl FrameSource for FfmpegSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            tracing::debug!(pid = self.child.id(), "Killing ffmpeg decoder");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn decode_args(path: &Path, format: PixelFormat) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-nostdin".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        format.ffmpeg_name().to_string(),
        "-fps_mode".to_string(),
        "passthrough".to_string(),
        "pipe:1".to_string(),
    ]
}

fn require_binary(binary: &str) -> FrameforgeResult<()> {
    if command_exists(binary) {
        Ok(())
    } else {
        Err(FrameforgeError::decode(format!(
            "{binary} not found on PATH; only Y4M input can be decoded without it"
        )))
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

/// Bytes of one rawvideo frame at `width`x`height`.
fn raw_frame_len(width: u32, height: u32, format: PixelFormat) -> FrameforgeResult<usize> {
    usize::try_from(width)
        .ok()
        .zip(usize::try_from(height).ok())
        .and_then(|(w, h)| w.checked_mul(h)?.checked_mul(format.bytes_per_pixel()))
        .filter(|len| *len > 0)
        .ok_or_else(|| {
            FrameforgeError::decode_at(
                format!("unusable video dimensions {width}x{height}"),
                Some(0),
                None,
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_raw_frame_len_is_checked() {
        assert_eq!(raw_frame_len(4, 2, PixelFormat::Rgb8).unwrap(), 24);
        assert!(matches!(
            raw_frame_len(0, 720, PixelFormat::Gray8),
            Err(FrameforgeError::Decode { .. })
        ));
        if usize::BITS == 32 {
            assert!(raw_frame_len(u32::MAX, 2, PixelFormat::Gray8).is_err());
        } else {
            assert!(raw_frame_len(u32::MAX, u32::MAX, PixelFormat::Rgb8).is_err());
        }
    }

    #[test]
    fn test_parse_rational() {
        assert!((parse_rational("30000/1001").unwrap() - 29.97).abs() < 0.001);
        assert_eq!(parse_rational("25/1"), Some(25.0));
        assert_eq!(parse_rational("0/0"), None);
        assert_eq!(parse_rational("N/A"), None);
    }

    #[test]
    fn test_metadata_from_probe_json() {
        let json = r#"{
            "streams": [{"width": 1280, "height": 720, "avg_frame_rate": "30/1",
                         "r_frame_rate": "30/1", "nb_frames": "300", "duration": "10.000000"}],
            "format": {"duration": "10.020000"}
        }"#;
        let parsed: ProbeOutput = serde_json::from_str(json).unwrap();
        let meta = metadata_from_probe(parsed, Path::new("clip.mp4")).unwrap();
        assert_eq!((meta.width, meta.height), (1280, 720));
        assert_eq!(meta.nominal_fps, Some(30.0));
        assert_eq!(meta.duration_secs, Some(10.0));
        assert_eq!(meta.total_frames, Some(300));
    }

    #[test]
    fn test_metadata_estimates_frame_count() {
        let json = r#"{"streams": [{"width": 640, "height": 360, "avg_frame_rate": "0/0",
                        "r_frame_rate": "25/1"}], "format": {"duration": "4.0"}}"#;
        let parsed: ProbeOutput = serde_json::from_str(json).unwrap();
        let meta = metadata_from_probe(parsed, Path::new("clip.mkv")).unwrap();
        assert_eq!(meta.nominal_fps, Some(25.0));
        assert_eq!(meta.total_frames, Some(100));
    }

    #[test]
    fn test_probe_without_streams_is_decode_error() {
        let parsed: ProbeOutput = serde_json::from_str(r#"{"streams": []}"#).unwrap();
        assert!(matches!(
            metadata_from_probe(parsed, Path::new("notes.txt")),
            Err(FrameforgeError::Decode { .. })
        ));
    }

    #[test]
    fn test_timestamp_track_rebases_and_extrapolates() {
        let mut track = TimestampTrack::new(vec![1.0, 1.04, 1.04, 1.12], 0.04);
        let times: Vec<f64> = (0..6).map(|i| track.next(i)).collect();
        let expected = [0.0, 0.04, 0.08, 0.12, 0.16, 0.20];
        for (got, want) in times.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{times:?}");
        }
    }

    #[test]
    fn test_decode_args_request_passthrough_raw_frames() {
        let args = decode_args(Path::new("in.mp4"), PixelFormat::Rgb8);
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -fps_mode passthrough pipe:1"));
    }

    proptest! {
        #[test]
        fn timestamp_track_is_strictly_increasing(
            times in proptest::collection::vec(
                prop_oneof![
                    -1.0e5f64..1.0e5,
                    Just(f64::NAN),
                    Just(f64::INFINITY),
                ],
                0..64,
            ),
            interval in prop_oneof![1.0e-3f64..1.0, Just(0.0), Just(-1.0), Just(f64::NAN)],
            extra in 0usize..8,
        ) {
            let frames = times.len() + extra;
            let mut track = TimestampTrack::new(times, interval);
            let mut previous: Option<f64> = None;
            for index in 0..frames as u64 {
                let t = track.next(index);
                prop_assert!(t.is_finite() && t >= 0.0, "frame {index}: {t}");
                if let Some(prev) = previous {
                    prop_assert!(t > prev, "frame {index}: {t} after {prev}");
                }
                previous = Some(t);
            }
        }
    }
}
