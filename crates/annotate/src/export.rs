//! Annotated-video export.

use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use image::RgbImage;

use frameforge_common::config::AnnotateConfig;
use frameforge_common::error::{FrameforgeError, FrameforgeResult};
use frameforge_common::CancelToken;
use frameforge_frame_source::ffmpeg::command_exists;
use frameforge_frame_source::{open_source, PixelFormat};
use frameforge_report_model::AnomalyEvent;

use crate::overlay::{draw_overlay, OverlaySchedule};

/// An annotation job ready to be rendered.
#[derive(Debug, Clone)]
pub struct AnnotationJob {
    /// The analyzed video.
    pub input: PathBuf,

    /// Where the annotated copy goes.
    pub output_path: PathBuf,

    /// Final event list, in timestamp order.
    pub events: Vec<AnomalyEvent>,

    /// Output frame rate.
    pub fps: f64,

    pub config: AnnotateConfig,
}

/// Progress callback for annotation rendering.
pub type ProgressCallback = Box<dyn Fn(AnnotationProgress) + Send>;

/// Annotation progress report.
#[derive(Debug, Clone)]
pub struct AnnotationProgress {
    /// Current progress [0.0, 1.0], when the frame count is known.
    pub progress: Option<f64>,

    pub frames_written: u64,

    pub total_frames: Option<u64>,

    pub stage: AnnotationStage,
}

/// Stages of the annotation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
}

/// Trait for annotation encoders.
pub trait AnnotationBackend: Send {
    /// Render the annotated copy. On failure or cancellation no partial
    /// output is left behind.
    fn annotate(
        &mut self,
        job: &AnnotationJob,
        cancel: &CancelToken,
        progress: Option<ProgressCallback>,
    ) -> FrameforgeResult<()>;

    /// Check if this backend is available on the system.
    fn is_available(&self) -> bool;

    /// Backend name.
    fn name(&self) -> &str;
}

/// `<output_dir or input dir>/<stem>_annotated.mp4`
pub fn annotated_output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{stem}_annotated.mp4"))
}

/// Encodes annotated RGB frames with an `ffmpeg` child process.
#[derive(Debug, Default)]
pub struct FfmpegAnnotator;

impl FfmpegAnnotator {
    pub fn new() -> Self {
        Self
    }
}

struct Encoder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
}

impl Encoder {
    fn spawn(args: &[String]) -> FrameforgeResult<Self> {
        tracing::debug!(?args, "Running ffmpeg encoder");
        let mut child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FrameforgeError::writer(format!("Failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FrameforgeError::writer("Failed to capture ffmpeg stdin"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FrameforgeError::writer("Failed to capture ffmpeg stderr"))?;

        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        tracing::info!(pid = child.id(), "ffmpeg encoder started");
        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_task: Some(stderr_task),
        })
    }

    fn write(&mut self, rgb: &[u8]) -> FrameforgeResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(FrameforgeError::writer("ffmpeg stdin already closed"));
        };
        if let Err(e) = stdin.write_all(rgb) {
            let stderr = self.abort();
            return Err(FrameforgeError::writer(format!(
                "Failed writing to ffmpeg: {e}{}",
                stderr_suffix(&stderr)
            )));
        }
        Ok(())
    }

    fn finish(mut self) -> FrameforgeResult<()> {
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| FrameforgeError::writer(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr = self.join_stderr();
        if !status.success() {
            return Err(FrameforgeError::writer(format!(
                "ffmpeg encode failed (status {status}){}",
                stderr_suffix(&stderr)
            )));
        }
        Ok(())
    }

    /// Kill the encoder and return whatever it printed.
    fn abort(&mut self) -> String {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.join_stderr()
    }

    fn join_stderr(&mut self) -> String {
        self.stderr_task
            .take()
            .map(|task| {
                task.join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default()
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

impl FfmpegAnnotator {
    fn render(
        &self,
        job: &AnnotationJob,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> FrameforgeResult<u64> {
        let mut source = open_source(&job.input, PixelFormat::Rgb8).map_err(|e| {
            FrameforgeError::writer(format!("Failed to reopen {}: {e}", job.input.display()))
        })?;
        let metadata = source.metadata().clone();
        let total_frames = metadata.total_frames;
        let schedule = OverlaySchedule::new(job.events.clone(), job.config.overlay_hold_secs);

        if let Some(cb) = progress {
            cb(AnnotationProgress {
                progress: Some(0.0),
                frames_written: 0,
                total_frames,
                stage: AnnotationStage::Preparing,
            });
        }

        let args = encode_args(metadata.width, metadata.height, job);
        let mut encoder = Encoder::spawn(&args)?;
        let mut frames_written = 0u64;

        while let Some(item) = source.next() {
            if let Err(e) = cancel.check() {
                encoder.abort();
                return Err(e);
            }

            let frame = match item {
                Ok(frame) => frame,
                Err(e) => {
                    encoder.abort();
                    return Err(FrameforgeError::writer(format!(
                        "Decoding failed during annotation: {e}"
                    )));
                }
            };

            let Some(mut image) = RgbImage::from_raw(frame.width, frame.height, frame.pixels)
            else {
                encoder.abort();
                return Err(FrameforgeError::writer(format!(
                    "frame {} does not match {}x{}",
                    frame.index, frame.width, frame.height
                )));
            };
            draw_overlay(&mut image, schedule.active_at(frame.timestamp));
            encoder.write(image.as_raw())?;
            frames_written += 1;

            if let Some(cb) = progress {
                if frames_written % 30 == 0 {
                    cb(AnnotationProgress {
                        progress: total_frames
                            .filter(|t| *t > 0)
                            .map(|t| (frames_written as f64 / t as f64).min(1.0)),
                        frames_written,
                        total_frames,
                        stage: AnnotationStage::Rendering,
                    });
                }
            }
        }

        cancel.check()?;

        if let Some(cb) = progress {
            cb(AnnotationProgress {
                progress: Some(1.0),
                frames_written,
                total_frames,
                stage: AnnotationStage::Finalizing,
            });
        }
        encoder.finish()?;
        Ok(frames_written)
    }
}

impl AnnotationBackend for FfmpegAnnotator {
    fn annotate(
        &mut self,
        job: &AnnotationJob,
        cancel: &CancelToken,
        progress: Option<ProgressCallback>,
    ) -> FrameforgeResult<()> {
        if !self.is_available() {
            return Err(FrameforgeError::writer("ffmpeg not found on PATH"));
        }

        match self.render(job, cancel, progress.as_ref()) {
            Ok(frames) => {
                tracing::info!(
                    output = %job.output_path.display(),
                    frames,
                    "Annotated video written"
                );
                if let Some(cb) = &progress {
                    cb(AnnotationProgress {
                        progress: Some(1.0),
                        frames_written: frames,
                        total_frames: Some(frames),
                        stage: AnnotationStage::Complete,
                    });
                }
                Ok(())
            }
            Err(e) => {
                if job.output_path.exists() {
                    if let Err(remove_err) = std::fs::remove_file(&job.output_path) {
                        tracing::warn!(
                            output = %job.output_path.display(),
                            "Failed to remove partial annotated video: {remove_err}"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    fn is_available(&self) -> bool {
        command_exists("ffmpeg")
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

fn encode_args(width: u32, height: u32, job: &AnnotationJob) -> Vec<String> {
    let fps = if job.fps.is_finite() && job.fps > 0.0 {
        job.fps
    } else {
        30.0
    };
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{width}x{height}"),
        "-r".to_string(),
        format!("{fps}"),
        "-i".to_string(),
        "-".to_string(),
        "-an".to_string(),
        // yuv420p needs even dimensions
        "-vf".to_string(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        "-c:v".to_string(),
        job.config.codec.clone(),
        "-crf".to_string(),
        job.config.crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        job.output_path.to_string_lossy().into_owned(),
    ]
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_naming() {
        assert_eq!(
            annotated_output_path(Path::new("/uploads/clip.mov"), None),
            PathBuf::from("/uploads/clip_annotated.mp4")
        );
        assert_eq!(
            annotated_output_path(Path::new("/uploads/clip.mov"), Some(Path::new("/out"))),
            PathBuf::from("/out/clip_annotated.mp4")
        );
    }

    #[test]
    fn test_encode_args() {
        let job = AnnotationJob {
            input: PathBuf::from("in.y4m"),
            output_path: PathBuf::from("out_annotated.mp4"),
            events: vec![],
            fps: 29.97,
            config: AnnotateConfig::default(),
        };
        let args = encode_args(321, 180, &job).join(" ");
        assert!(args.contains("-f rawvideo -pix_fmt rgb24 -s 321x180 -r 29.97 -i -"));
        assert!(args.contains("-c:v libx264 -crf 23 -pix_fmt yuv420p"));
        assert!(args.ends_with("out_annotated.mp4"));
    }
}
