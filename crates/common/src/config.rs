//! Application configuration.
//!
//! Every threshold the analysis uses is configuration. The defaults are
//! tuned for 24–60 fps footage; they are starting points, not ground truth.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FrameforgeError, FrameforgeResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory annotated videos are written to. `None` = next to the input.
    pub output_dir: Option<PathBuf>,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Pipeline, concurrency and cancellation settings.
    pub pipeline: PipelineConfig,

    /// Metric extraction, baseline and detector settings.
    pub analysis: AnalysisConfig,

    /// Annotated-video export settings.
    pub annotate: AnnotateConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "frameforge_engine=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path. Logs go to stderr otherwise.
    pub file: Option<PathBuf>,
}

/// Pipeline execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each bounded queue between pipeline stages.
    pub queue_depth: usize,

    /// Maximum analysis runs executing at once. `None` = available cores.
    pub max_concurrent_runs: Option<usize>,

    /// Abort a run after this many seconds.
    pub timeout_secs: Option<f64>,

    /// Per-frame extraction failures tolerated before the run is aborted.
    pub max_skipped_frames: u32,
}

/// Everything that shapes the analysis result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sampling: SamplingConfig,
    pub metrics: MetricsConfig,
    pub baseline: BaselineConfig,
    pub detector: DetectorConfig,
    pub health: HealthPolicy,
}

/// Frame sub-selection for long videos.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Fixed stride (analyze every Nth frame). Overrides `adaptive_steps`.
    pub stride: Option<u32>,

    /// Stride picked from the source's frame-count estimate when no fixed
    /// stride is set. The last step whose `min_frames` is exceeded wins.
    pub adaptive_steps: Vec<StrideStep>,
}

/// One adaptive sampling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrideStep {
    pub min_frames: u64,
    pub stride: u32,
}

/// Metric extractor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Luma width (px) frames are resized to before optical flow.
    pub motion_width: u32,

    /// Luma width (px) frames are resized to before the sharpness estimate.
    pub blur_width: u32,

    /// Pyramid levels used by the flow solver.
    pub pyramid_levels: usize,

    /// Spacing (px, at analysis width) of the flow grid.
    pub grid_step: u32,

    /// Half-size of the Lucas-Kanade integration window.
    pub window_radius: u32,

    /// Gauss-Newton iterations per pyramid level.
    pub max_iterations: u32,

    /// Minimum structure-tensor eigenvalue (per window pixel, intensities in
    /// [0, 1]) for a grid point to be used.
    pub min_eigenvalue: f64,

    /// Frame rate motion scores are normalized to.
    pub reference_fps: f64,
}

/// Rolling baseline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Samples in the rolling window. Longer windows resist noise but adapt
    /// more slowly to genuine scene changes.
    pub window_length: usize,

    /// Samples needed before a baseline is consulted.
    pub min_samples: usize,
}

/// Anomaly detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Gap (in expected intervals) above which a frame drop is reported.
    pub frame_drop_multiple: f64,
    /// Gap above which a frame drop is `High`.
    pub frame_drop_high_multiple: f64,

    /// Motion below this fraction of the baseline mean is a stutter candidate.
    pub stutter_ratio: f64,
    /// Span mean motion below this fraction of the baseline is `High`.
    pub stutter_high_ratio: f64,
    /// Baseline mean motion required to consider the video "active".
    pub active_motion_floor: f64,
    /// Shortest low-motion span reported.
    pub stutter_min_span_secs: f64,
    /// Longer low-motion spans are treated as a static scene.
    pub stutter_max_span_secs: f64,

    /// Standard deviations below the mean for a blur spike.
    pub blur_sigma: f64,
    /// Standard deviations below the mean for a `High` blur spike.
    pub blur_high_sigma: f64,
    /// Blur must also fall below this fraction of the mean.
    pub blur_floor_ratio: f64,
    /// Standard deviation floor, as a fraction of the mean.
    pub min_relative_deviation: f64,

    /// Minimum time between two events of the same kind.
    pub min_quiet_secs: f64,
}

/// Health score penalties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    pub medium_penalty: f64,
    pub high_penalty: f64,
}

/// Annotated-video export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    /// Produce `<stem>_annotated.mp4` alongside the report.
    pub enabled: bool,

    /// Seconds an overlay stays on screen after an event.
    pub overlay_hold_secs: f64,

    /// ffmpeg video encoder.
    pub codec: String,

    /// Constant rate factor passed to the encoder.
    pub crf: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 8,
            max_concurrent_runs: None,
            timeout_secs: None,
            max_skipped_frames: 30,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            stride: None,
            adaptive_steps: vec![
                StrideStep {
                    min_frames: 2000,
                    stride: 2,
                },
                StrideStep {
                    min_frames: 5000,
                    stride: 5,
                },
            ],
        }
    }
}

impl SamplingConfig {
    /// Stride to use for a source with the given frame-count estimate.
    pub fn stride_for(&self, total_frames: Option<u64>) -> u32 {
        if let Some(stride) = self.stride {
            return stride.max(1);
        }

        let Some(total) = total_frames else {
            return 1;
        };

        self.adaptive_steps
            .iter()
            .filter(|step| total > step.min_frames)
            .max_by_key(|step| step.min_frames)
            .map(|step| step.stride.max(1))
            .unwrap_or(1)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            motion_width: 160,
            blur_width: 320,
            pyramid_levels: 3,
            grid_step: 8,
            window_radius: 4,
            max_iterations: 5,
            min_eigenvalue: 1e-4,
            reference_fps: 30.0,
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            window_length: 30,
            min_samples: 10,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            frame_drop_multiple: 1.5,
            frame_drop_high_multiple: 3.0,
            stutter_ratio: 0.15,
            stutter_high_ratio: 0.02,
            active_motion_floor: 0.05,
            stutter_min_span_secs: 0.15,
            stutter_max_span_secs: 5.0,
            blur_sigma: 3.0,
            blur_high_sigma: 5.0,
            blur_floor_ratio: 0.6,
            min_relative_deviation: 0.05,
            min_quiet_secs: 1.0,
        }
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            medium_penalty: 5.0,
            high_penalty: 10.0,
        }
    }
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            overlay_hold_secs: 0.5,
            codec: "libx264".to_string(),
            crf: 23,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path. Unlike [`AppConfig::load`], a
    /// missing or malformed file is an error.
    pub fn load_from(path: &Path) -> FrameforgeResult<Self> {
        if !path.exists() {
            return Err(FrameforgeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| FrameforgeError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> FrameforgeResult<()> {
        if self.pipeline.queue_depth == 0 {
            return Err(FrameforgeError::config("pipeline.queue_depth must be > 0"));
        }
        if self.pipeline.max_concurrent_runs == Some(0) {
            return Err(FrameforgeError::config(
                "pipeline.max_concurrent_runs must be > 0",
            ));
        }
        if let Some(secs) = self.pipeline.timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(FrameforgeError::config(
                    "pipeline.timeout_secs must be a positive number of seconds",
                ));
            }
        }
        if self.analysis.baseline.window_length < 2 {
            return Err(FrameforgeError::config(
                "analysis.baseline.window_length must be >= 2",
            ));
        }
        if self.analysis.baseline.min_samples > self.analysis.baseline.window_length {
            return Err(FrameforgeError::config(
                "analysis.baseline.min_samples cannot exceed window_length",
            ));
        }
        let metrics = &self.analysis.metrics;
        if metrics.motion_width < 16 || metrics.blur_width < 16 {
            return Err(FrameforgeError::config(
                "analysis.metrics widths must be at least 16 px",
            ));
        }
        if metrics.grid_step == 0 || metrics.pyramid_levels == 0 {
            return Err(FrameforgeError::config(
                "analysis.metrics.grid_step and pyramid_levels must be > 0",
            ));
        }
        for (name, value) in self.thresholds() {
            if !value.is_finite() || value < 0.0 {
                return Err(FrameforgeError::config(format!(
                    "{name} must be a finite, non-negative number (got {value})"
                )));
            }
        }
        let detector = &self.analysis.detector;
        if detector.frame_drop_multiple <= 1.0
            || detector.frame_drop_high_multiple < detector.frame_drop_multiple
        {
            return Err(FrameforgeError::config(
                "frame drop multiples must satisfy 1 < frame_drop_multiple <= frame_drop_high_multiple",
            ));
        }
        if detector.blur_high_sigma < detector.blur_sigma {
            return Err(FrameforgeError::config(
                "analysis.detector.blur_high_sigma must be >= blur_sigma",
            ));
        }
        if self.analysis.health.medium_penalty < 0.0
            || self.analysis.health.high_penalty < self.analysis.health.medium_penalty
        {
            return Err(FrameforgeError::config(
                "health penalties must satisfy 0 <= medium_penalty <= high_penalty",
            ));
        }
        Ok(())
    }

    /// Every floating-point threshold, by config path.
    fn thresholds(&self) -> [(&'static str, f64); 17] {
        let metrics = &self.analysis.metrics;
        let detector = &self.analysis.detector;
        let health = &self.analysis.health;
        [
            ("analysis.metrics.min_eigenvalue", metrics.min_eigenvalue),
            ("analysis.metrics.reference_fps", metrics.reference_fps),
            ("analysis.detector.frame_drop_multiple", detector.frame_drop_multiple),
            ("analysis.detector.frame_drop_high_multiple", detector.frame_drop_high_multiple),
            ("analysis.detector.stutter_ratio", detector.stutter_ratio),
            ("analysis.detector.stutter_high_ratio", detector.stutter_high_ratio),
            ("analysis.detector.active_motion_floor", detector.active_motion_floor),
            ("analysis.detector.stutter_min_span_secs", detector.stutter_min_span_secs),
            ("analysis.detector.stutter_max_span_secs", detector.stutter_max_span_secs),
            ("analysis.detector.blur_sigma", detector.blur_sigma),
            ("analysis.detector.blur_high_sigma", detector.blur_high_sigma),
            ("analysis.detector.blur_floor_ratio", detector.blur_floor_ratio),
            ("analysis.detector.min_relative_deviation", detector.min_relative_deviation),
            ("analysis.detector.min_quiet_secs", detector.min_quiet_secs),
            ("analysis.health.medium_penalty", health.medium_penalty),
            ("analysis.health.high_penalty", health.high_penalty),
            ("annotate.overlay_hold_secs", self.annotate.overlay_hold_secs),
        ]
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("frameforge").join("config.json")
}
