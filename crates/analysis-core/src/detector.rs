//! Anomaly detection state machines.
//!
//! One [`AnomalyDetector`] exists per run. It owns the rolling baselines and
//! an independent state machine per anomaly kind:
//!
//! - **FrameDrop** compares each timestamp delta with the expected interval.
//!   No baseline is needed when the source declares a frame rate.
//! - **MotionStutter** opens a span when motion collapses relative to an
//!   active baseline and reports it once motion resumes, provided the span
//!   was long enough to see and short enough not to be a static scene.
//! - **BlurSpike** flags sharpness far below the blur baseline.
//!
//! Every kind re-arms only after its condition clears and stays quiet for
//! `min_quiet_secs` after an event.

use frameforge_common::config::{BaselineConfig, DetectorConfig};
use frameforge_report_model::{AnomalyEvent, AnomalyKind, Severity};

use crate::baseline::RollingBaseline;
use crate::extract::FrameMetrics;

/// How the expected inter-sample interval is known.
#[derive(Debug, Clone)]
enum IntervalModel {
    /// From the nominal frame rate and sampling stride.
    Nominal(f64),
    /// Learned from normal deltas when the source has no frame rate.
    Observed(RollingBaseline),
}

impl IntervalModel {
    fn expected(&self) -> Option<f64> {
        match self {
            IntervalModel::Nominal(interval) => Some(*interval),
            IntervalModel::Observed(baseline) => baseline.stats().map(|s| s.mean),
        }
    }
}

/// Debounce bookkeeping shared by every kind.
#[derive(Debug, Clone, Copy)]
struct Debounce {
    armed: bool,
    last_event: Option<f64>,
}

impl Debounce {
    fn new() -> Self {
        Self {
            armed: true,
            last_event: None,
        }
    }

    fn quiet_at(&self, timestamp: f64, min_quiet: f64) -> bool {
        self.last_event
            .map_or(true, |last| timestamp - last >= min_quiet)
    }
}

#[derive(Debug, Clone, Copy)]
struct StutterSpan {
    start_frame: u64,
    start_time: f64,
    baseline_mean: f64,
    motion_sum: f64,
    samples: u32,
}

/// Per-run anomaly detector.
pub struct AnomalyDetector {
    config: DetectorConfig,
    interval: IntervalModel,
    motion_baseline: RollingBaseline,
    blur_baseline: RollingBaseline,
    window_length: usize,
    min_samples: usize,

    last_timestamp: Option<f64>,
    drop: Debounce,
    stutter: Debounce,
    blur: Debounce,
    span: Option<StutterSpan>,
}

impl AnomalyDetector {
    /// `expected_interval` is `stride / nominal_fps`, or `None` when the
    /// source reports no frame rate.
    pub fn new(
        config: DetectorConfig,
        baseline: &BaselineConfig,
        expected_interval: Option<f64>,
    ) -> Self {
        let interval = match expected_interval.filter(|i| i.is_finite() && *i > 0.0) {
            Some(interval) => IntervalModel::Nominal(interval),
            None => IntervalModel::Observed(RollingBaseline::new(
                baseline.window_length,
                baseline.min_samples,
            )),
        };

        Self {
            config,
            interval,
            motion_baseline: RollingBaseline::new(baseline.window_length, baseline.min_samples),
            blur_baseline: RollingBaseline::new(baseline.window_length, baseline.min_samples),
            window_length: baseline.window_length,
            min_samples: baseline.min_samples,
            last_timestamp: None,
            drop: Debounce::new(),
            stutter: Debounce::new(),
            blur: Debounce::new(),
            span: None,
        }
    }

    /// Feed one sample, in timestamp order. Returns the events this sample
    /// completed; a stutter event carries the earlier timestamp of its span.
    pub fn observe(&mut self, sample: &FrameMetrics) -> Vec<AnomalyEvent> {
        let mut events = Vec::new();

        let dropped = self.check_frame_drop(sample, &mut events);
        self.check_stutter(sample, dropped, &mut events);
        self.check_blur(sample, &mut events);

        self.last_timestamp = Some(sample.timestamp);
        events
    }

    /// Close the run. A stutter span still open is discarded.
    pub fn finish(&mut self) {
        if let Some(span) = self.span.take() {
            tracing::debug!(
                start_frame = span.start_frame,
                start_time = span.start_time,
                "Low-motion span still open at end of stream; not reported"
            );
        }
    }

    fn check_frame_drop(&mut self, sample: &FrameMetrics, events: &mut Vec<AnomalyEvent>) -> bool {
        let Some(last) = self.last_timestamp else {
            return false;
        };
        let dt = sample.timestamp - last;

        let Some(expected) = self.interval.expected() else {
            if let IntervalModel::Observed(baseline) = &mut self.interval {
                baseline.push(dt);
            }
            return false;
        };

        let ratio = dt / expected;
        if ratio <= self.config.frame_drop_multiple {
            self.drop.armed = true;
            if let IntervalModel::Observed(baseline) = &mut self.interval {
                baseline.push(dt);
            }
            return false;
        }

        if self.drop.armed && self.drop.quiet_at(sample.timestamp, self.config.min_quiet_secs) {
            let severity = if ratio > self.config.frame_drop_high_multiple {
                Severity::High
            } else {
                Severity::Medium
            };
            let missing = (ratio.round() as i64 - 1).max(1);
            events.push(AnomalyEvent::new(
                AnomalyKind::FrameDrop,
                sample.timestamp,
                sample.frame_index,
                severity,
                format!(
                    "Timestamp gap of {dt:.3}s ({ratio:.1}x the expected {expected:.3}s, ~{missing} frame(s) missing)"
                ),
            ));
            self.drop.last_event = Some(sample.timestamp);
            tracing::debug!(frame = sample.frame_index, dt, ratio, "Frame drop");
        }
        self.drop.armed = false;
        true
    }

    fn check_stutter(
        &mut self,
        sample: &FrameMetrics,
        dropped: bool,
        events: &mut Vec<AnomalyEvent>,
    ) {
        let Some(motion) = sample.motion else {
            return;
        };

        if let Some(mut span) = self.span {
            if motion < self.config.stutter_ratio * span.baseline_mean {
                let elapsed = sample.timestamp - span.start_time;
                if elapsed > self.config.stutter_max_span_secs {
                    tracing::debug!(
                        start_frame = span.start_frame,
                        elapsed,
                        "Low motion outlasted the stutter window; resetting motion baseline"
                    );
                    self.span = None;
                    self.motion_baseline =
                        RollingBaseline::new(self.window_length, self.min_samples);
                    self.motion_baseline.push(motion);
                } else {
                    span.motion_sum += motion;
                    span.samples += 1;
                    self.span = Some(span);
                }
                return;
            }

            // Motion resumed; the resuming sample is left out of the baseline.
            self.span = None;
            self.close_span(span, sample.timestamp, events);
            return;
        }

        let active = self
            .motion_baseline
            .stats()
            .filter(|stats| stats.mean > self.config.active_motion_floor);

        match active {
            Some(stats) if motion < self.config.stutter_ratio * stats.mean => {
                self.span = Some(StutterSpan {
                    start_frame: sample.frame_index,
                    start_time: sample.timestamp,
                    baseline_mean: stats.mean,
                    motion_sum: motion,
                    samples: 1,
                });
            }
            _ if dropped => {}
            _ => self.motion_baseline.push(motion),
        }
    }

    fn close_span(&mut self, span: StutterSpan, resumed_at: f64, events: &mut Vec<AnomalyEvent>) {
        let duration = resumed_at - span.start_time;
        if duration < self.config.stutter_min_span_secs {
            return;
        }
        if !self
            .stutter
            .quiet_at(span.start_time, self.config.min_quiet_secs)
        {
            return;
        }

        let span_mean = span.motion_sum / span.samples as f64;
        let severity = if span_mean < self.config.stutter_high_ratio * span.baseline_mean {
            Severity::High
        } else {
            Severity::Medium
        };
        events.push(AnomalyEvent::new(
            AnomalyKind::MotionStutter,
            span.start_time,
            span.start_frame,
            severity,
            format!(
                "Motion dropped to {span_mean:.3} (baseline {:.3}) for {duration:.2}s across {} sampled frame(s)",
                span.baseline_mean, span.samples
            ),
        ));
        self.stutter.last_event = Some(span.start_time);
        tracing::debug!(
            frame = span.start_frame,
            duration,
            span_mean,
            "Motion stutter"
        );
    }

    fn check_blur(&mut self, sample: &FrameMetrics, events: &mut Vec<AnomalyEvent>) {
        let blur = sample.blur_score;
        let Some(stats) = self.blur_baseline.stats() else {
            self.blur_baseline.push(blur);
            return;
        };

        let sigma = stats
            .std_dev
            .max(self.config.min_relative_deviation * stats.mean);
        let spike = blur < stats.mean - self.config.blur_sigma * sigma
            && blur < self.config.blur_floor_ratio * stats.mean;

        if !spike {
            self.blur.armed = true;
            self.blur_baseline.push(blur);
            return;
        }

        if self.blur.armed && self.blur.quiet_at(sample.timestamp, self.config.min_quiet_secs) {
            let deviation = if sigma > 0.0 {
                (stats.mean - blur) / sigma
            } else {
                f64::INFINITY
            };
            let severity = if deviation >= self.config.blur_high_sigma {
                Severity::High
            } else {
                Severity::Medium
            };
            events.push(AnomalyEvent::new(
                AnomalyKind::BlurSpike,
                sample.timestamp,
                sample.frame_index,
                severity,
                format!(
                    "Sharpness {blur:.1} vs baseline {:.1} ({deviation:.1} sigma below)",
                    stats.mean
                ),
            ));
            self.blur.last_event = Some(sample.timestamp);
            tracing::debug!(frame = sample.frame_index, blur, deviation, "Blur spike");
        }
        self.blur.armed = false;
    }
}
