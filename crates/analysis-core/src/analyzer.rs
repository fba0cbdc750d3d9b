//! Single-pass analysis of a frame stream.
//!
//! [`RunAnalysis`] is the detection and aggregation half of a run: it takes
//! metrics in timestamp order and builds the report. [`FrameAnalyzer`] puts a
//! [`MetricExtractor`] in front of it for callers that do not need a
//! pipelined engine.

use std::time::Instant;

use frameforge_common::config::{AnalysisConfig, AppConfig};
use frameforge_common::error::{FrameforgeError, FrameforgeResult, Stage};
use frameforge_frame_source::{Frame, FrameSource};
use frameforge_report_model::Report;

use crate::aggregator::{Aggregator, RunContext};
use crate::detector::AnomalyDetector;
use crate::extract::{ExtractionError, FrameMetrics, MetricExtractor};

/// Expected time between sampled frames.
pub fn expected_interval(nominal_fps: Option<f64>, stride: u32) -> Option<f64> {
    nominal_fps
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .map(|fps| stride.max(1) as f64 / fps)
}

/// Counts skipped frames and aborts the run past the configured limit.
#[derive(Debug, Clone)]
pub struct SkipBudget {
    skipped: u32,
    max_skipped: u32,
}

impl SkipBudget {
    pub fn new(max_skipped: u32) -> Self {
        Self {
            skipped: 0,
            max_skipped,
        }
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Record a failed frame. Errors once more than `max_skipped` frames
    /// have failed.
    pub fn record(&mut self, err: &ExtractionError) -> FrameforgeResult<()> {
        self.skipped += 1;
        tracing::warn!(frame = err.frame(), skipped = self.skipped, "Skipping frame: {err}");
        if self.skipped > self.max_skipped {
            return Err(FrameforgeError::internal(
                Stage::Metrics,
                format!(
                    "{} frames failed metric extraction (limit {}); last: {err}",
                    self.skipped, self.max_skipped
                ),
                Some(err.frame()),
            ));
        }
        Ok(())
    }

    /// Warning line for the report, if anything was skipped.
    pub fn warning(&self) -> Option<String> {
        (self.skipped > 0).then(|| {
            format!(
                "{} frame(s) skipped after metric extraction failures",
                self.skipped
            )
        })
    }
}

/// Detection and aggregation state for one run.
pub struct RunAnalysis {
    detector: AnomalyDetector,
    aggregator: Aggregator,
    min_samples: usize,
}

impl RunAnalysis {
    pub fn new(config: &AnalysisConfig, expected_interval: Option<f64>) -> Self {
        Self {
            detector: AnomalyDetector::new(
                config.detector.clone(),
                &config.baseline,
                expected_interval,
            ),
            aggregator: Aggregator::new(config.health.clone()),
            min_samples: config.baseline.min_samples,
        }
    }

    pub fn push(&mut self, metrics: &FrameMetrics) {
        self.aggregator.push_sample(metrics);
        for event in self.detector.observe(metrics) {
            tracing::info!(
                kind = %event.kind,
                frame = event.frame_index,
                timestamp = event.timestamp,
                severity = event.severity.as_str(),
                "Anomaly detected"
            );
            self.aggregator.push_event(event);
        }
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.aggregator.warn(warning);
    }

    pub fn processed_frames(&self) -> u64 {
        self.aggregator.processed_frames()
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.aggregator.last_frame()
    }

    /// Close the detectors and build the report.
    pub fn finish(mut self, mut context: RunContext) -> Report {
        self.detector.finish();
        context.min_baseline_samples = self.min_samples;
        self.aggregator.finish(context)
    }
}

/// Extraction plus analysis on the caller's thread.
pub struct FrameAnalyzer {
    extractor: MetricExtractor,
    analysis: RunAnalysis,
    skips: SkipBudget,
}

impl FrameAnalyzer {
    pub fn new(config: &AnalysisConfig, expected_interval: Option<f64>, max_skipped: u32) -> Self {
        Self {
            extractor: MetricExtractor::new(config.metrics.clone()),
            analysis: RunAnalysis::new(config, expected_interval),
            skips: SkipBudget::new(max_skipped),
        }
    }

    /// Measure and analyze one frame. Unmeasurable frames are skipped.
    pub fn push_frame(&mut self, frame: &Frame) -> FrameforgeResult<()> {
        match self.extractor.extract(frame) {
            Ok(metrics) => {
                self.analysis.push(&metrics);
                Ok(())
            }
            Err(err) => self.skips.record(&err),
        }
    }

    pub fn processed_frames(&self) -> u64 {
        self.analysis.processed_frames()
    }

    pub fn finish(mut self, context: RunContext) -> Report {
        if let Some(warning) = self.skips.warning() {
            self.analysis.warn(warning);
        }
        self.analysis.finish(context)
    }
}

/// Analyze every frame of `source` on the current thread.
pub fn analyze_frames<S: FrameSource + ?Sized>(
    source: &mut S,
    config: &AppConfig,
) -> FrameforgeResult<Report> {
    let started = Instant::now();
    let analyzed_at = frameforge_common::clock::RunClock::start()
        .epoch_wall()
        .to_string();
    let metadata = source.metadata().clone();
    let stride = config.analysis.sampling.stride_for(metadata.total_frames);

    let mut analyzer = FrameAnalyzer::new(
        &config.analysis,
        expected_interval(metadata.nominal_fps, stride),
        config.pipeline.max_skipped_frames,
    );

    while let Some(item) = source.next() {
        let frame = item?;
        if frame.index % stride as u64 != 0 {
            continue;
        }
        analyzer.push_frame(&frame)?;
    }
    let decode_elapsed = started.elapsed();

    Ok(analyzer.finish(RunContext {
        metadata,
        sample_stride: stride,
        processing_time: started.elapsed(),
        decode_elapsed,
        analyzed_at,
        min_baseline_samples: config.analysis.baseline.min_samples,
    }))
}
