//! Pipelined analysis of one frame source.
//!
//! ```text
//!  decode ──frames──▶ extract ──metrics──▶ detect + aggregate
//! ```
//!
//! Stages run on their own threads and talk through bounded `sync_channel`s,
//! so a slow stage blocks the stages in front of it. Each queue has a single
//! consumer, which keeps frames in decode order. Every stage checks the
//! run's [`CancelToken`] between frames.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use frameforge_analysis_core::{
    expected_interval, FrameMetrics, MetricExtractor, RunAnalysis, RunContext, SkipBudget,
};
use frameforge_common::clock::{ProgressTicker, RunClock};
use frameforge_common::config::{AppConfig, MetricsConfig};
use frameforge_common::error::{FrameforgeError, FrameforgeResult, Stage};
use frameforge_common::CancelToken;
use frameforge_frame_source::source::BoxedFrameSource;
use frameforge_frame_source::Frame;
use frameforge_report_model::Report;

/// A finished pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub report: Report,

    /// Index of the last frame that reached the aggregator.
    pub last_frame: Option<u64>,
}

/// Decode, measure and analyze every sampled frame of `source`.
pub fn run_pipeline(
    source: BoxedFrameSource,
    config: &AppConfig,
    cancel: &CancelToken,
    clock: &RunClock,
) -> FrameforgeResult<PipelineOutput> {
    let metadata = source.metadata().clone();
    let stride = config.analysis.sampling.stride_for(metadata.total_frames);
    let depth = config.pipeline.queue_depth.max(1);
    let max_skipped = config.pipeline.max_skipped_frames;

    tracing::info!(
        width = metadata.width,
        height = metadata.height,
        fps = ?metadata.nominal_fps,
        total_frames = ?metadata.total_frames,
        decoder = %metadata.decoder,
        stride,
        "Starting analysis pipeline"
    );

    thread::scope(|scope| {
        let (frame_tx, frame_rx) = sync_channel::<FrameforgeResult<Frame>>(depth);
        let (metrics_tx, metrics_rx) = sync_channel::<FrameforgeResult<FrameMetrics>>(depth);

        let decoder = thread::Builder::new()
            .name("frameforge-decode".to_string())
            .spawn_scoped(scope, move || decode_stage(source, stride, frame_tx, cancel))
            .map_err(|e| spawn_error(Stage::FrameSource, e))?;

        let metrics_config = &config.analysis.metrics;
        let extractor = thread::Builder::new()
            .name("frameforge-extract".to_string())
            .spawn_scoped(scope, move || {
                extract_stage(metrics_config, max_skipped, frame_rx, metrics_tx, cancel)
            })
            .map_err(|e| spawn_error(Stage::Metrics, e))?;

        let mut analysis =
            RunAnalysis::new(&config.analysis, expected_interval(metadata.nominal_fps, stride));
        let outcome = consume(&mut analysis, metrics_rx, cancel, clock);
        let decode_elapsed = clock.elapsed();

        let last_frame = analysis.last_frame();
        let decoded = join_stage(decoder, Stage::FrameSource, last_frame)?;
        let budget = join_stage(extractor, Stage::Metrics, last_frame)?;
        outcome?;

        tracing::info!(
            decoded,
            analyzed = analysis.processed_frames(),
            skipped = budget.skipped(),
            "Pipeline drained"
        );
        if let Some(warning) = budget.warning() {
            analysis.warn(warning);
        }

        let report = analysis.finish(RunContext {
            metadata,
            sample_stride: stride,
            processing_time: clock.elapsed(),
            decode_elapsed,
            analyzed_at: clock.epoch_wall().to_string(),
            min_baseline_samples: config.analysis.baseline.min_samples,
        });
        Ok(PipelineOutput { report, last_frame })
    })
}

/// Pull frames from the source and forward every `stride`-th one. Stops
/// after forwarding a decode error. Returns the number of frames decoded.
fn decode_stage(
    mut source: BoxedFrameSource,
    stride: u32,
    frames: SyncSender<FrameforgeResult<Frame>>,
    cancel: &CancelToken,
) -> u64 {
    let stride = u64::from(stride.max(1));
    let mut decoded = 0u64;

    while let Some(item) = source.next() {
        if cancel.is_cancelled() {
            break;
        }
        let failed = match &item {
            Ok(frame) => {
                decoded += 1;
                if frame.index % stride != 0 {
                    continue;
                }
                false
            }
            Err(e) => {
                tracing::error!("Decode failed after {decoded} frames: {e}");
                true
            }
        };
        if frames.send(item).is_err() || failed {
            break;
        }
    }

    tracing::debug!(decoded, "Decode stage finished");
    decoded
}

/// Measure each frame. Unmeasurable frames are skipped until the budget
/// runs out, at which point the budget error is forwarded instead.
fn extract_stage(
    config: &MetricsConfig,
    max_skipped: u32,
    frames: Receiver<FrameforgeResult<Frame>>,
    metrics: SyncSender<FrameforgeResult<FrameMetrics>>,
    cancel: &CancelToken,
) -> SkipBudget {
    let mut extractor = MetricExtractor::new(config.clone());
    let mut budget = SkipBudget::new(max_skipped);

    for item in frames {
        if cancel.is_cancelled() {
            break;
        }
        let result = match item {
            Ok(frame) => match extractor.extract(&frame) {
                Ok(measured) => Ok(measured),
                Err(err) => match budget.record(&err) {
                    Ok(()) => continue,
                    Err(fatal) => Err(fatal),
                },
            },
            Err(e) => Err(e),
        };
        let failed = result.is_err();
        if metrics.send(result).is_err() || failed {
            break;
        }
    }

    budget
}

/// Feed metrics to the detectors until the queue closes.
fn consume(
    analysis: &mut RunAnalysis,
    metrics: Receiver<FrameforgeResult<FrameMetrics>>,
    cancel: &CancelToken,
    clock: &RunClock,
) -> FrameforgeResult<()> {
    let mut ticker = ProgressTicker::new(Duration::from_secs(2));

    for item in metrics {
        cancel.check()?;
        let measured = item?;
        analysis.push(&measured);

        if ticker.should_tick(clock.elapsed_ns()) {
            tracing::debug!(
                frames = analysis.processed_frames(),
                timestamp = measured.timestamp,
                "Analysis progress"
            );
        }
    }

    // Stages stop quietly on cancellation; surface it here.
    cancel.check()
}

fn join_stage<T>(
    handle: ScopedJoinHandle<'_, T>,
    stage: Stage,
    last_frame: Option<u64>,
) -> FrameforgeResult<T> {
    handle.join().map_err(|_| {
        FrameforgeError::internal(stage, format!("{stage} stage panicked"), last_frame)
    })
}

fn spawn_error(stage: Stage, err: std::io::Error) -> FrameforgeError {
    FrameforgeError::internal(stage, format!("Failed to spawn {stage} thread: {err}"), None)
}
