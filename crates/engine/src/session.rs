//! One analysis run, from video file to validated report.

use std::path::Path;

use frameforge_annotate::{
    annotated_output_path, AnnotationBackend, AnnotationJob, AnnotationProgress, FfmpegAnnotator,
};
use frameforge_common::clock::{format_processing_time, RunClock};
use frameforge_common::config::AppConfig;
use frameforge_common::error::{FrameforgeError, FrameforgeResult, Stage};
use frameforge_common::CancelToken;
use frameforge_frame_source::{open_source, PixelFormat};
use frameforge_report_model::Report;

use crate::pipeline::{run_pipeline, PipelineOutput};

/// Analyze the video at `path`.
///
/// Fatal errors (undecodable input, cancellation, internal failures) are
/// returned instead of a report. A failed annotation pass only adds a
/// warning.
pub fn analyze_video(
    path: &Path,
    config: &AppConfig,
    cancel: &CancelToken,
) -> FrameforgeResult<Report> {
    analyze_video_with(path, config, cancel, &mut FfmpegAnnotator::new())
}

/// [`analyze_video`] with an explicit annotation backend.
pub fn analyze_video_with(
    path: &Path,
    config: &AppConfig,
    cancel: &CancelToken,
    annotator: &mut dyn AnnotationBackend,
) -> FrameforgeResult<Report> {
    let clock = RunClock::start();
    config.validate()?;
    cancel.check()?;

    tracing::info!(path = %path.display(), "Analyzing video");
    let source = open_source(path, PixelFormat::Gray8)?;
    let PipelineOutput {
        mut report,
        last_frame,
    } = run_pipeline(source, config, cancel, &clock)?;

    if config.annotate.enabled {
        annotate(path, config, cancel, annotator, &mut report)?;
    }

    report.summary.processing_time = clock.elapsed();

    let duration = report
        .metadata
        .as_ref()
        .map(|meta| meta.duration_secs)
        .unwrap_or(0.0);
    report.validate(duration).map_err(|e| {
        FrameforgeError::internal(Stage::Aggregator, format!("Invalid report: {e}"), last_frame)
    })?;

    tracing::info!(
        path = %path.display(),
        health_score = report.summary.health_score,
        errors = report.summary.error_count,
        frames = report.summary.processed_frames,
        processing_time = %format_processing_time(report.summary.processing_time),
        "Analysis complete"
    );
    Ok(report)
}

/// Second pass: render the annotated copy. Only cancellation is fatal.
fn annotate(
    path: &Path,
    config: &AppConfig,
    cancel: &CancelToken,
    annotator: &mut dyn AnnotationBackend,
    report: &mut Report,
) -> FrameforgeResult<()> {
    let output_path = annotated_output_path(path, config.output_dir.as_deref());
    let fps = report
        .metadata
        .as_ref()
        .and_then(|meta| meta.nominal_fps)
        .unwrap_or(report.summary.fps);
    let job = AnnotationJob {
        input: path.to_path_buf(),
        output_path,
        events: report.errors.clone(),
        fps,
        config: config.annotate.clone(),
    };

    tracing::info!(
        backend = annotator.name(),
        output = %job.output_path.display(),
        events = job.events.len(),
        "Writing annotated video"
    );

    let result = prepare_output_dir(&job.output_path).and_then(|()| {
        annotator.annotate(
            &job,
            cancel,
            Some(Box::new(|p: AnnotationProgress| {
                tracing::debug!(
                    stage = ?p.stage,
                    frames = p.frames_written,
                    progress = ?p.progress,
                    "Annotation progress"
                );
            })),
        )
    });

    match result {
        Ok(()) => {
            report.annotated_video = job
                .output_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            Ok(())
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!("Annotated video skipped: {e}");
            report.warnings.push(format!("WriterError: {e}"));
            Ok(())
        }
    }
}

fn prepare_output_dir(output_path: &Path) -> FrameforgeResult<()> {
    match output_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir).map_err(|e| {
            FrameforgeError::writer(format!("Cannot create {}: {e}", dir.display()))
        }),
        _ => Ok(()),
    }
}
