//! Report assembly.

use std::collections::BTreeMap;
use std::time::Duration;

use frameforge_common::config::HealthPolicy;
use frameforge_frame_source::SourceMetadata;
use frameforge_report_model::{
    insert_ordered, AnomalyEvent, FrameClassification, FrameClassifications, FrameLabel,
    MetricSample, Report, ReportMetadata, Severity, Summary,
};

use crate::extract::FrameMetrics;

/// Rows kept in the frame classification table.
pub const MAX_CLASSIFICATION_ROWS: usize = 200;

/// Health score for a set of events: 100 minus per-severity penalties,
/// floored at 0. Independent of event order.
pub fn health_score(events: &[AnomalyEvent], policy: &HealthPolicy) -> f64 {
    let penalty: f64 = events
        .iter()
        .map(|event| match event.severity {
            Severity::Medium => policy.medium_penalty,
            Severity::High => policy.high_penalty,
        })
        .sum();
    (100.0 - penalty).clamp(0.0, 100.0)
}

/// Run facts the aggregator does not observe itself.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub metadata: SourceMetadata,
    pub sample_stride: u32,
    /// Wall-clock duration of the whole run.
    pub processing_time: Duration,
    /// Time spent decoding and measuring, for the fps fallback.
    pub decode_elapsed: Duration,
    /// RFC 3339 run start.
    pub analyzed_at: String,
    pub min_baseline_samples: usize,
}

/// Collects samples and events in production order.
#[derive(Debug, Default)]
pub struct Aggregator {
    health: HealthPolicy,
    samples: Vec<MetricSample>,
    frames: Vec<(u64, f64)>,
    events: Vec<AnomalyEvent>,
    warnings: Vec<String>,
}

impl Aggregator {
    pub fn new(health: HealthPolicy) -> Self {
        Self {
            health,
            ..Self::default()
        }
    }

    pub fn push_sample(&mut self, metrics: &FrameMetrics) {
        self.samples.push(MetricSample::new(
            metrics.timestamp,
            metrics.motion_score(),
            metrics.blur_score,
        ));
        self.frames.push((metrics.frame_index, metrics.brightness));
    }

    pub fn push_event(&mut self, event: AnomalyEvent) {
        insert_ordered(&mut self.events, event);
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn processed_frames(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn events(&self) -> &[AnomalyEvent] {
        &self.events
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.frames.last().map(|(frame, _)| *frame)
    }

    /// Build the report. The annotated video, if any, is attached later.
    pub fn finish(mut self, context: RunContext) -> Report {
        let processed = self.samples.len() as u64;

        if (processed as usize) < context.min_baseline_samples {
            let warning = format!(
                "InsufficientData: only {processed} frame(s) analyzed; baselines need {}",
                context.min_baseline_samples
            );
            tracing::warn!(processed, "{warning}");
            self.warnings.insert(0, warning);
        }

        let fps = context
            .metadata
            .nominal_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or_else(|| {
                let secs = context.decode_elapsed.as_secs_f64();
                if secs > 0.0 {
                    processed as f64 / secs
                } else {
                    0.0
                }
            });

        let last_timestamp = self.samples.last().map(|s| s.timestamp).unwrap_or(0.0);
        let duration_secs = context
            .metadata
            .duration_secs
            .unwrap_or(0.0)
            .max(last_timestamp);

        let frame_classifications = classify_frames(&self.samples, &self.frames, &self.events);

        Report {
            summary: Summary {
                health_score: health_score(&self.events, &self.health),
                error_count: self.events.len() as u32,
                processed_frames: processed,
                processing_time: context.processing_time,
                fps,
            },
            analytics: self.samples,
            errors: self.events,
            annotated_video: None,
            metadata: Some(ReportMetadata {
                width: context.metadata.width,
                height: context.metadata.height,
                nominal_fps: context.metadata.nominal_fps,
                duration_secs,
                total_frames: context.metadata.total_frames,
                sample_stride: context.sample_stride,
                decoder: context.metadata.decoder,
                analyzed_at: context.analyzed_at,
            }),
            frame_classifications: Some(frame_classifications),
            warnings: self.warnings,
        }
    }
}

/// Label every sample, count labels, and keep an evenly spaced table of at
/// most [`MAX_CLASSIFICATION_ROWS`] rows.
pub fn classify_frames(
    samples: &[MetricSample],
    frames: &[(u64, f64)],
    events: &[AnomalyEvent],
) -> FrameClassifications {
    let mut labels: BTreeMap<u64, FrameLabel> = BTreeMap::new();
    for event in events {
        labels
            .entry(event.frame_index)
            .or_insert_with(|| event.kind.label());
    }

    let rows: Vec<FrameClassification> = samples
        .iter()
        .zip(frames)
        .map(|(sample, (frame, brightness))| FrameClassification {
            frame: *frame,
            timestamp: sample.timestamp,
            classification: labels.get(frame).copied().unwrap_or(FrameLabel::Normal),
            motion_score: sample.motion_score,
            blur_score: sample.blur_score,
            brightness: *brightness,
        })
        .collect();

    let mut counts: BTreeMap<FrameLabel, u64> = FrameLabel::ALL.iter().map(|l| (*l, 0)).collect();
    for row in &rows {
        *counts.entry(row.classification).or_insert(0) += 1;
    }

    let step = rows.len().div_ceil(MAX_CLASSIFICATION_ROWS).max(1);
    FrameClassifications {
        counts,
        frames: rows.into_iter().step_by(step).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frameforge_report_model::AnomalyKind;
    use proptest::prelude::*;

    fn event(severity: Severity, t: f64) -> AnomalyEvent {
        AnomalyEvent::new(AnomalyKind::BlurSpike, t, (t * 30.0) as u64, severity, "")
    }

    fn metadata(fps: Option<f64>) -> SourceMetadata {
        SourceMetadata {
            width: 320,
            height: 180,
            nominal_fps: fps,
            duration_secs: Some(10.0),
            total_frames: Some(300),
            decoder: "synthetic".to_string(),
        }
    }

    fn context(fps: Option<f64>) -> RunContext {
        RunContext {
            metadata: metadata(fps),
            sample_stride: 1,
            processing_time: Duration::from_millis(1420),
            decode_elapsed: Duration::from_secs(2),
            analyzed_at: "2026-01-01T00:00:00+00:00".to_string(),
            min_baseline_samples: 10,
        }
    }

    fn metrics(frame: u64) -> FrameMetrics {
        FrameMetrics {
            frame_index: frame,
            timestamp: frame as f64 / 30.0,
            motion: (frame > 0).then_some(1.0),
            blur_score: 300.0,
            brightness: 120.0,
        }
    }

    #[test]
    fn test_health_penalties() {
        let policy = HealthPolicy::default();
        assert_eq!(health_score(&[], &policy), 100.0);
        assert_eq!(
            health_score(&[event(Severity::Medium, 1.0), event(Severity::High, 2.0)], &policy),
            85.0
        );
        let many: Vec<_> = (0..20).map(|i| event(Severity::High, i as f64)).collect();
        assert_eq!(health_score(&many, &policy), 0.0);
    }

    #[test]
    fn test_finish_builds_consistent_report() {
        let mut agg = Aggregator::new(HealthPolicy::default());
        for i in 0..30 {
            agg.push_sample(&metrics(i));
        }
        agg.push_event(event(Severity::High, 0.5));
        agg.push_event(event(Severity::Medium, 0.2));

        let report = agg.finish(context(Some(30.0)));
        assert_eq!(report.summary.processed_frames, 30);
        assert_eq!(report.summary.error_count, 2);
        assert_eq!(report.summary.health_score, 85.0);
        assert_eq!(report.summary.fps, 30.0);
        assert_eq!(report.analytics[0].motion_score, 0.0);
        assert!(report.errors[0].timestamp < report.errors[1].timestamp);
        assert!(report.warnings.is_empty());

        let table = report.frame_classifications.as_ref().unwrap();
        assert_eq!(table.counts[&FrameLabel::BlurSpike], 2);
        assert_eq!(table.counts[&FrameLabel::Normal], 28);
        report.validate(10.0).unwrap();
    }

    #[test]
    fn test_fps_falls_back_to_measured_rate() {
        let mut agg = Aggregator::new(HealthPolicy::default());
        for i in 0..20 {
            agg.push_sample(&metrics(i));
        }
        assert_eq!(agg.finish(context(None)).summary.fps, 10.0);
    }

    #[test]
    fn test_short_run_warns_insufficient_data() {
        let mut agg = Aggregator::new(HealthPolicy::default());
        for i in 0..4 {
            agg.push_sample(&metrics(i));
        }
        let report = agg.finish(context(Some(30.0)));
        assert!(report.warnings[0].starts_with("InsufficientData"));
        assert_eq!(report.summary.health_score, 100.0);
    }

    #[test]
    fn test_classification_table_is_downsampled() {
        let samples: Vec<_> = (0..1000)
            .map(|i| MetricSample::new(i as f64 / 30.0, 1.0, 1.0))
            .collect();
        let frames: Vec<_> = (0..1000).map(|i| (i as u64, 100.0)).collect();
        let table = classify_frames(&samples, &frames, &[]);
        assert!(table.frames.len() <= MAX_CLASSIFICATION_ROWS);
        assert_eq!(table.counts[&FrameLabel::Normal], 1000);
    }

    proptest! {
        #[test]
        fn health_is_bounded_and_non_increasing(severities in proptest::collection::vec(any::<bool>(), 0..40)) {
            let policy = HealthPolicy::default();
            let mut events = Vec::new();
            let mut previous = health_score(&events, &policy);
            for (i, high) in severities.iter().enumerate() {
                let severity = if *high { Severity::High } else { Severity::Medium };
                events.push(event(severity, i as f64));
                let score = health_score(&events, &policy);
                prop_assert!((0.0..=100.0).contains(&score));
                prop_assert!(score <= previous);
                previous = score;
            }
        }

        #[test]
        fn health_ignores_event_order(mut severities in proptest::collection::vec(any::<bool>(), 0..20)) {
            let policy = HealthPolicy::default();
            let build = |flags: &[bool]| -> Vec<AnomalyEvent> {
                flags.iter().enumerate().map(|(i, high)| {
                    event(if *high { Severity::High } else { Severity::Medium }, i as f64)
                }).collect()
            };
            let forward = health_score(&build(&severities), &policy);
            severities.reverse();
            prop_assert_eq!(forward, health_score(&build(&severities), &policy));
        }
    }
}
