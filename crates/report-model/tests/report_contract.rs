use std::path::PathBuf;
use std::time::Duration;

use frameforge_report_model::{
    AnomalyEvent, AnomalyKind, FrameLabel, MetricSample, Report, Severity, Summary,
};
use proptest::prelude::*;

fn load_fixture_report() -> Report {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("fixtures")
        .join("sample-report.json");

    let content = std::fs::read_to_string(path).expect("fixture report should be readable");
    Report::from_json(&content).expect("fixture report should parse")
}

#[test]
fn fixture_report_parses_and_validates() {
    let report = load_fixture_report();

    assert_eq!(report.summary.processing_time, Duration::from_millis(370));
    assert_eq!(report.errors[0].kind, AnomalyKind::FrameDrop);
    assert_eq!(report.errors[0].frame_index, 17);
    assert_eq!(report.annotated_video.as_deref(), Some("clip_annotated.mp4"));

    let classifications = report.frame_classifications.as_ref().unwrap();
    assert_eq!(classifications.counts[&FrameLabel::Normal], 4);
    assert_eq!(report.warnings.len(), 1);

    report.validate(0.7).unwrap();
}

#[test]
fn fixture_report_reserializes_with_same_top_level_keys() {
    let report = load_fixture_report();
    let value = serde_json::to_value(&report).unwrap();
    let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "analytics",
            "annotated_video",
            "errors",
            "frame_classifications",
            "summary",
            "warnings"
        ]
    );
}

fn report_with(timestamps: &[f64]) -> Report {
    Report {
        summary: Summary {
            health_score: 100.0,
            error_count: 0,
            processed_frames: timestamps.len() as u64,
            processing_time: Duration::ZERO,
            fps: 30.0,
        },
        analytics: timestamps
            .iter()
            .map(|t| MetricSample::new(*t, 1.0, 100.0))
            .collect(),
        errors: vec![],
        annotated_video: None,
        metadata: None,
        frame_classifications: None,
        warnings: vec![],
    }
}

proptest! {
    #[test]
    fn sorted_distinct_timestamps_always_validate(mut raw in proptest::collection::btree_set(0u32..100_000, 1..64)) {
        let timestamps: Vec<f64> = std::mem::take(&mut raw)
            .into_iter()
            .map(|ms| ms as f64 / 1000.0)
            .collect();
        let duration = timestamps.last().copied().unwrap_or(0.0);
        let mut report = report_with(&timestamps);

        for t in timestamps.iter().step_by(7) {
            report.errors.push(AnomalyEvent::new(
                AnomalyKind::BlurSpike,
                *t,
                0,
                Severity::Medium,
                "",
            ));
        }
        report.summary.error_count = report.errors.len() as u32;

        prop_assert!(report.validate(duration).is_ok());
    }

    #[test]
    fn duplicated_timestamp_is_rejected(raw in proptest::collection::btree_set(0u32..100_000, 2..64), pick in any::<prop::sample::Index>()) {
        let mut timestamps: Vec<f64> = raw.into_iter().map(|ms| ms as f64 / 1000.0).collect();
        let i = pick.index(timestamps.len() - 1) + 1;
        timestamps[i] = timestamps[i - 1];
        let duration = timestamps.last().copied().unwrap_or(0.0);

        prop_assert!(report_with(&timestamps).validate(duration).is_err());
    }
}
