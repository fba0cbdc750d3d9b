//! The forensic report handed back to the caller.
//!
//! A report is built once, at the end of a run, and never mutated after.
//! Its JSON shape is the contract consumed by the upload service and the
//! dashboard:
//!
//! ```json
//! {
//!   "summary": {"health_score": 90.0, "error_count": 1, "processed_frames": 300,
//!               "processing_time": "1.42s", "fps": 30.0},
//!   "analytics": [{"timestamp": 0.0, "motion_score": 0.0, "blur_score": 412.7}],
//!   "errors": [{"type": "FrameDrop", "timestamp": 4.5, "frame": 135,
//!               "severity": "High", "description": "..."}],
//!   "annotated_video": "clip_annotated.mp4"
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::anomaly::AnomalyEvent;
use crate::sample::{FrameClassification, FrameLabel, MetricSample};

/// Aggregate figures for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// 0–100, derived from anomaly severities only.
    pub health_score: f64,

    pub error_count: u32,

    pub processed_frames: u64,

    /// Wall-clock duration of the run, serialized as `"1.42s"`.
    #[serde(with = "processing_time_format")]
    pub processing_time: Duration,

    /// Nominal source frame rate (or measured rate when unavailable).
    pub fps: f64,
}

/// Source description attached to the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub width: u32,
    pub height: u32,
    pub nominal_fps: Option<f64>,
    pub duration_secs: f64,
    pub total_frames: Option<u64>,
    pub sample_stride: u32,
    pub decoder: String,
    /// RFC 3339 wall-clock time the run started.
    pub analyzed_at: String,
}

/// Per-frame label table, downsampled for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameClassifications {
    /// Number of sampled frames per label (all samples, not just listed rows).
    pub counts: BTreeMap<FrameLabel, u64>,

    pub frames: Vec<FrameClassification>,
}

/// The top-level analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: Summary,

    /// One sample per processed frame, strictly increasing in timestamp.
    pub analytics: Vec<MetricSample>,

    /// Anomalies in timestamp order.
    pub errors: Vec<AnomalyEvent>,

    /// File name of the annotated copy, when one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_video: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ReportMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_classifications: Option<FrameClassifications>,

    /// Non-fatal conditions (insufficient data, writer failure, skipped frames).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// A report that violates one of its structural invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReportInvariantError {
    #[error("error_count {error_count} does not match {events} events")]
    ErrorCountMismatch { error_count: u32, events: usize },

    #[error("processed_frames {processed} does not match {samples} analytics samples")]
    SampleCountMismatch { processed: u64, samples: usize },

    #[error("analytics not strictly increasing at index {index} (t={timestamp})")]
    UnorderedAnalytics { index: usize, timestamp: f64 },

    #[error("malformed metric sample at index {index}")]
    MalformedSample { index: usize },

    #[error("errors not ordered by timestamp at index {index}")]
    UnorderedErrors { index: usize },

    #[error("event at t={timestamp} outside [0, {duration}]")]
    EventOutOfRange { timestamp: f64, duration: f64 },

    #[error("health score {0} outside [0, 100]")]
    HealthOutOfRange(f64),
}

impl Report {
    /// Check the structural invariants every report must satisfy.
    ///
    /// `duration_secs` bounds event timestamps.
    pub fn validate(&self, duration_secs: f64) -> Result<(), ReportInvariantError> {
        if self.summary.error_count as usize != self.errors.len() {
            return Err(ReportInvariantError::ErrorCountMismatch {
                error_count: self.summary.error_count,
                events: self.errors.len(),
            });
        }

        if self.summary.processed_frames as usize != self.analytics.len() {
            return Err(ReportInvariantError::SampleCountMismatch {
                processed: self.summary.processed_frames,
                samples: self.analytics.len(),
            });
        }

        if !(0.0..=100.0).contains(&self.summary.health_score) {
            return Err(ReportInvariantError::HealthOutOfRange(
                self.summary.health_score,
            ));
        }

        for (index, sample) in self.analytics.iter().enumerate() {
            if !sample.is_well_formed() {
                return Err(ReportInvariantError::MalformedSample { index });
            }
            if index > 0 && sample.timestamp <= self.analytics[index - 1].timestamp {
                return Err(ReportInvariantError::UnorderedAnalytics {
                    index,
                    timestamp: sample.timestamp,
                });
            }
        }

        for (index, event) in self.errors.iter().enumerate() {
            if index > 0 && event.timestamp < self.errors[index - 1].timestamp {
                return Err(ReportInvariantError::UnorderedErrors { index });
            }
            // Tolerate float noise on the final frame timestamp.
            if event.timestamp < 0.0 || event.timestamp > duration_secs + 1e-6 {
                return Err(ReportInvariantError::EventOutOfRange {
                    timestamp: event.timestamp,
                    duration: duration_secs,
                });
            }
        }

        Ok(())
    }

    /// Serialize to compact JSON (the single-shot CLI output).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Serialize to indented JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a report document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

mod processing_time_format {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&frameforge_common::clock::format_processing_time(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        frameforge_common::clock::parse_processing_time(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid processing_time {raw:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AnomalyKind, Severity};

    fn sample_report() -> Report {
        Report {
            summary: Summary {
                health_score: 90.0,
                error_count: 1,
                processed_frames: 3,
                processing_time: Duration::from_millis(1420),
                fps: 30.0,
            },
            analytics: vec![
                MetricSample::new(0.0, 0.0, 400.0),
                MetricSample::new(1.0 / 30.0, 1.5, 401.0),
                MetricSample::new(2.0 / 30.0, 1.4, 399.0),
            ],
            errors: vec![AnomalyEvent::new(
                AnomalyKind::FrameDrop,
                2.0 / 30.0,
                2,
                Severity::High,
                "gap",
            )],
            annotated_video: None,
            metadata: None,
            frame_classifications: None,
            warnings: vec![],
        }
    }

    #[test]
    fn test_summary_wire_format() {
        let json = serde_json::to_value(sample_report()).unwrap();
        let summary = json["summary"].as_object().unwrap();
        assert_eq!(summary.len(), 5);
        assert_eq!(summary["processing_time"], "1.42s");
        assert!(json.get("annotated_video").is_none());
        assert!(json.get("warnings").is_none());
    }

    #[test]
    fn test_json_roundtrip_preserves_report() {
        let report = sample_report();
        let parsed = Report::from_json(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_validate_accepts_consistent_report() {
        sample_report().validate(0.1).unwrap();
    }

    #[test]
    fn test_validate_rejects_count_mismatch() {
        let mut report = sample_report();
        report.summary.error_count = 0;
        assert!(matches!(
            report.validate(0.1),
            Err(ReportInvariantError::ErrorCountMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unordered_analytics() {
        let mut report = sample_report();
        report.analytics.swap(1, 2);
        assert!(matches!(
            report.validate(0.1),
            Err(ReportInvariantError::UnorderedAnalytics { index: 2, .. })
                | Err(ReportInvariantError::UnorderedAnalytics { index: 1, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_event_past_duration() {
        assert!(matches!(
            sample_report().validate(0.05),
            Err(ReportInvariantError::EventOutOfRange { .. })
        ));
    }
}
