//! Anomaly events detected in a video.

use serde::{Deserialize, Serialize};

use crate::sample::FrameLabel;

/// Kind of temporal anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// Gap between consecutive frame timestamps well above the nominal interval.
    FrameDrop,
    /// Sustained near-zero motion inside otherwise active footage.
    MotionStutter,
    /// Sharpness collapsing well below the rolling baseline.
    BlurSpike,
}

impl AnomalyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyKind::FrameDrop => "FrameDrop",
            AnomalyKind::MotionStutter => "MotionStutter",
            AnomalyKind::BlurSpike => "BlurSpike",
        }
    }

    /// Classification label for frames carrying this anomaly.
    pub fn label(self) -> FrameLabel {
        match self {
            AnomalyKind::FrameDrop => FrameLabel::FrameDrop,
            AnomalyKind::MotionStutter => FrameLabel::MotionStutter,
            AnomalyKind::BlurSpike => FrameLabel::BlurSpike,
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an anomaly, graded by the magnitude of the deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

/// A single detected, debounced anomaly. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,

    /// Presentation time of the flagged frame (seconds).
    pub timestamp: f64,

    /// Source frame index of the flagged frame.
    #[serde(rename = "frame")]
    pub frame_index: u64,

    pub severity: Severity,

    /// Human-readable explanation including the measured deviation.
    pub description: String,
}

impl AnomalyEvent {
    pub fn new(
        kind: AnomalyKind,
        timestamp: f64,
        frame_index: u64,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            timestamp,
            frame_index,
            severity,
            description: description.into(),
        }
    }
}

/// Insert `event` keeping `events` sorted by timestamp. Events with equal
/// timestamps keep their arrival order.
pub fn insert_ordered(events: &mut Vec<AnomalyEvent>, event: AnomalyEvent) {
    let idx = events.partition_point(|existing| existing.timestamp <= event.timestamp);
    events.insert(idx, event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = AnomalyEvent::new(
            AnomalyKind::MotionStutter,
            2.0333,
            61,
            Severity::High,
            "Motion froze for 1.30s",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "MotionStutter");
        assert_eq!(json["frame"], 61);
        assert_eq!(json["severity"], "High");
        assert_eq!(json.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_insert_ordered_keeps_timestamp_order() {
        let mut events = vec![];
        for (t, kind) in [
            (3.0, AnomalyKind::BlurSpike),
            (1.0, AnomalyKind::FrameDrop),
            (2.0, AnomalyKind::MotionStutter),
            (2.0, AnomalyKind::BlurSpike),
        ] {
            insert_ordered(
                &mut events,
                AnomalyEvent::new(kind, t, (t * 30.0) as u64, Severity::Medium, ""),
            );
        }
        let order: Vec<_> = events.iter().map(|e| (e.timestamp, e.kind)).collect();
        assert_eq!(
            order,
            vec![
                (1.0, AnomalyKind::FrameDrop),
                (2.0, AnomalyKind::MotionStutter),
                (2.0, AnomalyKind::BlurSpike),
                (3.0, AnomalyKind::BlurSpike),
            ]
        );
    }
}
