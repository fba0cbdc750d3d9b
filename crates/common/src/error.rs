//! Error types shared across FrameForge crates.
//!
//! Fatal errors (`Decode`, `Internal`, `Cancelled`, ...) abort a run and are
//! reported to the caller as an [`ErrorPayload`] instead of a report.
//! `InsufficientData` and `Writer` never abort a run; they are surfaced as
//! report warnings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FrameSource,
    Metrics,
    Detector,
    Aggregator,
    Writer,
    Engine,
    Config,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::FrameSource => "frame_source",
            Stage::Metrics => "metrics",
            Stage::Detector => "detector",
            Stage::Aggregator => "aggregator",
            Stage::Writer => "writer",
            Stage::Engine => "engine",
            Stage::Config => "config",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for FrameForge operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameforgeError {
    #[error("Decode error: {message}{}", decode_location(.byte_offset, .frame_index))]
    Decode {
        message: String,
        byte_offset: Option<u64>,
        frame_index: Option<u64>,
    },

    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    #[error("Annotated video export failed: {message}")]
    Writer { message: String },

    #[error("Internal error in {stage}: {message}{}", last_frame_suffix(.last_frame))]
    Internal {
        message: String,
        stage: Stage,
        last_frame: Option<u64>,
    },

    #[error("Analysis cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using FrameforgeError.
pub type FrameforgeResult<T> = Result<T, FrameforgeError>;

fn decode_location(byte_offset: &Option<u64>, frame_index: &Option<u64>) -> String {
    match (*byte_offset, *frame_index) {
        (Some(offset), Some(frame)) => format!(" (frame {frame}, byte offset {offset})"),
        (Some(offset), None) => format!(" (byte offset {offset})"),
        (None, Some(frame)) => format!(" (frame {frame})"),
        (None, None) => String::new(),
    }
}

fn last_frame_suffix(last_frame: &Option<u64>) -> String {
    last_frame
        .map(|frame| format!(" (last processed frame {frame})"))
        .unwrap_or_default()
}

impl FrameforgeError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
            byte_offset: None,
            frame_index: None,
        }
    }

    pub fn decode_at(msg: impl Into<String>, byte_offset: Option<u64>, frame_index: Option<u64>) -> Self {
        Self::Decode {
            message: msg.into(),
            byte_offset,
            frame_index,
        }
    }

    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Self::InsufficientData {
            message: msg.into(),
        }
    }

    pub fn writer(msg: impl Into<String>) -> Self {
        Self::Writer {
            message: msg.into(),
        }
    }

    pub fn internal(stage: Stage, msg: impl Into<String>, last_frame: Option<u64>) -> Self {
        Self::Internal {
            message: msg.into(),
            stage,
            last_frame,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error must abort the run (no report is produced).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InsufficientData { .. } | Self::Writer { .. })
    }

    /// Stable error kind name used in structured payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "DecodeError",
            Self::InsufficientData { .. } => "InsufficientDataError",
            Self::Writer { .. } => "WriterError",
            Self::Internal { .. } => "InternalError",
            Self::Cancelled { .. } => "Cancelled",
            Self::Config { .. } => "ConfigError",
            Self::FileNotFound { .. } => "FileNotFound",
            Self::Io(_) => "IoError",
            Self::Json(_) => "InternalError",
            Self::Other(_) => "InternalError",
        }
    }

    /// Stage the error is attributed to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Decode { .. } | Self::FileNotFound { .. } => Stage::FrameSource,
            Self::InsufficientData { .. } => Stage::Detector,
            Self::Writer { .. } => Stage::Writer,
            Self::Internal { stage, .. } => *stage,
            Self::Config { .. } => Stage::Config,
            Self::Cancelled { .. } | Self::Io(_) | Self::Json(_) | Self::Other(_) => Stage::Engine,
        }
    }

    /// Build the structured payload reported to the caller on failure.
    pub fn payload(&self) -> ErrorPayload {
        let (frame_index, byte_offset) = match self {
            Self::Decode {
                byte_offset,
                frame_index,
                ..
            } => (*frame_index, *byte_offset),
            Self::Internal { last_frame, .. } => (*last_frame, None),
            _ => (None, None),
        };

        ErrorPayload {
            kind: self.kind().to_string(),
            stage: self.stage(),
            message: self.to_string(),
            frame_index,
            byte_offset,
        }
    }
}

/// Structured failure description emitted instead of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_offset: Option<u64>,
}

/// Top-level failure document: `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

impl From<&FrameforgeError> for ErrorEnvelope {
    fn from(err: &FrameforgeError) -> Self {
        Self {
            error: err.payload(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_display_includes_location() {
        let err = FrameforgeError::decode_at("truncated frame payload", Some(4096), Some(12));
        assert_eq!(
            err.to_string(),
            "Decode error: truncated frame payload (frame 12, byte offset 4096)"
        );
        assert!(err.is_fatal());
        assert_eq!(err.stage(), Stage::FrameSource);
    }

    #[test]
    fn test_non_fatal_kinds() {
        assert!(!FrameforgeError::writer("ffmpeg missing").is_fatal());
        assert!(!FrameforgeError::insufficient_data("3 samples").is_fatal());
        assert!(FrameforgeError::cancelled("timeout").is_fatal());
    }

    #[test]
    fn test_payload_serialization() {
        let err = FrameforgeError::internal(Stage::Metrics, "too many skipped frames", Some(41));
        let envelope = ErrorEnvelope::from(&err);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["kind"], "InternalError");
        assert_eq!(json["error"]["stage"], "metrics");
        assert_eq!(json["error"]["frame_index"], 41);
        assert!(json["error"].get("byte_offset").is_none());
    }
}
