//! Stdout documents. Everything else goes to the log on stderr.

use serde::Serialize;

use frameforge_common::error::{ErrorEnvelope, ErrorPayload, FrameforgeError};
use frameforge_report_model::Report;

/// Print `{"error": {...}}` for a failed run.
pub fn print_error(err: &FrameforgeError) {
    tracing::error!(kind = err.kind(), stage = %err.stage(), "{err}");
    match serde_json::to_string(&ErrorEnvelope::from(err)) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to serialize error payload: {e}"),
    }
}

/// One line of `batch` output.
#[derive(Debug, Serialize)]
pub struct BatchLine<'a> {
    pub input: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<&'a Report>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl<'a> BatchLine<'a> {
    pub fn new(input: String, result: &'a Result<Report, FrameforgeError>) -> Self {
        match result {
            Ok(report) => Self {
                input,
                report: Some(report),
                error: None,
            },
            Err(e) => Self {
                input,
                report: None,
                error: Some(e.payload()),
            },
        }
    }
}
