//! Show source metadata without analyzing.

use std::path::PathBuf;
use std::process::ExitCode;

use serde::Serialize;

use frameforge_common::config::AppConfig;
use frameforge_frame_source::{probe_metadata, SourceMetadata};

use crate::output::print_error;

#[derive(Debug, Serialize)]
struct SourceInfo {
    path: String,

    #[serde(flatten)]
    metadata: SourceMetadata,

    /// Stride an analysis with the current config would use.
    sample_stride: u32,
}

pub fn run(path: PathBuf, config: &AppConfig) -> anyhow::Result<ExitCode> {
    let metadata = match probe_metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) => {
            print_error(&e);
            return Ok(ExitCode::FAILURE);
        }
    };

    let info = SourceInfo {
        path: path.display().to_string(),
        sample_stride: config.analysis.sampling.stride_for(metadata.total_frames),
        metadata,
    };
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(ExitCode::SUCCESS)
}
