//! Analyze several videos through the run pool.

use std::path::PathBuf;
use std::process::ExitCode;

use frameforge_common::config::AppConfig;
use frameforge_engine::AnalysisPool;

use crate::output::BatchLine;

pub async fn run(paths: Vec<PathBuf>, config: AppConfig) -> anyhow::Result<ExitCode> {
    let pool = AnalysisPool::new(config);
    tracing::info!(
        videos = paths.len(),
        parallel = pool.capacity(),
        "Starting batch analysis"
    );

    let results = pool.analyze_all(paths).await;

    let mut failed = 0usize;
    for (path, result) in &results {
        if result.is_err() {
            failed += 1;
        }
        let line = BatchLine::new(path.display().to_string(), result);
        println!("{}", serde_json::to_string(&line)?);
    }

    tracing::info!(
        videos = results.len(),
        failed,
        "Batch analysis finished"
    );
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
