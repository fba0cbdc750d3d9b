//! Analyze a single video.

use std::path::PathBuf;
use std::process::ExitCode;

use frameforge_common::config::AppConfig;
use frameforge_common::CancelToken;
use frameforge_engine::AnalysisPool;

use crate::output::print_error;

pub async fn run(path: PathBuf, config: AppConfig, pretty: bool) -> anyhow::Result<ExitCode> {
    let pool = AnalysisPool::new(config);
    let cancel = CancelToken::new();

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling analysis");
                cancel.cancel("interrupted");
            }
        })
    };

    let result = pool.analyze(&path, cancel).await;
    interrupt.abort();

    match result {
        Ok(report) => {
            let json = if pretty {
                report.to_json_pretty()?
            } else {
                report.to_json()?
            };
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            print_error(&e);
            Ok(ExitCode::FAILURE)
        }
    }
}
