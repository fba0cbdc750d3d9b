//! Bounded parallel execution of analysis runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use frameforge_common::config::AppConfig;
use frameforge_common::error::{FrameforgeError, FrameforgeResult, Stage};
use frameforge_common::CancelToken;
use frameforge_report_model::Report;

use crate::session::analyze_video;

/// Runs analyses on the blocking thread pool, at most `capacity` at a time.
/// Runs share nothing but the configuration.
#[derive(Debug, Clone)]
pub struct AnalysisPool {
    config: Arc<AppConfig>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AnalysisPool {
    /// Pool sized by `pipeline.max_concurrent_runs`, else the core count.
    pub fn new(config: AppConfig) -> Self {
        let capacity = config
            .pipeline
            .max_concurrent_runs
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1);

        Self {
            config: Arc::new(config),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Analyze one video once a slot is free. `pipeline.timeout_secs`
    /// trips `cancel` when it elapses.
    pub async fn analyze(&self, path: &Path, cancel: CancelToken) -> FrameforgeResult<Report> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| FrameforgeError::internal(Stage::Engine, e.to_string(), None))?;

        let timer = self.config.pipeline.timeout_secs.map(|secs| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
                tracing::warn!("Run exceeded timeout of {secs}s, cancelling");
                cancel.cancel(format!("timeout after {secs}s"));
            })
        });

        let config = self.config.clone();
        let owned_path = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            analyze_video(&owned_path, &config, &cancel)
        })
        .await;

        if let Some(timer) = timer {
            timer.abort();
        }

        result.map_err(|e| {
            FrameforgeError::internal(Stage::Engine, format!("Analysis task failed: {e}"), None)
        })?
    }

    /// Analyze every path, in parallel up to the pool capacity. Results come
    /// back in input order.
    pub async fn analyze_all(
        &self,
        paths: Vec<PathBuf>,
    ) -> Vec<(PathBuf, FrameforgeResult<Report>)> {
        let tasks: Vec<_> = paths
            .into_iter()
            .map(|path| {
                let pool = self.clone();
                let task_path = path.clone();
                let handle =
                    tokio::spawn(async move { pool.analyze(&task_path, CancelToken::new()).await });
                (path, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (path, handle) in tasks {
            let result = handle.await.unwrap_or_else(|e| {
                Err(FrameforgeError::internal(
                    Stage::Engine,
                    format!("Analysis task failed: {e}"),
                    None,
                ))
            });
            results.push((path, result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_defaults_to_cores() {
        let pool = AnalysisPool::new(AppConfig::default());
        assert!(pool.capacity() >= 1);

        let mut config = AppConfig::default();
        config.pipeline.max_concurrent_runs = Some(3);
        assert_eq!(AnalysisPool::new(config).capacity(), 3);
    }

    #[tokio::test]
    async fn test_missing_file_is_reported_per_input() {
        let pool = AnalysisPool::new(AppConfig::default());
        let results = pool
            .analyze_all(vec![
                PathBuf::from("/nonexistent/a.mp4"),
                PathBuf::from("/nonexistent/b.mp4"),
            ])
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, PathBuf::from("/nonexistent/a.mp4"));
        assert_eq!(results[1].0, PathBuf::from("/nonexistent/b.mp4"));
        assert!(results
            .iter()
            .all(|(_, r)| matches!(r, Err(FrameforgeError::FileNotFound { .. }))));
    }
}
