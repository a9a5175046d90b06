//! Expired export cleanup background job.

use std::sync::Arc;
use std::time::Duration;

use crate::services::ExportSweeper;

use super::scheduler::Job;

/// Runs the export sweeper on a fixed interval.
pub struct ExportCleanupJob {
    sweeper: Arc<ExportSweeper>,
    interval: Duration,
}

impl ExportCleanupJob {
    pub fn new(sweeper: Arc<ExportSweeper>, interval: Duration) -> Self {
        Self { sweeper, interval }
    }
}

#[async_trait::async_trait]
impl Job for ExportCleanupJob {
    fn name(&self) -> &'static str {
        "export_cleanup"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self) -> Result<(), String> {
        let report = self
            .sweeper
            .sweep()
            .await
            .map_err(|e| format!("Failed to sweep expired exports: {}", e))?;

        if report.file_errors > 0 {
            return Err(format!(
                "{} export files could not be deleted",
                report.file_errors
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::models::{ExportFilters, ExportFormat, ExportJob};
    use domain::services::{CompletedArtifact, ExportRecordStore, InMemoryExportRecordStore};

    #[tokio::test]
    async fn test_execute_sweeps_expired_exports() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryExportRecordStore::new());
        let job = ExportJob::new("u1", ExportFilters::new(), ExportFormat::Csv);
        store
            .mark_completed(
                &job,
                &CompletedArtifact {
                    artifact_path: "/nonexistent/export.csv".to_string(),
                    download_token: shared::crypto::generate_download_token(),
                    expires_at: Utc::now() - chrono::Duration::seconds(5),
                },
            )
            .await
            .unwrap();

        let cleanup = ExportCleanupJob::new(
            Arc::new(ExportSweeper::new(
                store.clone(),
                dir.path(),
                chrono::Duration::hours(1),
            )),
            Duration::from_secs(3600),
        );
        assert_eq!(cleanup.name(), "export_cleanup");
        assert_eq!(cleanup.interval(), Duration::from_secs(3600));

        cleanup.execute().await.unwrap();
        assert!(store.is_empty());
    }
}
