//! Processing of a single export job.
//!
//! One attempt upserts the record to `pending`, renders the artifact and then
//! issues the download token in one atomic `completed` write. Any data source
//! or rendering failure ends in a `failed` record instead of an error. Only
//! store failures are returned, so the caller can leave the delivery
//! unacknowledged and let the queue redeliver it.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use domain::models::{ExportJob, ExportRecord};
use domain::services::{
    CompletedArtifact, ExportRecordStore, RecordSource, SourceError, StoreError,
};
use shared::crypto::generate_download_token;
use thiserror::Error;
use tracing::{error, info, warn};

use super::artifact::{ArtifactError, ArtifactGenerator};
use crate::middleware::metrics::{record_export_completed, record_export_failed};

/// Token collisions tolerated before the attempt gives up.
const TOKEN_ISSUE_ATTEMPTS: usize = 3;

/// Failures inside one processing attempt.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Data source error: {0}")]
    Source(#[from] SourceError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Runs export jobs against a record store and a data source.
pub struct ExportProcessor {
    store: Arc<dyn ExportRecordStore>,
    source: Arc<dyn RecordSource>,
    generator: ArtifactGenerator,
    download_ttl: chrono::Duration,
}

impl ExportProcessor {
    pub fn new(
        store: Arc<dyn ExportRecordStore>,
        source: Arc<dyn RecordSource>,
        generator: ArtifactGenerator,
        download_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            source,
            generator,
            download_ttl,
        }
    }

    /// Process one delivery of `job`.
    ///
    /// Returns the terminal record, `completed` or `failed`. An `Err` means the
    /// outcome could not be recorded and the job should be redelivered.
    pub async fn process(&self, job: &ExportJob) -> Result<ExportRecord, StoreError> {
        let start = Instant::now();
        self.store.mark_pending(job).await?;

        match self.generator.generate(job, self.source.as_ref()).await {
            Ok(artifact) => {
                let record = self
                    .complete(job, &artifact.path.to_string_lossy())
                    .await?;
                record_export_completed(job.format, start.elapsed());
                info!(
                    job_id = %job.job_id,
                    format = %job.format,
                    records = artifact.records,
                    bytes = artifact.bytes,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Export completed"
                );
                Ok(record)
            }
            Err(ProcessingError::Store(e)) => Err(e),
            Err(e) => {
                warn!(
                    job_id = %job.job_id,
                    format = %job.format,
                    error = %e,
                    "Export failed"
                );
                let record = self.store.mark_failed(job, &e.to_string()).await?;
                record_export_failed(job.format, start.elapsed());
                Ok(record)
            }
        }
    }

    /// Record `job` as failed without processing it.
    pub async fn fail(&self, job: &ExportJob, reason: &str) -> Result<ExportRecord, StoreError> {
        error!(job_id = %job.job_id, reason = reason, "Export abandoned");
        let record = self.store.mark_failed(job, reason).await?;
        record_export_failed(job.format, std::time::Duration::ZERO);
        Ok(record)
    }

    async fn complete(&self, job: &ExportJob, artifact_path: &str) -> Result<ExportRecord, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let artifact = CompletedArtifact {
                artifact_path: artifact_path.to_string(),
                download_token: generate_download_token(),
                expires_at: Utc::now() + self.download_ttl,
            };

            match self.store.mark_completed(job, &artifact).await {
                Err(StoreError::Conflict(msg)) if attempt < TOKEN_ISSUE_ATTEMPTS => {
                    warn!(job_id = %job.job_id, attempt = attempt, error = %msg, "Download token collision");
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{ExportFilters, ExportFormat, ExportStatus, PropertyRecord};
    use domain::services::{InMemoryExportRecordStore, InMemoryRecordSource};
    use fake::faker::address::en::{CityName, StreetName};
    use fake::Fake;
    use uuid::Uuid;

    fn property() -> PropertyRecord {
        PropertyRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            street: StreetName().fake(),
            city: CityName().fake(),
            state: "WA".to_string(),
            zip_code: "98101".to_string(),
            country: "USA".to_string(),
            purchase_price: 500_000.0,
            current_value: Some(550_000.0),
            status: "Owned".to_string(),
            property_type: None,
        }
    }

    fn processor(
        dir: &std::path::Path,
        source: InMemoryRecordSource,
    ) -> (ExportProcessor, Arc<InMemoryExportRecordStore>) {
        let store = Arc::new(InMemoryExportRecordStore::new());
        let processor = ExportProcessor::new(
            store.clone(),
            Arc::new(source),
            ArtifactGenerator::new(dir, 100),
            chrono::Duration::hours(1),
        );
        (processor, store)
    }

    #[tokio::test]
    async fn test_successful_export_issues_token() {
        let dir = tempfile::tempdir().unwrap();
        let source = InMemoryRecordSource::with_records(vec![property(), property()]);
        let (processor, store) = processor(dir.path(), source);
        let job = ExportJob::new("u1", ExportFilters::new(), ExportFormat::Csv);

        let before = Utc::now();
        let record = processor.process(&job).await.unwrap();
        assert_eq!(record.status, ExportStatus::Completed);

        let token = record.download_token.clone().unwrap();
        assert!(shared::crypto::is_well_formed_token(&token));
        let expires_at = record.expires_at.unwrap();
        assert!(expires_at >= before + chrono::Duration::hours(1));

        let path = record.artifact_path.clone().unwrap();
        assert!(std::path::Path::new(&path).exists());

        let stored = store.find_by_token(&token).await.unwrap().unwrap();
        assert_eq!(stored.job_id, job.job_id);
    }

    #[tokio::test]
    async fn test_source_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, store) = processor(dir.path(), InMemoryRecordSource::failing());
        let job = ExportJob::new("u1", ExportFilters::new(), ExportFormat::Pdf);

        let record = processor.process(&job).await.unwrap();
        assert_eq!(record.status, ExportStatus::Failed);
        assert!(record.download_token.is_none());
        assert!(record.error_message.is_some());

        let stored = store.find_by_job_id(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExportStatus::Failed);
    }

    #[tokio::test]
    async fn test_unsupported_filter_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, _store) = processor(dir.path(), InMemoryRecordSource::new());
        let job = ExportJob::new(
            "u1",
            ExportFilters::new().with("bedrooms", "4"),
            ExportFormat::Csv,
        );

        let record = processor.process(&job).await.unwrap();
        assert_eq!(record.status, ExportStatus::Failed);
        assert!(record.error_message.unwrap().contains("bedrooms"));
    }

    #[tokio::test]
    async fn test_reprocessing_keeps_one_record_with_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, store) = processor(dir.path(), InMemoryRecordSource::new());
        let job = ExportJob::new("u1", ExportFilters::new(), ExportFormat::Csv);

        let first = processor.process(&job).await.unwrap();
        let second = processor.process(&job).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_ne!(first.download_token, second.download_token);
        let stored = store.find_by_job_id(&job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.download_token, second.download_token);

        let old_token = first.download_token.unwrap();
        assert!(store.find_by_token(&old_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_records_reason() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, _store) = processor(dir.path(), InMemoryRecordSource::new());
        let job = ExportJob::new("u1", ExportFilters::new(), ExportFormat::Csv);

        let record = processor.fail(&job, "gave up").await.unwrap();
        assert_eq!(record.status, ExportStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("gave up"));
    }
}
