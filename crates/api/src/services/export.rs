//! Export submission, status and download.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use domain::models::{
    ExportFilters, ExportJob, ExportStatusResponse, SubmitExportRequest, SubmitExportResponse,
};
use domain::services::{ExportRecordStore, JobQueue, QueueError, StoreError};
use shared::crypto::is_well_formed_token;
use thiserror::Error;
use tokio::fs::File;
use tracing::{info, warn};
use validator::Validate;

use super::rate_limit::SubmitRateLimiter;
use crate::middleware::metrics::record_export_submitted;

pub const SUBMITTED_MESSAGE: &str = "Export job enqueued";
pub const JOB_NOT_FOUND: &str = "Export job not found";
pub const DOWNLOAD_NOT_FOUND: &str = "Invalid or expired download link";

const DOWNLOAD_PATH: &str = "/api/v1/export/download";

/// Export service errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An artifact opened for streaming.
#[derive(Debug)]
pub struct DownloadArtifact {
    pub file: File,
    pub len: u64,
    pub file_name: String,
    pub content_type: &'static str,
}

/// Download reference for a token.
pub fn download_url(token: &str) -> String {
    format!("{}/{}", DOWNLOAD_PATH, token)
}

/// Front door of the pipeline: enqueues jobs and serves their results.
pub struct ExportService {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ExportRecordStore>,
    rate_limiter: Option<Arc<SubmitRateLimiter>>,
}

impl ExportService {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ExportRecordStore>) -> Self {
        Self {
            queue,
            store,
            rate_limiter: None,
        }
    }

    /// Limit submissions per requester; 0 disables the limit.
    pub fn with_rate_limit(mut self, per_hour: u32) -> Self {
        self.rate_limiter = SubmitRateLimiter::per_hour(per_hour).map(Arc::new);
        self
    }

    /// The submission limiter, if one is configured.
    pub fn rate_limiter(&self) -> Option<Arc<SubmitRateLimiter>> {
        self.rate_limiter.clone()
    }

    /// Validate and enqueue an export. Never touches the record store.
    pub async fn submit(
        &self,
        request: SubmitExportRequest,
    ) -> Result<SubmitExportResponse, ExportError> {
        request
            .validate()
            .map_err(|e| ExportError::Validation(e.to_string()))?;
        let filters = ExportFilters::from_value(request.filters).map_err(ExportError::Validation)?;
        let format = request.format.unwrap_or_default();

        if let Some(limiter) = &self.rate_limiter {
            limiter
                .check(&request.requester_id)
                .map_err(|retry_after_secs| ExportError::RateLimited { retry_after_secs })?;
        }

        let job = ExportJob::new(request.requester_id, filters, format);
        let job_id = self.queue.enqueue(job).await?;

        record_export_submitted(format);
        info!(job_id = %job_id, format = %format, "Export job enqueued");

        Ok(SubmitExportResponse {
            job_id,
            message: SUBMITTED_MESSAGE.to_string(),
        })
    }

    /// Current status of a job. The download URL is only exposed while the
    /// record is completed and unexpired at `now`.
    pub async fn status_at(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ExportStatusResponse, ExportError> {
        let record = self
            .store
            .find_by_job_id(job_id)
            .await?
            .ok_or_else(|| ExportError::NotFound(JOB_NOT_FOUND.to_string()))?;

        Ok(ExportStatusResponse {
            status: record.status,
            download_url: record.live_token_at(now).map(download_url),
        })
    }

    pub async fn status(&self, job_id: &str) -> Result<ExportStatusResponse, ExportError> {
        self.status_at(job_id, Utc::now()).await
    }

    /// Open the artifact a token grants access to.
    ///
    /// Unknown, malformed and expired tokens and missing files are all
    /// reported as the same "not found".
    pub async fn open_download_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<DownloadArtifact, ExportError> {
        let not_found = || ExportError::NotFound(DOWNLOAD_NOT_FOUND.to_string());

        if !is_well_formed_token(token) {
            return Err(not_found());
        }

        let record = self.store.find_by_token(token).await?.ok_or_else(not_found)?;
        if record.live_token_at(now) != Some(token) {
            return Err(not_found());
        }
        let path = record.artifact_path.as_deref().map(PathBuf::from).ok_or_else(not_found)?;

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(job_id = %record.job_id, "Artifact missing for completed export");
                return Err(not_found());
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();

        Ok(DownloadArtifact {
            file,
            len,
            file_name: format!("export_{}.{}", record.job_id, record.format.extension()),
            content_type: record.format.content_type(),
        })
    }

    pub async fn open_download(&self, token: &str) -> Result<DownloadArtifact, ExportError> {
        self.open_download_at(token, Utc::now()).await
    }

    /// Readiness of the record store.
    pub async fn ping(&self) -> Result<(), ExportError> {
        Ok(self.store.ping().await?)
    }
}
