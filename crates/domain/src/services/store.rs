//! Export record store contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ExportJob, ExportRecord, ExportStatus};

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Everything a completed record needs, written together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedArtifact {
    pub artifact_path: String,
    pub download_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Persisted lifecycle state of export jobs.
///
/// Every mutation is a single atomic per-record operation keyed by job
/// identifier, so redelivered attempts update rather than duplicate a record.
#[async_trait::async_trait]
pub trait ExportRecordStore: Send + Sync {
    /// Upsert the record to `pending`, clearing artifact, token and expiry.
    async fn mark_pending(&self, job: &ExportJob) -> Result<ExportRecord, StoreError>;

    /// Upsert the record to `completed` with artifact, token and expiry set together.
    async fn mark_completed(
        &self,
        job: &ExportJob,
        artifact: &CompletedArtifact,
    ) -> Result<ExportRecord, StoreError>;

    /// Upsert the record to `failed`, clearing artifact, token and expiry.
    async fn mark_failed(&self, job: &ExportJob, error: &str)
        -> Result<ExportRecord, StoreError>;

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<ExportRecord>, StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<ExportRecord>, StoreError>;

    /// Delete every completed record whose expiry is at or before `now`,
    /// returning the deleted records.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExportRecord>, StoreError>;

    /// Connectivity check used by the readiness endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct StoreState {
    records: HashMap<String, ExportRecord>,
    /// download token -> job id
    tokens: HashMap<String, String>,
}

impl StoreState {
    fn upsert(
        &mut self,
        job: &ExportJob,
        status: ExportStatus,
        artifact: Option<&CompletedArtifact>,
        error: Option<&str>,
    ) -> Result<ExportRecord, StoreError> {
        if let Some(artifact) = artifact {
            if let Some(owner) = self.tokens.get(&artifact.download_token) {
                if owner != &job.job_id {
                    return Err(StoreError::Conflict(
                        "download token already issued".to_string(),
                    ));
                }
            }
        }

        let now = Utc::now();
        let record = self
            .records
            .entry(job.job_id.clone())
            .or_insert_with(|| ExportRecord {
                job_id: job.job_id.clone(),
                requester_id: job.requester_id.clone(),
                format: job.format,
                status: ExportStatus::Pending,
                artifact_path: None,
                download_token: None,
                expires_at: None,
                error_message: None,
                created_at: now,
                updated_at: now,
                completed_at: None,
            });

        if let Some(old_token) = record.download_token.take() {
            self.tokens.remove(&old_token);
        }

        record.requester_id = job.requester_id.clone();
        record.format = job.format;
        record.status = status;
        record.artifact_path = artifact.map(|a| a.artifact_path.clone());
        record.download_token = artifact.map(|a| a.download_token.clone());
        record.expires_at = artifact.map(|a| a.expires_at);
        record.error_message = error.map(str::to_string);
        record.updated_at = now;
        record.completed_at = artifact.map(|_| now);

        if let Some(token) = &record.download_token {
            self.tokens.insert(token.clone(), job.job_id.clone());
        }

        Ok(record.clone())
    }
}

/// Record store held in process memory.
#[derive(Default)]
pub struct InMemoryExportRecordStore {
    state: RwLock<StoreState>,
}

impl InMemoryExportRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl ExportRecordStore for InMemoryExportRecordStore {
    async fn mark_pending(&self, job: &ExportJob) -> Result<ExportRecord, StoreError> {
        self.write().upsert(job, ExportStatus::Pending, None, None)
    }

    async fn mark_completed(
        &self,
        job: &ExportJob,
        artifact: &CompletedArtifact,
    ) -> Result<ExportRecord, StoreError> {
        self.write()
            .upsert(job, ExportStatus::Completed, Some(artifact), None)
    }

    async fn mark_failed(
        &self,
        job: &ExportJob,
        error: &str,
    ) -> Result<ExportRecord, StoreError> {
        self.write()
            .upsert(job, ExportStatus::Failed, None, Some(error))
    }

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<ExportRecord>, StoreError> {
        Ok(self.read().records.get(job_id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ExportRecord>, StoreError> {
        let state = self.read();
        Ok(state
            .tokens
            .get(token)
            .and_then(|job_id| state.records.get(job_id))
            .cloned())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExportRecord>, StoreError> {
        let mut state = self.write();
        let expired: Vec<String> = state
            .records
            .values()
            .filter(|record| record.is_expired_at(now))
            .map(|record| record.job_id.clone())
            .collect();

        let mut deleted = Vec::with_capacity(expired.len());
        for job_id in expired {
            if let Some(record) = state.records.remove(&job_id) {
                if let Some(token) = &record.download_token {
                    state.tokens.remove(token);
                }
                deleted.push(record);
            }
        }
        Ok(deleted)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
