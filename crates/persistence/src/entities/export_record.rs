//! Export record entity.

use chrono::{DateTime, Utc};
use domain::models::ExportRecord;
use domain::services::StoreError;
use sqlx::FromRow;

/// Database entity for export records.
#[derive(Debug, Clone, FromRow)]
pub struct ExportRecordEntity {
    /// Job identifier (export_<random>), primary key.
    pub job_id: String,

    pub requester_id: String,

    /// Artifact format (csv or pdf).
    pub format: String,

    /// Lifecycle status (pending, completed or failed).
    pub status: String,

    /// Location of the artifact on disk; set only when completed.
    pub artifact_path: Option<String>,

    /// Hex download token; unique across records.
    pub download_token: Option<String>,

    pub expires_at: Option<DateTime<Utc>>,

    /// Reason for the last failure.
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExportRecordEntity> for ExportRecord {
    type Error = StoreError;

    fn try_from(entity: ExportRecordEntity) -> Result<Self, Self::Error> {
        let format = entity.format.parse().map_err(StoreError::Corrupt)?;
        let status = entity.status.parse().map_err(StoreError::Corrupt)?;

        Ok(ExportRecord {
            job_id: entity.job_id,
            requester_id: entity.requester_id,
            format,
            status,
            artifact_path: entity.artifact_path,
            download_token: entity.download_token,
            expires_at: entity.expires_at,
            error_message: entity.error_message,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
            completed_at: entity.completed_at,
        })
    }
}
