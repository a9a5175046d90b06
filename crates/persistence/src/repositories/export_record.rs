//! Export record repository for database operations.

use chrono::{DateTime, Utc};
use domain::models::{ExportJob, ExportRecord, ExportStatus};
use domain::services::{CompletedArtifact, ExportRecordStore, StoreError};
use sqlx::PgPool;

use crate::entities::ExportRecordEntity;
use crate::metrics::QueryTimer;

const RECORD_COLUMNS: &str = "job_id, requester_id, format, status, artifact_path, \
     download_token, expires_at, error_message, created_at, updated_at, completed_at";

/// PostgreSQL-backed export record store.
///
/// Every state change is a single `INSERT .. ON CONFLICT (job_id) DO UPDATE`,
/// so a redelivered job overwrites its record instead of adding one.
#[derive(Clone)]
pub struct ExportRecordRepository {
    pool: PgPool,
}

impl ExportRecordRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert(
        &self,
        query_name: &'static str,
        job: &ExportJob,
        status: ExportStatus,
        artifact: Option<&CompletedArtifact>,
        error_message: Option<&str>,
    ) -> Result<ExportRecord, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO export_records (
                job_id, requester_id, format, status, artifact_path,
                download_token, expires_at, error_message, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, CASE WHEN $4 = 'completed' THEN NOW() END)
            ON CONFLICT (job_id) DO UPDATE SET
                requester_id = EXCLUDED.requester_id,
                format = EXCLUDED.format,
                status = EXCLUDED.status,
                artifact_path = EXCLUDED.artifact_path,
                download_token = EXCLUDED.download_token,
                expires_at = EXCLUDED.expires_at,
                error_message = EXCLUDED.error_message,
                completed_at = EXCLUDED.completed_at,
                updated_at = NOW()
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let timer = QueryTimer::new(query_name);
        let result = sqlx::query_as::<_, ExportRecordEntity>(&sql)
            .bind(&job.job_id)
            .bind(&job.requester_id)
            .bind(job.format.as_str())
            .bind(status.to_string())
            .bind(artifact.map(|a| a.artifact_path.as_str()))
            .bind(artifact.map(|a| a.download_token.as_str()))
            .bind(artifact.map(|a| a.expires_at))
            .bind(error_message)
            .fetch_one(&self.pool)
            .await;

        timer.finish(result).map_err(map_sqlx_error)?.try_into()
    }
}

/// Map a database error onto the store error taxonomy.
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    tracing::error!(error = %err, "Export record query failed");
    StoreError::Unavailable(err.to_string())
}

#[async_trait::async_trait]
impl ExportRecordStore for ExportRecordRepository {
    async fn mark_pending(&self, job: &ExportJob) -> Result<ExportRecord, StoreError> {
        self.upsert("export_records_mark_pending", job, ExportStatus::Pending, None, None)
            .await
    }

    async fn mark_completed(
        &self,
        job: &ExportJob,
        artifact: &CompletedArtifact,
    ) -> Result<ExportRecord, StoreError> {
        self.upsert(
            "export_records_mark_completed",
            job,
            ExportStatus::Completed,
            Some(artifact),
            None,
        )
        .await
    }

    async fn mark_failed(
        &self,
        job: &ExportJob,
        error: &str,
    ) -> Result<ExportRecord, StoreError> {
        self.upsert(
            "export_records_mark_failed",
            job,
            ExportStatus::Failed,
            None,
            Some(error),
        )
        .await
    }

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<ExportRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM export_records WHERE job_id = $1");

        let timer = QueryTimer::new("export_records_find_by_job_id");
        let result = sqlx::query_as::<_, ExportRecordEntity>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await;

        timer
            .finish(result)
            .map_err(map_sqlx_error)?
            .map(ExportRecord::try_from)
            .transpose()
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ExportRecord>, StoreError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM export_records WHERE download_token = $1");

        let timer = QueryTimer::new("export_records_find_by_token");
        let result = sqlx::query_as::<_, ExportRecordEntity>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await;

        timer
            .finish(result)
            .map_err(map_sqlx_error)?
            .map(ExportRecord::try_from)
            .transpose()
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExportRecord>, StoreError> {
        let sql = format!(
            r#"
            DELETE FROM export_records
            WHERE status = 'completed' AND expires_at <= $1
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let timer = QueryTimer::new("export_records_delete_expired");
        let result = sqlx::query_as::<_, ExportRecordEntity>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await;

        timer
            .finish(result)
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(ExportRecord::try_from)
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}
