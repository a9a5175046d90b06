//! Durable export job queue on PostgreSQL.
//!
//! Jobs are rows of `export_queue`. A consumer claims the oldest visible row
//! with `FOR UPDATE SKIP LOCKED`, which stamps a fresh lease and hides the row
//! for the visibility timeout. Acknowledging deletes the row; a row whose lease
//! runs out becomes visible again and is redelivered with a higher attempt
//! count. A consumer still working on a job renews its lease by pushing
//! `visible_at` forward again. Idle consumers wait on `LISTEN export_queue`,
//! falling back to polling.

use std::time::Duration;

use domain::models::ExportJob;
use domain::services::{Delivery, JobQueue, QueueError};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::entities::QueuedExportEntity;
use crate::metrics::QueryTimer;

/// Notification channel signalled on every enqueue.
pub const QUEUE_CHANNEL: &str = "export_queue";

/// PostgreSQL-backed job queue with at-least-once delivery.
pub struct PgJobQueue {
    pool: PgPool,
    visibility_timeout: Duration,
    poll_interval: Duration,
    listener: Mutex<Option<PgListener>>,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, visibility_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
            poll_interval,
            listener: Mutex::new(None),
        }
    }

    /// Claim the oldest visible job, if any.
    async fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        let timer = QueryTimer::new("export_queue_claim");
        let result = sqlx::query_as::<_, QueuedExportEntity>(
            r#"
            UPDATE export_queue
            SET attempts = attempts + 1,
                lease_id = $1,
                visible_at = NOW() + make_interval(secs => $2)
            WHERE job_id = (
                SELECT job_id FROM export_queue
                WHERE visible_at <= NOW()
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING job_id, payload, attempts, lease_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await;

        let Some(entity) = timer.finish(result).map_err(unavailable)? else {
            return Ok(None);
        };

        match serde_json::from_value::<ExportJob>(entity.payload) {
            Ok(job) => Ok(Some(Delivery {
                job,
                attempt: u32::try_from(entity.attempts).unwrap_or(u32::MAX),
                receipt: entity.lease_id,
            })),
            Err(e) => {
                // An undecodable row would be claimed forever; drop it.
                tracing::error!(
                    job_id = %entity.job_id,
                    error = %e,
                    "Discarding malformed export queue message"
                );
                sqlx::query("DELETE FROM export_queue WHERE job_id = $1 AND lease_id = $2")
                    .bind(&entity.job_id)
                    .bind(entity.lease_id)
                    .execute(&self.pool)
                    .await
                    .map_err(unavailable)?;
                Err(QueueError::Malformed(format!(
                    "job {}: {}",
                    entity.job_id, e
                )))
            }
        }
    }

    /// Wait for an enqueue notification or the poll interval, whichever comes first.
    async fn wait_for_work(&self) {
        let mut guard = self.listener.lock().await;

        if guard.is_none() {
            match PgListener::connect_with(&self.pool).await {
                Ok(mut listener) => match listener.listen(QUEUE_CHANNEL).await {
                    Ok(()) => *guard = Some(listener),
                    Err(e) => tracing::warn!(error = %e, "Failed to LISTEN on export queue"),
                },
                Err(e) => tracing::warn!(error = %e, "Failed to open export queue listener"),
            }
        }

        let reconnect = match guard.as_mut() {
            Some(listener) => {
                match tokio::time::timeout(self.poll_interval, listener.recv()).await {
                    Ok(Ok(_)) | Err(_) => false,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Export queue listener failed, reconnecting");
                        true
                    }
                }
            }
            None => {
                drop(guard);
                tokio::time::sleep(self.poll_interval).await;
                return;
            }
        };

        if reconnect {
            *guard = None;
        }
    }
}

fn unavailable(err: sqlx::Error) -> QueueError {
    tracing::error!(error = %err, "Export queue query failed");
    QueueError::Unavailable(err.to_string())
}

#[async_trait::async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: ExportJob) -> Result<String, QueueError> {
        let payload =
            serde_json::to_value(&job).map_err(|e| QueueError::Malformed(e.to_string()))?;

        let timer = QueryTimer::new("export_queue_enqueue");
        let result = async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO export_queue (job_id, payload, enqueued_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (job_id) DO NOTHING
                "#,
            )
            .bind(&job.job_id)
            .bind(&payload)
            .bind(job.enqueued_at)
            .execute(&mut *tx)
            .await?;

            // Delivered to listeners on commit.
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(QUEUE_CHANNEL)
                .bind(&job.job_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        }
        .await;

        timer.finish(result).map_err(unavailable)?;
        Ok(job.job_id)
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        loop {
            if let Some(delivery) = self.try_claim().await? {
                return Ok(delivery);
            }
            self.wait_for_work().await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let timer = QueryTimer::new("export_queue_ack");
        let result = sqlx::query("DELETE FROM export_queue WHERE job_id = $1 AND lease_id = $2")
            .bind(&delivery.job.job_id)
            .bind(delivery.receipt)
            .execute(&self.pool)
            .await;

        Ok(timer.finish(result).map_err(unavailable)?.rows_affected() > 0)
    }

    async fn extend(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let timer = QueryTimer::new("export_queue_extend");
        let result = sqlx::query(
            r#"
            UPDATE export_queue
            SET visible_at = NOW() + make_interval(secs => $3)
            WHERE job_id = $1 AND lease_id = $2
            "#,
        )
        .bind(&delivery.job.job_id)
        .bind(delivery.receipt)
        .bind(self.visibility_timeout.as_secs_f64())
        .execute(&self.pool)
        .await;

        Ok(timer.finish(result).map_err(unavailable)?.rows_affected() > 0)
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }
}
