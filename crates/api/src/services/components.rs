//! Wiring of the queue, record store and data source for a backend.

use std::sync::Arc;

use domain::services::{
    ExportRecordStore, InMemoryExportRecordStore, InMemoryJobQueue, InMemoryRecordSource,
    JobQueue, RecordSource,
};
use persistence::repositories::{ExportRecordRepository, PgJobQueue, PropertyRepository};
use sqlx::migrate::MigrateError;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ExportBackend, ExportConfig};

#[derive(Debug, Error)]
pub enum ComponentsError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrateError),
}

/// The three collaborators shared by the HTTP surface, workers and sweeper.
#[derive(Clone)]
pub struct ExportComponents {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn ExportRecordStore>,
    pub source: Arc<dyn RecordSource>,
}

impl ExportComponents {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ExportRecordStore>,
        source: Arc<dyn RecordSource>,
    ) -> Self {
        Self {
            queue,
            store,
            source,
        }
    }

    /// Build the components for the configured backend, connecting to and
    /// migrating the database when it is PostgreSQL.
    pub async fn from_config(config: &Config) -> Result<Self, ComponentsError> {
        match config.export.backend {
            ExportBackend::Memory => {
                info!("Using in-memory export backend");
                Ok(Self::in_memory(&config.export))
            }
            ExportBackend::Postgres => {
                let db_config = persistence::db::DatabaseConfig::from(&config.database);
                let pool = persistence::db::create_pool(&db_config).await?;
                info!("Running database migrations...");
                persistence::db::run_migrations(&pool).await?;
                info!("Migrations completed");
                Ok(Self::postgres(pool, &config.export))
            }
        }
    }

    /// Process-local components. Nothing survives a restart.
    pub fn in_memory(config: &ExportConfig) -> Self {
        Self::new(
            Arc::new(InMemoryJobQueue::new(config.visibility_timeout())),
            Arc::new(InMemoryExportRecordStore::new()),
            Arc::new(InMemoryRecordSource::new()),
        )
    }

    pub fn postgres(pool: PgPool, config: &ExportConfig) -> Self {
        Self::new(
            Arc::new(PgJobQueue::new(
                pool.clone(),
                config.visibility_timeout(),
                config.queue_poll_interval(),
            )),
            Arc::new(ExportRecordRepository::new(pool.clone())),
            Arc::new(PropertyRepository::new(pool)),
        )
    }
}
