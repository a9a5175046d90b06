//! Data source contract for export snapshots.

use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{PropertyFilter, PropertyRecord};

/// Data source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Data source unavailable: {0}")]
    Unavailable(String),
}

/// Read-only source of the records an export contains.
///
/// Records are read in pages ordered by id; `after` is the last id of the
/// previous page.
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_page(
        &self,
        filter: &PropertyFilter,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<PropertyRecord>, SourceError>;
}

/// Record source backed by a vector, for tests and the memory backend.
#[derive(Debug, Default)]
pub struct InMemoryRecordSource {
    records: RwLock<Vec<PropertyRecord>>,
    /// Whether to simulate an unreachable source.
    pub simulate_failure: bool,
}

impl InMemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source pre-loaded with records.
    pub fn with_records(mut records: Vec<PropertyRecord>) -> Self {
        records.sort_by_key(|r| r.id);
        Self {
            records: RwLock::new(records),
            simulate_failure: false,
        }
    }

    /// Create a source whose every read fails.
    pub fn failing() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            simulate_failure: true,
        }
    }

    pub async fn insert(&self, record: PropertyRecord) {
        let mut records = self.records.write().await;
        let position = records
            .binary_search_by_key(&record.id, |r| r.id)
            .unwrap_or_else(|p| p);
        records.insert(position, record);
    }
}

#[async_trait::async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn fetch_page(
        &self,
        filter: &PropertyFilter,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<PropertyRecord>, SourceError> {
        if self.simulate_failure {
            tracing::warn!("In-memory record source simulating failure");
            return Err(SourceError::Unavailable("Simulated failure".to_string()));
        }

        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| after.map(|a| r.id > a).unwrap_or(true))
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }
}
