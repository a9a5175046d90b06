//! Queued export job entity.

use sqlx::FromRow;
use uuid::Uuid;

/// A row of the export queue as returned by a claim.
#[derive(Debug, Clone, FromRow)]
pub struct QueuedExportEntity {
    pub job_id: String,

    /// Serialized `ExportJob` message, decoded by the queue after the claim.
    pub payload: serde_json::Value,

    /// Number of times the row has been claimed, including this claim.
    pub attempts: i32,

    /// Lease held by the current consumer.
    pub lease_id: Uuid,
}
