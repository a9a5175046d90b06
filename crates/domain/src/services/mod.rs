//! Collaborator contracts for the export pipeline.
//!
//! Each contract has a PostgreSQL implementation in the `persistence` crate and an
//! in-memory implementation here, used by tests and the `memory` backend.

pub mod queue;
pub mod source;
pub mod store;

pub use queue::{Delivery, InMemoryJobQueue, JobQueue, QueueError};
pub use source::{InMemoryRecordSource, RecordSource, SourceError};
pub use store::{CompletedArtifact, ExportRecordStore, InMemoryExportRecordStore, StoreError};
