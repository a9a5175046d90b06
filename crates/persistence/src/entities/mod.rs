//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod export_record;
pub mod property;
pub mod queued_export;

pub use export_record::ExportRecordEntity;
pub use property::PropertyEntity;
pub use queued_export::QueuedExportEntity;
