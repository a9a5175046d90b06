//! Domain models for bulk exports.

pub mod export;
pub mod property;

pub use export::{
    ExportFilters, ExportFormat, ExportJob, ExportRecord, ExportStatus, ExportStatusResponse,
    SubmitExportRequest, SubmitExportResponse, ARTIFACT_FILE_PREFIX, DEFAULT_DOWNLOAD_TTL_SECS,
};
pub use property::{PropertyFilter, PropertyRecord};
