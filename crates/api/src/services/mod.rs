//! Export pipeline services.

pub mod artifact;
pub mod components;
pub mod export;
pub mod export_processor;
pub mod export_sweeper;
pub mod pdf;
pub mod rate_limit;

pub use artifact::{ArtifactError, ArtifactGenerator, GeneratedArtifact};
pub use components::{ComponentsError, ExportComponents};
pub use export::{download_url, DownloadArtifact, ExportError, ExportService};
pub use export_processor::{ExportProcessor, ProcessingError};
pub use export_sweeper::{ExportSweeper, SweepReport};
pub use rate_limit::SubmitRateLimiter;
