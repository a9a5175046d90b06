//! One-shot sweep of expired exports, for running from an external scheduler.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::info;

use bulk_export_api::config::{Config, ExportBackend};
use bulk_export_api::middleware;
use bulk_export_api::services::{ExportComponents, ExportSweeper};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    middleware::logging::init_logging(&config.logging)?;

    if config.export.backend == ExportBackend::Memory {
        bail!("the memory backend lives inside the server process; nothing to sweep from here");
    }

    let components = ExportComponents::from_config(&config).await?;
    let report = ExportSweeper::new(
        Arc::clone(&components.store),
        &config.export.exports_dir,
        config.export.download_ttl(),
    )
    .sweep()
    .await?;

    info!(
        records_deleted = report.records_deleted,
        files_deleted = report.files_deleted,
        files_missing = report.files_missing,
        orphans_deleted = report.orphans_deleted,
        file_errors = report.file_errors,
        "Sweep finished"
    );

    if report.file_errors > 0 {
        bail!("{} export files could not be deleted", report.file_errors);
    }

    Ok(())
}
