use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use bulk_export_api::app;
use bulk_export_api::config::Config;
use bulk_export_api::jobs::{ExportCleanupJob, ExportWorkerPool, JobScheduler, RateLimitPruneJob};
use bulk_export_api::middleware;
use bulk_export_api::services::{
    ArtifactGenerator, ExportComponents, ExportProcessor, ExportService, ExportSweeper,
};

/// How long in-flight exports may run after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    middleware::logging::init_logging(&config.logging)?;
    middleware::init_metrics()?;

    info!(
        backend = ?config.export.backend,
        "Starting bulk export service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let components = ExportComponents::from_config(&config).await?;

    tokio::fs::create_dir_all(&config.export.exports_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create exports directory {}",
                config.export.exports_dir.display()
            )
        })?;

    let processor = Arc::new(ExportProcessor::new(
        components.store.clone(),
        components.source.clone(),
        ArtifactGenerator::new(&config.export.exports_dir, config.export.page_size),
        config.export.download_ttl(),
    ));
    let mut workers = ExportWorkerPool::new(
        components.queue.clone(),
        processor,
        config.export.workers,
        config.export.max_delivery_attempts,
    );
    workers.start();

    let exports = Arc::new(
        ExportService::new(components.queue, components.store.clone())
            .with_rate_limit(config.export.submit_rate_limit_per_hour),
    );

    let cleanup_interval = Duration::from_secs(config.export.cleanup_interval_secs);
    let mut scheduler = JobScheduler::new();
    scheduler.register(ExportCleanupJob::new(
        Arc::new(ExportSweeper::new(
            components.store,
            &config.export.exports_dir,
            config.export.download_ttl(),
        )),
        cleanup_interval,
    ));
    if let Some(limiter) = exports.rate_limiter() {
        scheduler.register(RateLimitPruneJob::new(limiter, cleanup_interval));
    }
    scheduler.start();

    let addr = config.socket_addr()?;
    let app = app::create_app(config, exports);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining background work");
    workers.shutdown();
    scheduler.shutdown();
    tokio::join!(
        workers.wait_for_shutdown(SHUTDOWN_TIMEOUT),
        scheduler.wait_for_shutdown(SHUTDOWN_TIMEOUT),
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
