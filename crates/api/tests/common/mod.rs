//! Common test utilities for integration tests.
//!
//! HTTP tests run against the in-memory backend with a temporary exports
//! directory, so no external services are needed. The PostgreSQL helpers
//! connect to `TEST_DATABASE_URL` and return `None` when it is not set.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use bulk_export_api::{
    app::create_app,
    config::Config,
    services::{ArtifactGenerator, ExportProcessor, ExportService},
};
use domain::models::{ExportRecord, PropertyRecord};
use domain::services::{
    ExportRecordStore, InMemoryExportRecordStore, InMemoryJobQueue, InMemoryRecordSource, JobQueue,
};
use fake::faker::address::en::{CityName, StateAbbr, StreetName, ZipCode};
use fake::Fake;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

/// Application wired to in-memory collaborators the test can inspect.
pub struct TestHarness {
    pub app: Router,
    pub queue: Arc<InMemoryJobQueue>,
    pub store: Arc<InMemoryExportRecordStore>,
    pub source: Arc<InMemoryRecordSource>,
    pub processor: Arc<ExportProcessor>,
    pub exports_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(&[], chrono::Duration::hours(1))
    }

    /// Build a harness with config overrides and a custom download lifetime.
    pub fn with_options(overrides: &[(&str, &str)], download_ttl: chrono::Duration) -> Self {
        let config = Config::load_for_test(overrides).expect("Failed to load test config");
        let exports_dir = tempfile::tempdir().expect("Failed to create exports dir");

        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(300)));
        let store = Arc::new(InMemoryExportRecordStore::new());
        let source = Arc::new(InMemoryRecordSource::new());

        let processor = Arc::new(ExportProcessor::new(
            store.clone(),
            source.clone(),
            ArtifactGenerator::new(exports_dir.path(), config.export.page_size),
            download_ttl,
        ));
        let exports = Arc::new(
            ExportService::new(queue.clone(), store.clone())
                .with_rate_limit(config.export.submit_rate_limit_per_hour),
        );

        Self {
            app: create_app(config, exports),
            queue,
            store,
            source,
            processor,
            exports_dir,
        }
    }

    /// Process every queued job the way a worker would, returning how many ran.
    pub async fn run_queued_jobs(&self) -> usize {
        let mut processed = 0;
        while self.queue.ready_len() > 0 {
            let delivery = self.queue.dequeue().await.expect("dequeue failed");
            self.processor
                .process(&delivery.job)
                .await
                .expect("failed to record export outcome");
            self.queue.ack(&delivery).await.expect("ack failed");
            processed += 1;
        }
        processed
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn record_count(&self) -> usize {
        self.store.len()
    }

    pub async fn store_record(&self, job_id: &str) -> ExportRecord {
        self.store
            .find_by_job_id(job_id)
            .await
            .unwrap()
            .expect("export record missing")
    }

    pub async fn record_exists(&self, job_id: &str) -> bool {
        self.store.find_by_job_id(job_id).await.unwrap().is_some()
    }
}

/// Build a JSON request.
pub fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Parse response body as JSON.
pub async fn parse_response_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

pub async fn response_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// A property with generated address data.
pub fn fake_property(status: &str) -> PropertyRecord {
    PropertyRecord {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        street: StreetName().fake(),
        city: CityName().fake(),
        state: StateAbbr().fake(),
        zip_code: ZipCode().fake(),
        country: "USA".to_string(),
        purchase_price: (100_000..900_000).fake::<u32>() as f64,
        current_value: Some((100_000..900_000).fake::<u32>() as f64),
        status: status.to_string(),
        property_type: Some("Single Family".to_string()),
    }
}

/// Connect to the test database and apply migrations.
///
/// Returns `None` when `TEST_DATABASE_URL` is unset, so database tests are
/// skipped on machines without PostgreSQL.
pub async fn create_test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping PostgreSQL test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    persistence::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    Some(pool)
}
