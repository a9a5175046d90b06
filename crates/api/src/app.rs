use axum::{extract::Request, middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, redact_path, security_headers_middleware, trace_id,
};
use crate::routes::{export, health};
use crate::services::ExportService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub exports: Arc<ExportService>,
}

pub fn create_app(config: Config, exports: Arc<ExportService>) -> Router {
    let config = Arc::new(config);

    let state = AppState {
        config: config.clone(),
        exports,
    };

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        use tower_http::cors::AllowOrigin;
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    // Download paths carry bearer tokens, so spans record the redacted path.
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        tracing::info_span!(
            "http_request",
            method = %request.method(),
            path = %redact_path(request.uri().path()),
        )
    });

    Router::new()
        .merge(public_routes)
        .nest("/api/v1/export", export::router())
        // Global middleware (order matters: bottom layers run first)
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(trace_layer)
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
