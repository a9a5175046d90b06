//! Export route handlers.
//!
//! Submission enqueues and returns at once; clients poll the status endpoint
//! and fetch the artifact through the token-bearing download URL.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use domain::models::{ExportStatusResponse, SubmitExportRequest, SubmitExportResponse};
use tokio_util::io::ReaderStream;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::ValidatedJson;

/// Create export routes, mounted under `/api/v1/export`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_export))
        .route("/status/:job_id", get(export_status))
        .route("/download/:token", get(download_export))
}

/// Queue an export.
///
/// POST /api/v1/export
async fn submit_export(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<SubmitExportRequest>,
) -> Result<(StatusCode, Json<SubmitExportResponse>), ApiError> {
    let response = state.exports.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Poll the status of an export.
///
/// GET /api/v1/export/status/:job_id
async fn export_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ExportStatusResponse>, ApiError> {
    let status = state.exports.status(&job_id).await?;
    Ok(Json(status))
}

/// Stream an export artifact. The token is the only credential.
///
/// GET /api/v1/export/download/:token
async fn download_export(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = state.exports.open_download(&token).await?;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        artifact.file_name
    ))
    .map_err(|e| ApiError::Internal(format!("Invalid download file name: {}", e)))?;

    let body = Body::from_stream(ReaderStream::new(artifact.file));

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(artifact.content_type),
            ),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(artifact.len)),
        ],
        body,
    )
        .into_response())
}
