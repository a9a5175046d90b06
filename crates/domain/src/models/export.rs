//! Export job and export record domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

use shared::validation::{validate_filters_object, validate_requester_id};

/// Default lifetime of a download link, in seconds (one hour).
pub const DEFAULT_DOWNLOAD_TTL_SECS: i64 = 3600;

/// Leading part of every artifact file name.
pub const ARTIFACT_FILE_PREFIX: &str = "export_";

/// Export format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Pdf,
}

impl ExportFormat {
    /// File extension for artifacts of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Pdf => "pdf",
        }
    }

    /// MIME type served on download.
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.extension()
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

/// Lifecycle state of an export record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportStatus::Pending => write!(f, "pending"),
            ExportStatus::Completed => write!(f, "completed"),
            ExportStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ExportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ExportStatus::Pending),
            "completed" => Ok(ExportStatus::Completed),
            "failed" => Ok(ExportStatus::Failed),
            _ => Err(format!("Unknown export status: {}", s)),
        }
    }
}

/// Opaque key-value selector handed to the data source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportFilters(pub serde_json::Map<String, serde_json::Value>);

impl ExportFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build filters from an optional JSON value. Anything but an object is rejected.
    pub fn from_value(value: Option<serde_json::Value>) -> Result<Self, String> {
        match value {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(serde_json::Value::Object(map)) => Ok(Self(map)),
            Some(_) => Err("filters must be an object".to_string()),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

/// A queued request to produce one export artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub job_id: String,
    pub requester_id: String,
    #[serde(default)]
    pub filters: ExportFilters,
    #[serde(default)]
    pub format: ExportFormat,
    pub enqueued_at: DateTime<Utc>,
}

impl ExportJob {
    /// Create a job with a freshly generated identifier.
    pub fn new(requester_id: impl Into<String>, filters: ExportFilters, format: ExportFormat) -> Self {
        Self {
            job_id: shared::crypto::generate_job_id(),
            requester_id: requester_id.into(),
            filters,
            format,
            enqueued_at: Utc::now(),
        }
    }

    /// Artifact file name, derived from the job identifier and format.
    pub fn artifact_file_name(&self) -> String {
        format!(
            "{}{}.{}",
            ARTIFACT_FILE_PREFIX,
            self.job_id,
            self.format.extension()
        )
    }

    /// Job identifier encoded in a finished artifact's file name.
    pub fn job_id_from_artifact_name(file_name: &str) -> Option<&str> {
        let (stem, extension) = file_name
            .strip_prefix(ARTIFACT_FILE_PREFIX)?
            .rsplit_once('.')?;
        let known = [ExportFormat::Csv, ExportFormat::Pdf]
            .iter()
            .any(|format| format.extension() == extension);
        (known && shared::crypto::is_safe_identifier(stem)).then_some(stem)
    }
}

/// Persisted state machine tracking one job's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub job_id: String,
    pub requester_id: String,
    pub format: ExportFormat,
    pub status: ExportStatus,
    pub artifact_path: Option<String>,
    #[serde(skip_serializing)]
    pub download_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportRecord {
    /// The download token, if the record is completed and not yet expired at `now`.
    pub fn live_token_at(&self, now: DateTime<Utc>) -> Option<&str> {
        if self.status != ExportStatus::Completed {
            return None;
        }
        match (&self.download_token, self.expires_at) {
            (Some(token), Some(expires_at)) if now < expires_at => Some(token.as_str()),
            _ => None,
        }
    }

    /// Whether the record is a completed export whose expiry has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ExportStatus::Completed
            && self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

/// Request payload for submitting an export.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExportRequest {
    #[validate(custom(function = "validate_requester_id"))]
    pub requester_id: String,

    #[validate(custom(function = "validate_filters_object"))]
    pub filters: Option<serde_json::Value>,

    #[serde(default)]
    pub format: Option<ExportFormat>,
}

/// Response payload for an accepted export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExportResponse {
    pub job_id: String,
    pub message: String,
}

/// Response payload for a status lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStatusResponse {
    pub status: ExportStatus,
    pub download_url: Option<String>,
}
