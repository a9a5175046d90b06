//! Artifact generation: renders a data snapshot into a CSV or PDF file.
//!
//! Records are pulled from the data source one page at a time and each
//! rendered chunk is written to disk before the next page is fetched, so
//! memory use is bounded by the page size, not the export size.
//!
//! Each call writes its own `export_{jobId}.{ext}.{tag}.part` file, which is
//! flushed, synced and then renamed to the final name. Two attempts at the same
//! job never share a partial file, and returning from
//! [`ArtifactGenerator::generate`] means a complete artifact sits at the final
//! path.

use std::path::{Path, PathBuf};

use domain::models::{ExportFormat, ExportJob, PropertyFilter, PropertyRecord};
use domain::services::RecordSource;
use shared::crypto::is_safe_identifier;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::export_processor::ProcessingError;
use super::pdf::PdfRenderer;

/// Column headers of CSV exports.
pub const CSV_HEADERS: [&str; 6] = [
    "Address",
    "Country",
    "PurchasePrice",
    "CurrentValue",
    "Status",
    "PropertyType",
];

/// Artifact rendering and storage errors.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Job identifier is not safe for a file name: {0}")]
    UnsafeJobId(String),
}

/// Incremental renderer for one export format.
///
/// Each call returns the bytes to append to the artifact.
pub trait RecordRenderer: Send {
    /// Bytes that open the document (headers, title).
    fn begin(&mut self) -> Result<Vec<u8>, ArtifactError>;

    fn render(&mut self, record: &PropertyRecord) -> Result<Vec<u8>, ArtifactError>;

    /// Bytes that close the document.
    fn finish(&mut self) -> Result<Vec<u8>, ArtifactError>;
}

/// Format a monetary amount with `f64` `Display`, so whole amounts print
/// without a fractional part.
pub fn format_amount(amount: f64) -> String {
    amount.to_string()
}

/// RFC 4180 CSV with a fixed header row.
pub struct CsvRenderer {
    writer: csv::Writer<Vec<u8>>,
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new().from_writer(Vec::new())
}

impl CsvRenderer {
    pub fn new() -> Self {
        Self {
            writer: csv_writer(),
        }
    }

    /// Hand back everything written so far and start a fresh buffer.
    fn drain(&mut self) -> Result<Vec<u8>, ArtifactError> {
        std::mem::replace(&mut self.writer, csv_writer())
            .into_inner()
            .map_err(|e| ArtifactError::Io(e.into_error()))
    }
}

impl Default for CsvRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordRenderer for CsvRenderer {
    fn begin(&mut self) -> Result<Vec<u8>, ArtifactError> {
        self.writer.write_record(CSV_HEADERS)?;
        self.drain()
    }

    fn render(&mut self, record: &PropertyRecord) -> Result<Vec<u8>, ArtifactError> {
        let purchase_price = format_amount(record.purchase_price);
        let current_value = record.current_value.map(format_amount).unwrap_or_default();
        self.writer.write_record([
            record.street.as_str(),
            record.country.as_str(),
            purchase_price.as_str(),
            current_value.as_str(),
            record.status.as_str(),
            record.property_type.as_deref().unwrap_or_default(),
        ])?;
        self.drain()
    }

    fn finish(&mut self) -> Result<Vec<u8>, ArtifactError> {
        self.drain()
    }
}

/// Build the renderer for a format.
pub fn renderer_for(format: ExportFormat) -> Box<dyn RecordRenderer> {
    match format {
        ExportFormat::Csv => Box::new(CsvRenderer::new()),
        ExportFormat::Pdf => Box::new(PdfRenderer::new()),
    }
}

/// A durably written artifact.
#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub path: PathBuf,
    pub records: u64,
    pub bytes: u64,
}

/// Writes export artifacts into one directory.
#[derive(Debug, Clone)]
pub struct ArtifactGenerator {
    exports_dir: PathBuf,
    page_size: usize,
}

impl ArtifactGenerator {
    pub fn new(exports_dir: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            exports_dir: exports_dir.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn exports_dir(&self) -> &Path {
        &self.exports_dir
    }

    /// Final location of a job's artifact.
    pub fn artifact_path(&self, job: &ExportJob) -> Result<PathBuf, ArtifactError> {
        if !is_safe_identifier(&job.job_id) {
            return Err(ArtifactError::UnsafeJobId(job.job_id.clone()));
        }
        Ok(self.exports_dir.join(job.artifact_file_name()))
    }

    /// Render the job's snapshot and store it under its final name.
    ///
    /// On failure the partial file is removed and nothing is left at the
    /// final path by this attempt.
    pub async fn generate(
        &self,
        job: &ExportJob,
        source: &dyn RecordSource,
    ) -> Result<GeneratedArtifact, ProcessingError> {
        let filter = PropertyFilter::from_filters(&job.filters)?;
        let path = self.artifact_path(job)?;
        fs::create_dir_all(&self.exports_dir)
            .await
            .map_err(ArtifactError::from)?;

        let part = part_path(&path, &Uuid::new_v4().simple().to_string());
        match self.write_snapshot(&part, job.format, &filter, source).await {
            Ok((records, bytes)) => {
                fs::rename(&part, &path).await.map_err(ArtifactError::from)?;
                Ok(GeneratedArtifact {
                    path,
                    records,
                    bytes,
                })
            }
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&part).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            path = %part.display(),
                            error = %remove_err,
                            "Failed to remove partial artifact"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn write_snapshot(
        &self,
        part: &Path,
        format: ExportFormat,
        filter: &PropertyFilter,
        source: &dyn RecordSource,
    ) -> Result<(u64, u64), ProcessingError> {
        let mut file = File::create(part).await.map_err(ArtifactError::from)?;
        let mut renderer = renderer_for(format);
        let mut records = 0u64;
        let mut bytes = 0u64;

        let header = renderer.begin()?;
        write_chunk(&mut file, &header, &mut bytes).await?;

        let mut after = None;
        loop {
            let page = source.fetch_page(filter, after, self.page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id);

            let mut chunk = Vec::new();
            for record in &page {
                chunk.extend(renderer.render(record)?);
                records += 1;
            }
            write_chunk(&mut file, &chunk, &mut bytes).await?;

            if page.len() < self.page_size {
                break;
            }
        }

        let trailer = renderer.finish()?;
        write_chunk(&mut file, &trailer, &mut bytes).await?;

        file.flush().await.map_err(ArtifactError::from)?;
        file.sync_all().await.map_err(ArtifactError::from)?;
        Ok((records, bytes))
    }
}

async fn write_chunk(file: &mut File, chunk: &[u8], bytes: &mut u64) -> Result<(), ArtifactError> {
    if !chunk.is_empty() {
        file.write_all(chunk).await?;
        *bytes += chunk.len() as u64;
    }
    Ok(())
}

/// Suffix of in-progress artifact files.
pub const PART_SUFFIX: &str = ".part";

fn part_path(path: &Path, tag: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(tag);
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}
