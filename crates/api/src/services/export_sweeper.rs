//! Reclaims expired export records and their artifacts.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use domain::models::{ExportJob, ARTIFACT_FILE_PREFIX};
use domain::services::{ExportRecordStore, StoreError};
use tracing::{debug, info, warn};

use super::artifact::PART_SUFFIX;
use crate::middleware::metrics::record_exports_swept;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub records_deleted: usize,
    pub files_deleted: usize,
    pub files_missing: usize,
    /// Artifacts without a record and abandoned partial files.
    pub orphans_deleted: usize,
    pub file_errors: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.records_deleted == 0 && self.files_deleted == 0 && self.orphans_deleted == 0
    }
}

/// Deletes completed records past their expiry, then their files.
///
/// Records go first so a concurrent download either already holds the open
/// file or finds no record at all. A file that could not be deleted then has
/// no record pointing at it; the orphan pass over the exports directory picks
/// it up on a later sweep, together with partial files left by attempts that
/// died mid-write.
pub struct ExportSweeper {
    store: Arc<dyn ExportRecordStore>,
    exports_dir: PathBuf,
    stale_part_after: chrono::Duration,
}

impl ExportSweeper {
    /// Partial files untouched for longer than `stale_part_after` are removed.
    pub fn new(
        store: Arc<dyn ExportRecordStore>,
        exports_dir: impl Into<PathBuf>,
        stale_part_after: chrono::Duration,
    ) -> Self {
        Self {
            store,
            exports_dir: exports_dir.into(),
            stale_part_after,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let expired = self.store.delete_expired(now).await?;
        let mut report = SweepReport {
            records_deleted: expired.len(),
            ..SweepReport::default()
        };

        for record in &expired {
            let Some(path) = record.artifact_path.as_deref() else {
                continue;
            };

            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    report.files_deleted += 1;
                    debug!(job_id = %record.job_id, "Deleted expired artifact");
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    report.files_missing += 1;
                    debug!(job_id = %record.job_id, "Expired artifact already gone");
                }
                Err(e) => {
                    report.file_errors += 1;
                    warn!(
                        job_id = %record.job_id,
                        path = path,
                        error = %e,
                        "Failed to delete expired artifact"
                    );
                }
            }
        }

        self.sweep_orphans(now, &mut report).await?;

        if !report.is_empty() {
            record_exports_swept(report.records_deleted);
            info!(
                records_deleted = report.records_deleted,
                files_deleted = report.files_deleted,
                files_missing = report.files_missing,
                orphans_deleted = report.orphans_deleted,
                file_errors = report.file_errors,
                "Swept expired exports"
            );
        }

        Ok(report)
    }

    async fn sweep_orphans(
        &self,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.exports_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                report.file_errors += 1;
                warn!(error = %e, "Failed to list exports directory");
                return Ok(());
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report.file_errors += 1;
                    warn!(error = %e, "Failed to read exports directory");
                    break;
                }
            };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !name.starts_with(ARTIFACT_FILE_PREFIX) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let orphaned = if name.ends_with(PART_SUFFIX) {
                metadata
                    .modified()
                    .map(|modified| now - DateTime::<Utc>::from(modified) > self.stale_part_after)
                    .unwrap_or(false)
            } else if let Some(job_id) = ExportJob::job_id_from_artifact_name(name) {
                self.store.find_by_job_id(job_id).await?.is_none()
            } else {
                false
            };

            if orphaned {
                remove_orphan(&entry.path(), report).await;
            }
        }

        Ok(())
    }
}

async fn remove_orphan(path: &Path, report: &mut SweepReport) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            report.orphans_deleted += 1;
            debug!(path = %path.display(), "Deleted orphaned export file");
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            report.file_errors += 1;
            warn!(path = %path.display(), error = %e, "Failed to delete orphaned export file");
        }
    }
}
