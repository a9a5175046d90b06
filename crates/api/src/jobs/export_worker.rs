//! Export worker pool.
//!
//! Each worker dequeues one delivery at a time and runs it to a terminal
//! record before asking for the next. The export itself runs in its own task
//! so a panic is contained to that job and recorded as a failure. While the
//! task runs, the worker renews the delivery's lease every third of the
//! visibility timeout, so a long export is not handed to a second worker.

use std::sync::Arc;
use std::time::Duration;

use domain::models::ExportRecord;
use domain::services::{Delivery, JobQueue, QueueError, StoreError};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::services::ExportProcessor;

/// Pause after a queue error before dequeuing again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Floor for the lease renewal period.
const MIN_LEASE_RENEWAL: Duration = Duration::from_millis(10);

pub const ATTEMPTS_EXHAUSTED: &str = "Export abandoned after repeated delivery attempts";
pub const WORKER_PANICKED: &str = "Export worker crashed while processing the job";

/// Fixed-size pool of export workers.
pub struct ExportWorkerPool {
    queue: Arc<dyn JobQueue>,
    processor: Arc<ExportProcessor>,
    workers: usize,
    max_attempts: u32,
    lease_renewal: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl ExportWorkerPool {
    /// A delivery whose attempt number exceeds `max_attempts` is recorded as
    /// failed instead of being processed again.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<ExportProcessor>,
        workers: usize,
        max_attempts: u32,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let lease_renewal = (queue.visibility_timeout() / 3).max(MIN_LEASE_RENEWAL);
        Self {
            queue,
            processor,
            workers,
            max_attempts,
            lease_renewal,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn start(&mut self) {
        info!(
            workers = self.workers,
            max_attempts = self.max_attempts,
            lease_renewal_ms = self.lease_renewal.as_millis() as u64,
            "Starting export workers"
        );

        for worker in 0..self.workers {
            let worker = Worker {
                id: worker,
                queue: Arc::clone(&self.queue),
                processor: Arc::clone(&self.processor),
                max_attempts: self.max_attempts,
                lease_renewal: self.lease_renewal,
            };
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.handles.push(tokio::spawn(worker.run(shutdown_rx)));
        }
    }

    /// Stop dequeuing. Jobs already in progress run to completion.
    pub fn shutdown(&self) {
        info!("Initiating export worker shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for workers to finish their current job, giving up after `timeout`.
    pub async fn wait_for_shutdown(self, timeout: Duration) {
        let shutdown_future = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!("Export worker task failed: {}", e);
                }
            }
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(()) => info!("All export workers stopped"),
            Err(_) => warn!(
                "Export worker shutdown timed out after {:?}; unacknowledged jobs will be redelivered",
                timeout
            ),
        }
    }
}

struct Worker {
    id: usize,
    queue: Arc<dyn JobQueue>,
    processor: Arc<ExportProcessor>,
    max_attempts: u32,
    lease_renewal: Duration,
}

type ProcessOutcome = Result<ExportRecord, StoreError>;

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(worker = self.id, "Export worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let delivery = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                delivery = self.queue.dequeue() => delivery,
            };

            match delivery {
                Ok(delivery) => {
                    let span = info_span!(
                        "export_job",
                        worker = self.id,
                        job_id = %delivery.job.job_id,
                        attempt = delivery.attempt,
                        format = %delivery.job.format,
                    );
                    self.handle(delivery).instrument(span).await;
                }
                Err(QueueError::Malformed(msg)) => {
                    warn!(worker = self.id, error = %msg, "Dropped malformed queue entry");
                }
                Err(e) => {
                    error!(worker = self.id, error = %e, "Failed to dequeue export job");
                    tokio::select! {
                        _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }

        info!(worker = self.id, "Export worker stopped");
    }

    async fn handle(&self, delivery: Delivery) {
        let job = &delivery.job;

        let outcome = if delivery.attempt > self.max_attempts {
            warn!(max_attempts = self.max_attempts, "Delivery attempts exhausted");
            self.processor.fail(job, ATTEMPTS_EXHAUSTED).await
        } else {
            let processor = Arc::clone(&self.processor);
            let task_job = job.clone();
            let task = tokio::spawn(
                async move { processor.process(&task_job).await }.in_current_span(),
            );

            match self.run_with_lease(&delivery, task).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    error!(error = %e, "Export task panicked");
                    self.processor.fail(job, WORKER_PANICKED).await
                }
                Err(e) => {
                    warn!(error = %e, "Export task cancelled; leaving job for redelivery");
                    return;
                }
            }
        };

        match outcome {
            Ok(record) => match self.queue.ack(&delivery).await {
                Ok(true) => info!(status = %record.status, "Export job acknowledged"),
                Ok(false) => warn!(
                    status = %record.status,
                    "Lease expired before acknowledgement; job will be redelivered"
                ),
                Err(e) => warn!(error = %e, "Failed to acknowledge export job"),
            },
            Err(e) => {
                // Without a recorded outcome the delivery stays leased and
                // comes back after the visibility timeout.
                error!(error = %e, "Failed to record export outcome");
            }
        }
    }

    /// Await the export task, renewing the delivery's lease until it ends.
    async fn run_with_lease(
        &self,
        delivery: &Delivery,
        mut task: JoinHandle<ProcessOutcome>,
    ) -> Result<ProcessOutcome, JoinError> {
        let mut renewal = tokio::time::interval(self.lease_renewal);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the lease is fresh.
        renewal.tick().await;

        loop {
            tokio::select! {
                joined = &mut task => return joined,
                _ = renewal.tick() => match self.queue.extend(delivery).await {
                    Ok(true) => debug!("Export lease renewed"),
                    Ok(false) => warn!("Export lease lost; the job may run twice"),
                    Err(e) => warn!(error = %e, "Failed to renew export lease"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ArtifactGenerator;
    use chrono::{DateTime, Utc};
    use domain::models::{
        ExportFilters, ExportFormat, ExportJob, ExportStatus, PropertyFilter, PropertyRecord,
    };
    use domain::services::{
        CompletedArtifact, ExportRecordStore, InMemoryExportRecordStore, InMemoryJobQueue,
        InMemoryRecordSource, RecordSource, SourceError,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct PanickingSource;

    #[async_trait::async_trait]
    impl RecordSource for PanickingSource {
        async fn fetch_page(
            &self,
            _filter: &PropertyFilter,
            _after: Option<Uuid>,
            _limit: usize,
        ) -> Result<Vec<PropertyRecord>, SourceError> {
            panic!("source exploded");
        }
    }

    /// Source that serves pages slowly and counts how many exports began.
    struct SlowSource {
        inner: InMemoryRecordSource,
        delay: Duration,
        starts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RecordSource for SlowSource {
        async fn fetch_page(
            &self,
            filter: &PropertyFilter,
            after: Option<Uuid>,
            limit: usize,
        ) -> Result<Vec<PropertyRecord>, SourceError> {
            if after.is_none() {
                self.starts.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;
            self.inner.fetch_page(filter, after, limit).await
        }
    }

    fn property(street: &str) -> PropertyRecord {
        PropertyRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            street: street.to_string(),
            city: "Austin".to_string(),
            state: "TX".to_string(),
            zip_code: "73301".to_string(),
            country: "USA".to_string(),
            purchase_price: 310000.0,
            current_value: Some(335000.0),
            status: "Owned".to_string(),
            property_type: Some("Condo".to_string()),
        }
    }

    /// Store that cannot be written to.
    struct UnavailableStore;

    #[async_trait::async_trait]
    impl ExportRecordStore for UnavailableStore {
        async fn mark_pending(&self, _job: &ExportJob) -> Result<ExportRecord, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn mark_completed(
            &self,
            _job: &ExportJob,
            _artifact: &CompletedArtifact,
        ) -> Result<ExportRecord, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn mark_failed(
            &self,
            _job: &ExportJob,
            _error: &str,
        ) -> Result<ExportRecord, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn find_by_job_id(&self, _job_id: &str) -> Result<Option<ExportRecord>, StoreError> {
            Ok(None)
        }

        async fn find_by_token(&self, _token: &str) -> Result<Option<ExportRecord>, StoreError> {
            Ok(None)
        }

        async fn delete_expired(
            &self,
            _now: DateTime<Utc>,
        ) -> Result<Vec<ExportRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    fn processor(
        store: Arc<dyn ExportRecordStore>,
        source: Arc<dyn RecordSource>,
        dir: &std::path::Path,
    ) -> Arc<ExportProcessor> {
        Arc::new(ExportProcessor::new(
            store,
            source,
            ArtifactGenerator::new(dir, 50),
            chrono::Duration::hours(1),
        ))
    }

    fn job() -> ExportJob {
        ExportJob::new("u1", ExportFilters::new(), ExportFormat::Csv)
    }

    async fn wait_for_status(
        store: &InMemoryExportRecordStore,
        job_id: &str,
        status: ExportStatus,
    ) -> ExportRecord {
        for _ in 0..200 {
            if let Some(record) = store.find_by_job_id(job_id).await.unwrap() {
                if record.status == status {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", job_id, status);
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_workers_complete_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(300)));
        let store = Arc::new(InMemoryExportRecordStore::new());
        let mut pool = ExportWorkerPool::new(
            queue.clone(),
            processor(store.clone(), Arc::new(InMemoryRecordSource::new()), dir.path()),
            2,
            3,
        );
        pool.start();

        let jobs: Vec<_> = (0..3).map(|_| job()).collect();
        for job in &jobs {
            queue.enqueue(job.clone()).await.unwrap();
        }
        for job in &jobs {
            wait_for_status(&store, &job.job_id, ExportStatus::Completed).await;
        }
        wait_until(|| queue.leased_len() == 0).await;

        pool.shutdown();
        pool.wait_for_shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_panicking_job_is_failed_and_worker_survives() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(300)));
        let store = Arc::new(InMemoryExportRecordStore::new());
        let mut pool = ExportWorkerPool::new(
            queue.clone(),
            processor(store.clone(), Arc::new(PanickingSource), dir.path()),
            1,
            3,
        );
        pool.start();

        let first = job();
        let second = job();
        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();

        let record = wait_for_status(&store, &first.job_id, ExportStatus::Failed).await;
        assert_eq!(record.error_message.as_deref(), Some(WORKER_PANICKED));
        wait_for_status(&store, &second.job_id, ExportStatus::Failed).await;
        wait_until(|| queue.leased_len() == 0 && queue.ready_len() == 0).await;

        pool.shutdown();
        pool.wait_for_shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_exhausted_delivery_is_failed_without_processing() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_millis(30)));
        let store = Arc::new(InMemoryExportRecordStore::new());

        let job = job();
        queue.enqueue(job.clone()).await.unwrap();
        // Simulate a consumer that died without acknowledging.
        let lost = queue.dequeue().await.unwrap();
        assert_eq!(lost.attempt, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut pool = ExportWorkerPool::new(
            queue.clone(),
            processor(store.clone(), Arc::new(InMemoryRecordSource::new()), dir.path()),
            1,
            1,
        );
        pool.start();

        let record = wait_for_status(&store, &job.job_id, ExportStatus::Failed).await;
        assert_eq!(record.error_message.as_deref(), Some(ATTEMPTS_EXHAUSTED));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
        wait_until(|| queue.leased_len() == 0 && queue.ready_len() == 0).await;

        pool.shutdown();
        pool.wait_for_shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_long_export_keeps_its_lease() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_millis(60)));
        let store = Arc::new(InMemoryExportRecordStore::new());
        let source = Arc::new(SlowSource {
            inner: InMemoryRecordSource::with_records(
                (0..4).map(|i| property(&format!("{} Oak Ave", i))).collect(),
            ),
            delay: Duration::from_millis(40),
            starts: AtomicUsize::new(0),
        });
        let processor = Arc::new(ExportProcessor::new(
            store.clone(),
            source.clone(),
            ArtifactGenerator::new(dir.path(), 1),
            chrono::Duration::hours(1),
        ));
        let mut pool = ExportWorkerPool::new(queue.clone(), processor, 2, 3);
        pool.start();

        let job = job();
        queue.enqueue(job.clone()).await.unwrap();

        let record = wait_for_status(&store, &job.job_id, ExportStatus::Completed).await;
        wait_until(|| queue.leased_len() == 0 && queue.ready_len() == 0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(source.starts.load(Ordering::SeqCst), 1);
        let current = store.find_by_job_id(&job.job_id).await.unwrap().unwrap();
        assert_eq!(current.status, ExportStatus::Completed);
        assert_eq!(current.download_token, record.download_token);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        pool.shutdown();
        pool.wait_for_shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_store_failure_leaves_delivery_leased() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(300)));
        let mut pool = ExportWorkerPool::new(
            queue.clone(),
            processor(
                Arc::new(UnavailableStore),
                Arc::new(InMemoryRecordSource::new()),
                dir.path(),
            ),
            1,
            3,
        );
        pool.start();

        queue.enqueue(job()).await.unwrap();
        wait_until(|| queue.ready_len() == 0 && queue.leased_len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.leased_len(), 1);

        pool.shutdown();
        pool.wait_for_shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_idle_workers_stop_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(300)));
        let mut pool = ExportWorkerPool::new(
            queue,
            processor(
                Arc::new(InMemoryExportRecordStore::new()),
                Arc::new(InMemoryRecordSource::new()),
                dir.path(),
            ),
            3,
            3,
        );
        pool.start();
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.shutdown();
        tokio::time::timeout(
            Duration::from_secs(1),
            pool.wait_for_shutdown(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    }
}
