//! Job queue contract and in-memory implementation.
//!
//! Delivery is at-least-once: a dequeued job stays leased until it is
//! acknowledged. A lease that is not acknowledged within the visibility timeout
//! expires and the job is handed out again with an incremented attempt number.
//! Consumers that need longer than the timeout renew the lease with
//! [`JobQueue::extend`].

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::ExportJob;

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed queue payload: {0}")]
    Malformed(String),
}

/// A job handed to a consumer, leased until acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: ExportJob,
    /// 1-based delivery attempt for this job.
    pub attempt: u32,
    /// Lease identifier, required to acknowledge the delivery.
    pub receipt: Uuid,
}

/// Durable, at-least-once delivery channel of export jobs.
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    /// Push a job; returns its identifier.
    async fn enqueue(&self, job: ExportJob) -> Result<String, QueueError>;

    /// Wait until a job is available and lease it.
    async fn dequeue(&self) -> Result<Delivery, QueueError>;

    /// Acknowledge a delivery, removing the job for good.
    ///
    /// Returns false if the lease was no longer held (it expired and the job
    /// was, or will be, redelivered).
    async fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError>;

    /// Push the delivery's lease a full visibility timeout into the future.
    ///
    /// Returns false if the lease was already handed to another consumer.
    async fn extend(&self, delivery: &Delivery) -> Result<bool, QueueError>;

    /// How long a lease lasts without being extended.
    fn visibility_timeout(&self) -> Duration;
}

struct Queued {
    job: ExportJob,
    attempts: u32,
}

struct Leased {
    job: ExportJob,
    attempts: u32,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Queued>,
    leased: HashMap<Uuid, Leased>,
    closed: bool,
}

impl QueueState {
    /// Move every lease whose deadline has passed back to the front of the queue.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<Uuid> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(receipt, _)| *receipt)
            .collect();

        for receipt in expired {
            if let Some(lease) = self.leased.remove(&receipt) {
                tracing::warn!(
                    job_id = %lease.job.job_id,
                    attempts = lease.attempts,
                    "Lease expired, job will be redelivered"
                );
                self.ready.push_front(Queued {
                    job: lease.job,
                    attempts: lease.attempts,
                });
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.leased.values().map(|lease| lease.deadline).min()
    }
}

/// In-process queue with the same leasing semantics as the durable queue.
///
/// Jobs survive worker failures but not a process restart.
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl InMemoryJobQueue {
    /// Create a queue whose leases expire after `visibility_timeout`.
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }

    /// Number of jobs waiting to be dequeued.
    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    /// Number of jobs currently leased by consumers.
    pub fn leased_len(&self) -> usize {
        self.lock().leased.len()
    }

    /// Refuse further enqueues, as if the backing service went away.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the state half-updated:
        // every mutation is a single push/pop/insert/remove.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: ExportJob) -> Result<String, QueueError> {
        let job_id = job.job_id.clone();
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Unavailable("queue is closed".to_string()));
            }
            state.ready.push_back(Queued { job, attempts: 0 });
        }
        self.notify.notify_one();
        Ok(job_id)
    }

    async fn dequeue(&self) -> Result<Delivery, QueueError> {
        loop {
            let next_deadline = {
                let mut state = self.lock();
                let now = Instant::now();
                state.reclaim_expired(now);

                if let Some(queued) = state.ready.pop_front() {
                    let receipt = Uuid::new_v4();
                    let attempts = queued.attempts + 1;
                    state.leased.insert(
                        receipt,
                        Leased {
                            job: queued.job.clone(),
                            attempts,
                            deadline: now + self.visibility_timeout,
                        },
                    );
                    return Ok(Delivery {
                        job: queued.job,
                        attempt: attempts,
                        receipt,
                    });
                }

                state.next_deadline()
            };

            // notify_one stores a permit when nobody is waiting, so an enqueue
            // between releasing the lock and awaiting here is not lost.
            match next_deadline {
                Some(deadline) => {
                    let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
                }
                None => self.notify.notified().await,
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        Ok(self.lock().leased.remove(&delivery.receipt).is_some())
    }

    async fn extend(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let mut state = self.lock();
        match state.leased.get_mut(&delivery.receipt) {
            Some(lease) => {
                lease.deadline = Instant::now() + self.visibility_timeout;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }
}
