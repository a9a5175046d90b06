//! Background workers, the job scheduler and job implementations.

mod export_cleanup;
mod export_worker;
mod rate_limit_prune;
mod scheduler;

pub use export_cleanup::ExportCleanupJob;
pub use export_worker::{ExportWorkerPool, ATTEMPTS_EXHAUSTED, WORKER_PANICKED};
pub use rate_limit_prune::RateLimitPruneJob;
pub use scheduler::{Job, JobScheduler};
