//! Drops idle requesters from the submission rate limiter.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::services::SubmitRateLimiter;

use super::scheduler::Job;

pub struct RateLimitPruneJob {
    limiter: Arc<SubmitRateLimiter>,
    interval: Duration,
}

impl RateLimitPruneJob {
    pub fn new(limiter: Arc<SubmitRateLimiter>, interval: Duration) -> Self {
        Self { limiter, interval }
    }
}

#[async_trait::async_trait]
impl Job for RateLimitPruneJob {
    fn name(&self) -> &'static str {
        "rate_limit_prune"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self) -> Result<(), String> {
        let remaining = self.limiter.prune();
        debug!(tracked_requesters = remaining, "Pruned submission rate limiter");
        Ok(())
    }
}
