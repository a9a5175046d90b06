//! Per-requester submission rate limiting.

use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as GovRateLimiter,
};
use std::num::NonZeroU32;

type RequesterRateLimiter = GovRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Export submissions allowed per requester per hour.
///
/// One keyed limiter holds the state of every requester. Entries whose budget
/// has fully refilled carry no information and are dropped by
/// [`SubmitRateLimiter::prune`].
pub struct SubmitRateLimiter {
    limiter: RequesterRateLimiter,
    quota: Quota,
}

impl SubmitRateLimiter {
    /// Returns `None` when `per_hour` is 0, which disables the limit.
    pub fn per_hour(per_hour: u32) -> Option<Self> {
        let per_hour = NonZeroU32::new(per_hour)?;
        Some(Self::with_quota(Quota::per_hour(per_hour)))
    }

    fn with_quota(quota: Quota) -> Self {
        Self {
            limiter: GovRateLimiter::keyed(quota),
            quota,
        }
    }

    /// Take one submission from the requester's budget.
    ///
    /// Returns the number of seconds to wait (at least 1) when the budget is spent.
    pub fn check(&self, requester_id: &str) -> Result<(), u64> {
        self.limiter
            .check_key(&requester_id.to_string())
            .map_err(|not_until| {
                let wait_time = not_until.wait_time_from(DefaultClock::default().now());
                wait_time.as_secs().max(1)
            })
    }

    /// Forget requesters whose budget is full again. Returns how many remain.
    pub fn prune(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        self.limiter.len()
    }

    /// Requesters currently tracked.
    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

impl std::fmt::Debug for SubmitRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitRateLimiter")
            .field("quota", &self.quota)
            .field("tracked_requesters", &self.tracked())
            .finish()
    }
}
