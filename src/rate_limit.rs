// best-effort abuse throttling: counts live in this process only, reset on
// every deploy, and are not shared between instances. a shared counter store
// (e.g. redis with key expiry) could replace this behind the same
// `check`/`prune` contract

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The submission was admitted and recorded
    Allowed { remaining: usize },
    /// Nothing was recorded
    Limited { retry_after: Duration },
}

/// Sliding-window counter keyed by client network identifier.
///
/// actix spins up one worker per core, so the map is behind a `Mutex`; the
/// lock is never held across an `.await`.
pub struct RateLimiter {
    submissions: Mutex<HashMap<String, VecDeque<Instant>>>,
    max_submissions: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        max_submissions: usize,
        window: Duration,
    ) -> Self {
        Self {
            submissions: Mutex::new(HashMap::new()),
            max_submissions,
            window,
        }
    }

    pub fn check(
        &self,
        key: &str,
    ) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Admit and record a submission at `now`, unless `max_submissions` were
    /// already recorded for `key` within the trailing window.
    pub fn check_at(
        &self,
        key: &str,
        now: Instant,
    ) -> RateLimitDecision {
        let mut map = self
            .submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let timestamps = map.entry(key.to_owned()).or_default();

        // oldest first, so expired entries are always at the front
        while timestamps
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.max_submissions {
            let retry_after = timestamps
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            return RateLimitDecision::Limited { retry_after };
        }

        timestamps.push_back(now);
        RateLimitDecision::Allowed {
            remaining: self.max_submissions - timestamps.len(),
        }
    }

    pub fn prune(&self) { self.prune_at(Instant::now()) }

    /// Drop expired timestamps, and keys with none left
    pub fn prune_at(
        &self,
        now: Instant,
    ) {
        let mut map = self
            .submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < self.window);
            !timestamps.is_empty()
        });
    }

    /// Number of client identifiers currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// To be run as a separate worker, outside the main API. Keeps the map from
/// growing with every client ever seen.
pub async fn init_sweeper(
    limiter: Arc<RateLimiter>,
    every: Duration,
) -> Result<(), anyhow::Error> {
    loop {
        tokio::time::sleep(every).await;
        limiter.prune();
        tracing::debug!(
            tracked_clients = limiter.tracked_clients(),
            "pruned rate limit entries"
        );
    }
}
