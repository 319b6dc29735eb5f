//! Fixed-interval request pacing
//!
//! Every outbound request passes through [`RateLimiter::acquire`], which guarantees a
//! minimum gap between consecutive dispatches. There is no burst allowance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,

    /// Dispatch time of the previous request
    last_dispatch: Mutex<Option<Instant>>,

    dispatched: AtomicU64,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_dispatch: Mutex::new(None),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Waits until a request may be dispatched, then records the dispatch
    ///
    /// Concurrent callers are serialized: the lock is held across the sleep, so each
    /// caller observes the dispatch time stamped by the one before it.
    pub async fn acquire(&self) {
        let mut last = self.last_dispatch.lock().await;

        if let Some(wait) = Self::remaining(*last, self.min_delay, Instant::now()) {
            tracing::trace!("Pacing request for {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        *last = Some(Instant::now());
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Calculates the time until the next request can be dispatched
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    pub async fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let last = self.last_dispatch.lock().await;
        Self::remaining(*last, self.min_delay, now)
    }

    /// Number of dispatches granted so far
    pub fn request_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    fn remaining(last: Option<Instant>, min_delay: Duration, now: Instant) -> Option<Duration> {
        let last = last?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < min_delay {
            Some(min_delay - elapsed)
        } else {
            None
        }
    }
}
