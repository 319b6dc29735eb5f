//! Periodic incremental crawling
//!
//! The scheduler drives a [`Crawler`] through `Idle -> Running -> Idle`: while running
//! it performs one incremental crawl, logs the summary, and sleeps for the configured
//! interval. A stop request wakes the sleep early; a crawl already in progress runs to
//! completion.

use crate::crawler::coordinator::Crawler;
use crate::storage::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Cloneable stop switch for a running [`Scheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl SchedulerHandle {
    /// Asks the scheduler loop to exit at its next wake point
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Scheduler stopping");
        }
        self.wake.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Runs incremental crawls on a fixed interval
pub struct Scheduler<S: Store> {
    crawler: Crawler<S>,
    interval: Duration,
    handle: SchedulerHandle,
    cycles: u64,
}

impl<S: Store> Scheduler<S> {
    /// Creates a new scheduler
    ///
    /// # Arguments
    ///
    /// * `crawler` - The crawler every cycle runs on
    /// * `interval` - Sleep between the end of one crawl and the start of the next
    pub fn new(crawler: Crawler<S>, interval: Duration) -> Self {
        Self {
            crawler,
            interval,
            handle: SchedulerHandle {
                running: Arc::new(AtomicBool::new(false)),
                wake: Arc::new(Notify::new()),
            },
            cycles: 0,
        }
    }

    /// Runs crawl cycles until [`Scheduler::stop`] or a [`SchedulerHandle`] stops it
    ///
    /// A failed cycle is logged and does not end the loop.
    pub async fn start(&mut self, source: &str, max_posts: usize) {
        self.handle.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Starting scheduler for r/{} with {:?} interval",
            source,
            self.interval
        );

        while self.is_running() {
            self.cycles += 1;
            match self.crawler.crawl_incremental(source, max_posts).await {
                Ok(result) => tracing::info!(
                    cycle = self.cycles,
                    "Scheduled crawl complete: {} new posts, {} updated, {} new comments",
                    result.posts_inserted,
                    result.posts_updated,
                    result.comments_inserted
                ),
                Err(e) => tracing::error!(cycle = self.cycles, "Scheduled crawl error: {}", e),
            }

            // Registered before the check so a stop in between still wakes the sleep
            let wake = Arc::clone(&self.handle.wake);
            let notified = wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_running() {
                break;
            }

            tracing::info!("Sleeping for {:?} until next crawl...", self.interval);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = &mut notified => {}
            }
        }

        self.handle.running.store(false, Ordering::SeqCst);
        tracing::info!("Scheduler stopped after {} cycles", self.cycles);
    }

    /// Asks the loop to exit at its next wake point
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Stop switch usable from other tasks
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Number of crawl cycles started so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn into_crawler(self) -> Crawler<S> {
        self.crawler
    }
}
