//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop that ties the transport, the parser and the
//! store together, including:
//! - Paging through a subreddit listing
//! - Fetching and flattening each post's comment tree
//! - Change-aware upserts with per-item error accounting
//! - Periodic checkpoints and cooperative cancellation

use crate::config::{Config, SortMode, TimeFilter};
use crate::crawler::fetcher::Transport;
use crate::crawler::parser::{parse_comments_page, parse_post_listing, ParseOptions};
use crate::crawler::TransportStats;
use crate::model::{Comment, CrawlState, Post, UpsertAction};
use crate::output::{export_for_downstream, Export, ExportOptions};
use crate::storage::{StorageError, Store, StoreStats};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Largest page the listing API serves
pub const MAX_PAGE_SIZE: usize = 100;

/// Step of a crawl that an error entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlOperation {
    FetchListing,
    UpsertPost,
    FetchComments,
    UpsertComment,
    Checkpoint,
    Interrupted,
}

impl CrawlOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchListing => "fetch_listing",
            Self::UpsertPost => "upsert_post",
            Self::FetchComments => "fetch_comments",
            Self::UpsertComment => "upsert_comment",
            Self::Checkpoint => "checkpoint",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for CrawlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-item failure collected during a crawl
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlErrorEntry {
    pub operation: CrawlOperation,

    /// Post or comment ID, or the source for listing-level failures
    pub item_id: String,

    pub message: String,
}

impl fmt::Display for CrawlErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.operation, self.item_id, self.message)
    }
}

/// Summary of one `crawl()` call
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub source: String,
    pub posts_fetched: u64,
    pub posts_inserted: u64,
    pub posts_updated: u64,
    pub comments_fetched: u64,
    pub comments_inserted: u64,
    pub comments_updated: u64,
    pub errors: Vec<CrawlErrorEntry>,
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub interrupted: bool,
}

/// Combined transport and store counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlerStats {
    pub transport: TransportStats,
    pub store: StoreStats,
}

/// Lazy, finite sequence of posts from one listing
///
/// Each page is sized to the remaining need, capped at [`MAX_PAGE_SIZE`]. The pager
/// stops once `max` posts were yielded, a page comes back empty, the listing has no
/// next cursor, or a fetch fails. A failure is kept in [`PostPager::error`] rather
/// than returned. Calling [`Crawler::fetch_posts`] again starts over from the top.
pub struct PostPager<'a> {
    transport: &'a Transport,
    listing_url: String,
    sort: SortMode,
    time_filter: TimeFilter,
    options: ParseOptions,
    max: usize,
    yielded: usize,
    after: Option<String>,
    buffer: VecDeque<Post>,
    exhausted: bool,
    pages: u64,
    error: Option<HarvestError>,
}

impl<'a> PostPager<'a> {
    fn new(
        transport: &'a Transport,
        base_url: &str,
        source: &str,
        max: usize,
        sort: SortMode,
        time_filter: TimeFilter,
        options: ParseOptions,
    ) -> Self {
        Self {
            transport,
            listing_url: format!("{}/r/{}/{}.json", base_url.trim_end_matches('/'), source, sort),
            sort,
            time_filter,
            options,
            max,
            yielded: 0,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
            pages: 0,
            error: None,
        }
    }

    /// Yields the next post, fetching another page when the current one is used up
    pub async fn next(&mut self) -> Option<Post> {
        loop {
            if self.yielded >= self.max {
                return None;
            }
            if let Some(post) = self.buffer.pop_front() {
                self.yielded += 1;
                return Some(post);
            }
            if self.exhausted {
                return None;
            }
            self.fetch_page().await;
        }
    }

    async fn fetch_page(&mut self) {
        let remaining = self.max - self.yielded;
        let mut params = vec![("limit", remaining.min(MAX_PAGE_SIZE).to_string())];
        if let Some(after) = &self.after {
            params.push(("after", after.clone()));
        }
        if self.sort == SortMode::Top {
            params.push(("t", self.time_filter.as_str().to_string()));
        }

        self.pages += 1;
        tracing::debug!(url = %self.listing_url, page = self.pages, "Fetching listing page");

        let payload = match self.transport.get_json(&self.listing_url, &params).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(url = %self.listing_url, "Error fetching posts: {}", e);
                self.fail(e.into());
                return;
            }
        };

        let page = match parse_post_listing(&payload, &self.options) {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(url = %self.listing_url, "Error parsing listing: {}", e);
                self.fail(e.into());
                return;
            }
        };

        if page.posts.is_empty() {
            tracing::info!("No more posts to fetch");
            self.exhausted = true;
            return;
        }

        self.after = page.after;
        if self.after.is_none() {
            self.exhausted = true;
        }
        self.buffer.extend(page.posts);
    }

    fn fail(&mut self, error: HarvestError) {
        self.error = Some(error);
        self.exhausted = true;
    }

    /// Cursor of the next page, `None` before the first page and after the last
    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }

    /// The error that ended the sequence, if any
    pub fn error(&self) -> Option<&HarvestError> {
        self.error.as_ref()
    }

    /// Number of listing pages requested so far
    pub fn pages_fetched(&self) -> u64 {
        self.pages
    }
}

/// Main crawler structure
///
/// Owns the transport and the store; nothing is shared through globals.
pub struct Crawler<S: Store> {
    config: Config,
    transport: Transport,
    store: S,
    cancel: CancellationToken,
}

impl<S: Store> Crawler<S> {
    /// Creates a new crawler instance
    ///
    /// # Arguments
    ///
    /// * `config` - The harvester configuration
    /// * `store` - Backend that receives every parsed record
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - Successfully created crawler
    /// * `Err(HarvestError)` - The HTTP client could not be built
    pub fn new(config: Config, store: S) -> Result<Self, HarvestError> {
        let transport = Transport::new(&config)?;
        Ok(Self::with_transport(config, transport, store))
    }

    /// Creates a crawler around an existing transport
    pub fn with_transport(config: Config, transport: Transport, store: S) -> Self {
        Self {
            config,
            transport,
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Token that interrupts a running crawl between items when cancelled
    ///
    /// An interrupted crawl replaces the token, so later crawls run normally and
    /// callers fetch a fresh token for the next interrupt.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            include_deleted: self.config.comments.include_deleted,
        }
    }

    /// Starts a lazy sequence over a subreddit listing
    pub fn fetch_posts(&self, source: &str, max: usize, sort: SortMode) -> PostPager<'_> {
        tracing::info!("Fetching posts from r/{} (sort: {}, max: {})", source, sort, max);
        PostPager::new(
            &self.transport,
            &self.config.crawler.base_url,
            source,
            max,
            sort,
            self.config.crawler.time_filter,
            self.parse_options(),
        )
    }

    /// Fetches and flattens a post's comment tree
    ///
    /// Returns an empty list when the fetch or the parse fails.
    pub async fn fetch_comments(&self, post: &Post) -> Vec<Comment> {
        match self.try_fetch_comments(post).await {
            Ok(comments) => comments,
            Err(e) => {
                tracing::error!(post_id = %post.post_id, "Error fetching comments: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_fetch_comments(&self, post: &Post) -> Result<Vec<Comment>, HarvestError> {
        tracing::debug!(post_id = %post.post_id, "Fetching comments");
        let comments = &self.config.comments;
        let url = comments_url(&self.config.crawler.base_url, &post.permalink);
        let params = [
            ("limit", comments.max_per_post.to_string()),
            ("depth", comments.max_depth.to_string()),
        ];
        let payload = self.transport.get_json(&url, &params).await?;
        let page = parse_comments_page(
            &payload,
            &post.post_id,
            &post.subreddit,
            comments.max_depth,
            &self.parse_options(),
        )?;
        tracing::debug!(post_id = %post.post_id, "Fetched {} comments", page.comments.len());
        Ok(page.comments)
    }

    /// Crawls a subreddit into the store
    ///
    /// Per-item failures are collected in [`CrawlResult::errors`]; the only error
    /// returned is [`HarvestError::FatalInit`] when the store cannot be reached.
    ///
    /// # Arguments
    ///
    /// * `source` - Subreddit name
    /// * `max_posts` - Upper bound on posts taken from the listing
    /// * `with_comments` - Fetch each post's comments (also gated by `comments.enabled`)
    /// * `resume` - Start from the stored crawl state of `source`, if any
    pub async fn crawl(
        &mut self,
        source: &str,
        max_posts: usize,
        with_comments: bool,
        resume: bool,
    ) -> Result<CrawlResult, HarvestError> {
        self.crawl_sorted(source, max_posts, self.config.crawler.sort, with_comments, resume)
            .await
    }

    /// Crawls the newest posts with comments and without resuming
    ///
    /// Repeated passes re-observe recent items and pick up changes through the
    /// content hash.
    pub async fn crawl_incremental(
        &mut self,
        source: &str,
        max_posts: usize,
    ) -> Result<CrawlResult, HarvestError> {
        tracing::info!("Starting incremental crawl of r/{}", source);
        self.crawl_sorted(source, max_posts, SortMode::New, true, false)
            .await
    }

    async fn crawl_sorted(
        &mut self,
        source: &str,
        max_posts: usize,
        sort: SortMode,
        with_comments: bool,
        resume: bool,
    ) -> Result<CrawlResult, HarvestError> {
        let started_at = Utc::now();
        let start_time = Instant::now();

        if let Err(e) = self.store.ping() {
            tracing::error!("Store unavailable, aborting crawl: {}", e);
            return Err(HarvestError::FatalInit(e.to_string()));
        }

        self.store.reset_stats();
        self.transport.reset_stats();

        let mut errors = Vec::new();
        let mut state = self.initial_state(source, resume, started_at);
        save_checkpoint(&mut self.store, &state, &mut errors);

        let fetch_comments = with_comments && self.config.comments.enabled;
        let checkpoint_every = self.config.crawler.checkpoint_every.max(1) as u64;

        tracing::info!(
            "Starting crawl of r/{} (max_posts={}, comments={})",
            source,
            max_posts,
            fetch_comments
        );

        let mut posts_processed: u64 = 0;
        let mut comments_processed: u64 = 0;
        let mut last_post_id = None;
        let mut interrupted = false;

        let mut pager = PostPager::new(
            &self.transport,
            &self.config.crawler.base_url,
            source,
            max_posts,
            sort,
            self.config.crawler.time_filter,
            self.parse_options(),
        );

        loop {
            let post = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                post = pager.next() => post,
            };
            let Some(post) = post else {
                break;
            };

            posts_processed += 1;
            last_post_id = Some(post.post_id.clone());

            if self.store.upsert_post(&post).action == UpsertAction::Error {
                errors.push(CrawlErrorEntry {
                    operation: CrawlOperation::UpsertPost,
                    item_id: post.post_id.clone(),
                    message: format!("Failed to upsert post {}", post.post_id),
                });
            } else if fetch_comments {
                let fetched = self.try_fetch_comments(&post).await;
                match fetched {
                    Ok(comments) => {
                        for comment in &comments {
                            comments_processed += 1;
                            if self.store.upsert_comment(comment).is_error() {
                                errors.push(CrawlErrorEntry {
                                    operation: CrawlOperation::UpsertComment,
                                    item_id: comment.comment_id.clone(),
                                    message: format!(
                                        "Failed to upsert comment {}",
                                        comment.comment_id
                                    ),
                                });
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(post_id = %post.post_id, "Error fetching comments: {}", e);
                        errors.push(CrawlErrorEntry {
                            operation: CrawlOperation::FetchComments,
                            item_id: post.post_id.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            if posts_processed % checkpoint_every == 0 {
                state.posts_crawled = posts_processed;
                state.comments_crawled = comments_processed;
                state.last_post_id = last_post_id.clone();
                state.after_token = pager.after().map(str::to_string);
                state.last_activity = Utc::now();
                save_checkpoint(&mut self.store, &state, &mut errors);

                let rate = posts_processed as f64 / start_time.elapsed().as_secs_f64().max(f64::EPSILON);
                tracing::info!(
                    "Progress: {} posts, {} comments, {:.2} posts/sec",
                    posts_processed,
                    comments_processed,
                    rate
                );
            }
        }

        if let Some(e) = pager.error() {
            errors.push(CrawlErrorEntry {
                operation: CrawlOperation::FetchListing,
                item_id: source.to_string(),
                message: e.to_string(),
            });
        }
        let after = pager.after().map(str::to_string);
        drop(pager);

        if interrupted {
            tracing::warn!("Crawl interrupted");
            self.cancel = CancellationToken::new();
            errors.push(CrawlErrorEntry {
                operation: CrawlOperation::Interrupted,
                item_id: source.to_string(),
                message: "Crawl interrupted".to_string(),
            });
        }

        state.posts_crawled = posts_processed;
        state.comments_crawled = comments_processed;
        if last_post_id.is_some() {
            state.last_post_id = last_post_id;
        }
        state.after_token = after;
        state.last_activity = Utc::now();
        state.is_complete = !interrupted;
        save_checkpoint(&mut self.store, &state, &mut errors);

        let stats = self.store.get_stats().unwrap_or_else(|e| {
            tracing::warn!("Failed to read store statistics: {}", e);
            StoreStats::default()
        });

        let result = CrawlResult {
            source: source.to_string(),
            posts_fetched: posts_processed,
            posts_inserted: stats.posts_inserted,
            posts_updated: stats.posts_updated,
            comments_fetched: comments_processed,
            comments_inserted: stats.comments_inserted,
            comments_updated: stats.comments_updated,
            errors,
            duration: start_time.elapsed(),
            started_at,
            completed_at: Utc::now(),
            interrupted,
        };

        tracing::info!("Crawl completed in {:.2?}", result.duration);
        tracing::info!(
            "Posts: {} inserted, {} updated",
            result.posts_inserted,
            result.posts_updated
        );
        tracing::info!(
            "Comments: {} inserted, {} updated",
            result.comments_inserted,
            result.comments_updated
        );
        if !result.errors.is_empty() {
            tracing::warn!("Crawl completed with {} errors", result.errors.len());
        }

        Ok(result)
    }

    fn initial_state(&self, source: &str, resume: bool, now: DateTime<Utc>) -> CrawlState {
        if resume {
            match self.store.get_crawl_state(source) {
                Ok(Some(mut state)) => {
                    tracing::info!(
                        "Resuming crawl from previous state: {} posts",
                        state.posts_crawled
                    );
                    state.is_complete = false;
                    state.last_activity = now;
                    return state;
                }
                Ok(None) => tracing::info!("No previous crawl state for r/{}", source),
                Err(e) => tracing::warn!("Failed to load crawl state: {}", e),
            }
        }
        CrawlState::new(source, now)
    }

    /// Combined transport and store statistics
    pub fn get_stats(&self) -> Result<CrawlerStats, StorageError> {
        Ok(CrawlerStats {
            transport: self.transport.stats(),
            store: self.store.get_stats()?,
        })
    }

    /// Forgets the stored crawl state of a source
    pub fn reset_crawl_state(&mut self, source: &str) -> Result<bool, StorageError> {
        let existed = self.store.reset_crawl_state(source)?;
        if existed {
            tracing::info!("Reset crawl state for r/{}", source);
        }
        Ok(existed)
    }

    /// Posts (and optionally comments) of the store, shaped for batch hand-off
    pub fn export_for_downstream(&self, options: &ExportOptions) -> Result<Export, StorageError> {
        export_for_downstream(&self.store, options)
    }
}

fn comments_url(base_url: &str, permalink: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if permalink.starts_with('/') {
        format!("{}{}.json", base, permalink)
    } else {
        format!("{}/{}.json", base, permalink)
    }
}

fn save_checkpoint<S: Store>(store: &mut S, state: &CrawlState, errors: &mut Vec<CrawlErrorEntry>) {
    match store.save_crawl_state(state) {
        Ok(()) => tracing::debug!(
            source = %state.source,
            posts = state.posts_crawled,
            "Saved crawl state"
        ),
        Err(e) => {
            tracing::error!(source = %state.source, "Failed to save crawl state: {}", e);
            errors.push(CrawlErrorEntry {
                operation: CrawlOperation::Checkpoint,
                item_id: state.source.clone(),
                message: e.to_string(),
            });
        }
    }
}
