//! Crawler module for listing and comment ingestion
//!
//! This module contains the core crawling logic, including:
//! - Paced HTTP transport with retry logic
//! - Pure parsing of listing and comment-tree payloads
//! - Crawl orchestration with checkpoints and cancellation
//! - Periodic incremental crawling

mod coordinator;
mod fetcher;
mod parser;
mod rate_limiter;
mod scheduler;

pub use coordinator::{
    CrawlErrorEntry, CrawlOperation, CrawlResult, Crawler, CrawlerStats, PostPager, MAX_PAGE_SIZE,
};
pub use fetcher::{build_http_client, Response, Transport, TransportError, TransportStats};
pub use parser::{
    compute_content_hash, normalize_parent_id, parse_comment, parse_comments_page, parse_post,
    parse_post_listing, parse_timestamp, CommentsPage, ParseError, ParseOptions, PostPage,
};
pub use rate_limiter::RateLimiter;
pub use scheduler::{Scheduler, SchedulerHandle};
