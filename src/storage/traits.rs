//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends, the query filters
//! they accept, and associated error types.

use crate::model::{ChangeLogEntry, Comment, ContentType, CrawlState, Post, UpsertAction, UpsertOutcome};
use chrono::{DateTime, Utc};
use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether this error is a uniqueness/constraint failure rather than a broken store
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            StorageError::ConstraintViolation(_) => true,
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => {
                failure.code == ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Column a post query is ordered by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PostSort {
    #[default]
    CreatedAt,
    Score,
    NumComments,
    FetchedAt,
}

/// Post query filter; unset fields do not constrain the result
#[derive(Debug, Clone)]
pub struct PostFilter {
    pub subreddit: Option<String>,
    pub min_score: Option<i64>,
    pub flair: Option<String>,
    /// Only posts created at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Only posts created at or before this time
    pub until: Option<DateTime<Utc>>,
    pub sort: PostSort,
    pub descending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Default for PostFilter {
    fn default() -> Self {
        Self {
            subreddit: None,
            min_score: None,
            flair: None,
            since: None,
            until: None,
            sort: PostSort::CreatedAt,
            descending: true,
            limit: Some(100),
            offset: 0,
        }
    }
}

/// Comment query filter, newest first
#[derive(Debug, Clone)]
pub struct CommentFilter {
    pub subreddit: Option<String>,
    pub min_score: Option<i64>,
    pub max_depth: Option<u32>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Default for CommentFilter {
    fn default() -> Self {
        Self {
            subreddit: None,
            min_score: None,
            max_depth: None,
            since: None,
            limit: Some(100),
            offset: 0,
        }
    }
}

/// Change-log query filter, most recent first
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    pub content_type: Option<ContentType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self {
            content_type: None,
            since: None,
            limit: Some(100),
        }
    }
}

/// Per-run counters plus table totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub posts_inserted: u64,
    pub posts_updated: u64,
    pub comments_inserted: u64,
    pub comments_updated: u64,
    pub changes_logged: u64,
    pub total_posts: u64,
    pub total_comments: u64,
    pub total_changes: u64,
}

/// Per-run upsert counters shared by the backends
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UpsertCounters {
    posts_inserted: u64,
    posts_updated: u64,
    comments_inserted: u64,
    comments_updated: u64,
    changes_logged: u64,
}

impl UpsertCounters {
    pub(crate) fn record(&mut self, content_type: ContentType, action: UpsertAction) {
        let (inserted, updated) = match content_type {
            ContentType::Post => (&mut self.posts_inserted, &mut self.posts_updated),
            ContentType::Comment => (&mut self.comments_inserted, &mut self.comments_updated),
        };
        match action {
            UpsertAction::Inserted => *inserted += 1,
            UpsertAction::Updated => {
                *updated += 1;
                self.changes_logged += 1;
            }
            UpsertAction::Unchanged | UpsertAction::Duplicate | UpsertAction::Error => {}
        }
    }

    pub(crate) fn with_totals(&self, posts: u64, comments: u64, changes: u64) -> StoreStats {
        StoreStats {
            posts_inserted: self.posts_inserted,
            posts_updated: self.posts_updated,
            comments_inserted: self.comments_inserted,
            comments_updated: self.comments_updated,
            changes_logged: self.changes_logged,
            total_posts: posts,
            total_comments: comments,
            total_changes: changes,
        }
    }
}

/// Change-aware persistence for posts, comments, crawl state and the change log
///
/// Upserts never fail: expected failures come back as an [`UpsertOutcome`] so the
/// crawler can record them and move on. Both backends satisfy the same contract:
///
/// - absent record: insert with `first_seen = now`, report `Inserted`
/// - stored `content_hash` differs: log a change, overwrite everything except
///   `first_seen` (and a post's registered comment IDs), report `Updated`
/// - hashes match: touch `last_updated` only, report `Unchanged`
/// - uniqueness violation on insert: report `Duplicate`
/// - anything else: roll back, report `Error`
pub trait Store {
    // ===== Connectivity =====

    /// Checks that the backend is reachable
    fn ping(&self) -> StorageResult<()>;

    // ===== Posts =====

    /// Inserts or updates a post
    fn upsert_post(&mut self, post: &Post) -> UpsertOutcome;

    /// Gets a post by ID
    fn get_post(&self, post_id: &str) -> StorageResult<Option<Post>>;

    /// Gets posts matching a filter
    fn get_posts(&self, filter: &PostFilter) -> StorageResult<Vec<Post>>;

    /// Case-insensitive substring search over title and selftext, highest score first
    fn search_posts(&self, text: &str, limit: usize) -> StorageResult<Vec<Post>>;

    // ===== Comments =====

    /// Inserts or updates a comment
    ///
    /// A newly inserted comment is also registered against its parent post's comment
    /// IDs, stamping `comments_fetched_at`. That step is idempotent and best-effort: it
    /// runs after the comment is stored and does nothing when the post is unknown.
    fn upsert_comment(&mut self, comment: &Comment) -> UpsertOutcome;

    /// Gets a comment by ID
    fn get_comment(&self, comment_id: &str) -> StorageResult<Option<Comment>>;

    /// Gets all comments of a post, oldest first
    fn get_comments_for_post(&self, post_id: &str) -> StorageResult<Vec<Comment>>;

    /// Gets the direct replies to a post or comment, oldest first
    fn get_comment_thread(&self, parent_id: &str) -> StorageResult<Vec<Comment>>;

    /// Gets comments matching a filter
    fn get_comments(&self, filter: &CommentFilter) -> StorageResult<Vec<Comment>>;

    /// Case-insensitive substring search over comment bodies, highest score first
    fn search_comments(&self, text: &str, limit: usize) -> StorageResult<Vec<Comment>>;

    // ===== Change Log =====

    /// Gets change-log entries matching a filter
    fn get_changes(&self, filter: &ChangeFilter) -> StorageResult<Vec<ChangeLogEntry>>;

    // ===== Crawl State =====

    /// Gets the crawl state of a source
    fn get_crawl_state(&self, source: &str) -> StorageResult<Option<CrawlState>>;

    /// Saves the crawl state of a source, keeping the stored `started_at` if one exists
    fn save_crawl_state(&mut self, state: &CrawlState) -> StorageResult<()>;

    /// Deletes the crawl state of a source
    ///
    /// # Returns
    ///
    /// Whether a state existed
    fn reset_crawl_state(&mut self, source: &str) -> StorageResult<bool>;

    // ===== Statistics =====

    /// Gets the per-run counters and table totals
    fn get_stats(&self) -> StorageResult<StoreStats>;

    /// Clears the per-run counters
    fn reset_stats(&mut self);
}

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern
pub(crate) fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
