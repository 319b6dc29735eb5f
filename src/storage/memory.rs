//! In-memory storage backend
//!
//! Mirrors the SQLite backend's contract, including ordering, so tests and
//! throwaway crawls can run without a database file. Nothing survives the process.

use crate::model::{
    ChangeLogEntry, Comment, ContentType, CrawlState, Post, UpsertAction, UpsertOutcome,
    CHANGE_CONTENT_UPDATED,
};
use crate::storage::traits::{
    ChangeFilter, CommentFilter, PostFilter, PostSort, Store, StorageError, StorageResult,
    StoreStats, UpsertCounters,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// Store that keeps every record in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Posts in insertion order, indexed by post ID
    posts: Vec<Post>,
    post_index: HashMap<String, usize>,

    comments: Vec<Comment>,
    comment_index: HashMap<String, usize>,

    crawl_states: HashMap<String, CrawlState>,
    changes: Vec<ChangeLogEntry>,
    counters: UpsertCounters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_post(&mut self, post: &Post, now: DateTime<Utc>) -> StorageResult<()> {
        if self.post_index.contains_key(&post.post_id) {
            return Err(StorageError::ConstraintViolation(format!(
                "post {} already exists",
                post.post_id
            )));
        }
        let mut stored = post.clone();
        stored.first_seen = now;
        stored.last_updated = now;
        self.post_index
            .insert(stored.post_id.clone(), self.posts.len());
        self.posts.push(stored);
        Ok(())
    }

    fn insert_comment(&mut self, comment: &Comment, now: DateTime<Utc>) -> StorageResult<()> {
        if self.comment_index.contains_key(&comment.comment_id) {
            return Err(StorageError::ConstraintViolation(format!(
                "comment {} already exists",
                comment.comment_id
            )));
        }
        let mut stored = comment.clone();
        stored.first_seen = now;
        stored.last_updated = now;
        self.comment_index
            .insert(stored.comment_id.clone(), self.comments.len());
        self.comments.push(stored);
        Ok(())
    }

    fn log_change(
        &mut self,
        content_type: ContentType,
        content_id: &str,
        old_value: Value,
        new_value: Value,
        now: DateTime<Utc>,
    ) {
        let id = self.changes.len() as i64 + 1;
        self.changes.push(ChangeLogEntry {
            id,
            content_type,
            content_id: content_id.to_string(),
            change_type: CHANGE_CONTENT_UPDATED.to_string(),
            old_value,
            new_value,
            changed_at: now,
        });
    }

    fn try_upsert_post(&mut self, post: &Post) -> StorageResult<UpsertAction> {
        let now = Utc::now();

        let Some(&index) = self.post_index.get(&post.post_id) else {
            self.insert_post(post, now)?;
            return Ok(UpsertAction::Inserted);
        };

        let stored = &mut self.posts[index];
        if stored.content_hash == post.content_hash {
            stored.last_updated = now;
            return Ok(UpsertAction::Unchanged);
        }

        let old_value = stored.snapshot();
        let mut updated = post.clone();
        updated.first_seen = stored.first_seen;
        updated.last_updated = now;
        updated.comment_ids = std::mem::take(&mut stored.comment_ids);
        updated.comments_fetched_at = stored.comments_fetched_at;
        *stored = updated;

        self.log_change(ContentType::Post, &post.post_id, old_value, post.snapshot(), now);
        Ok(UpsertAction::Updated)
    }

    fn try_upsert_comment(&mut self, comment: &Comment) -> StorageResult<UpsertAction> {
        let now = Utc::now();

        let Some(&index) = self.comment_index.get(&comment.comment_id) else {
            self.insert_comment(comment, now)?;
            return Ok(UpsertAction::Inserted);
        };

        let stored = &mut self.comments[index];
        if stored.content_hash == comment.content_hash {
            stored.last_updated = now;
            return Ok(UpsertAction::Unchanged);
        }

        let old_value = stored.snapshot();
        let mut updated = comment.clone();
        updated.first_seen = stored.first_seen;
        updated.last_updated = now;
        *stored = updated;

        self.log_change(
            ContentType::Comment,
            &comment.comment_id,
            old_value,
            comment.snapshot(),
            now,
        );
        Ok(UpsertAction::Updated)
    }

    fn register_comment_id(&mut self, post_id: &str, comment_id: &str) -> bool {
        let Some(&index) = self.post_index.get(post_id) else {
            return false;
        };
        let post = &mut self.posts[index];
        if !post.comment_ids.iter().any(|id| id == comment_id) {
            post.comment_ids.push(comment_id.to_string());
        }
        post.comments_fetched_at = Some(Utc::now());
        true
    }
}

impl Store for MemoryStore {
    // ===== Connectivity =====

    fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    // ===== Posts =====

    fn upsert_post(&mut self, post: &Post) -> UpsertOutcome {
        match self.try_upsert_post(post) {
            Ok(action) => {
                self.counters.record(ContentType::Post, action);
                UpsertOutcome::from(action)
            }
            Err(e) if e.is_constraint_violation() => {
                tracing::warn!(post_id = %post.post_id, "Duplicate post: {}", e);
                UpsertOutcome::duplicate()
            }
            Err(e) => {
                tracing::error!(post_id = %post.post_id, "Failed to upsert post: {}", e);
                UpsertOutcome::error()
            }
        }
    }

    fn get_post(&self, post_id: &str) -> StorageResult<Option<Post>> {
        Ok(self
            .post_index
            .get(post_id)
            .map(|&index| self.posts[index].clone()))
    }

    fn get_posts(&self, filter: &PostFilter) -> StorageResult<Vec<Post>> {
        let mut matched: Vec<&Post> = self
            .posts
            .iter()
            .filter(|p| filter.subreddit.as_ref().map_or(true, |s| &p.subreddit == s))
            .filter(|p| filter.min_score.map_or(true, |min| p.score >= min))
            .filter(|p| {
                filter
                    .flair
                    .as_ref()
                    .map_or(true, |f| p.flair_text.as_ref() == Some(f))
            })
            .filter(|p| within(p.created_at, filter.since, filter.until))
            .collect();

        matched.sort_by(|a, b| {
            let ordering = match filter.sort {
                PostSort::CreatedAt => a.created_at.cmp(&b.created_at),
                PostSort::Score => a.score.cmp(&b.score),
                PostSort::NumComments => a.num_comments.cmp(&b.num_comments),
                PostSort::FetchedAt => a.fetched_at.cmp(&b.fetched_at),
            };
            let ordering = if filter.descending {
                ordering.reverse()
            } else {
                ordering
            };
            ordering.then_with(|| a.post_id.cmp(&b.post_id))
        });

        Ok(page(matched, filter.offset, filter.limit))
    }

    fn search_posts(&self, text: &str, limit: usize) -> StorageResult<Vec<Post>> {
        let needle = text.to_ascii_lowercase();
        let mut matched: Vec<&Post> = self
            .posts
            .iter()
            .filter(|p| {
                p.title.to_ascii_lowercase().contains(&needle)
                    || p.selftext.to_ascii_lowercase().contains(&needle)
            })
            .collect();
        matched.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.post_id.cmp(&b.post_id)));
        Ok(page(matched, 0, Some(limit)))
    }

    // ===== Comments =====

    fn upsert_comment(&mut self, comment: &Comment) -> UpsertOutcome {
        let action = match self.try_upsert_comment(comment) {
            Ok(action) => action,
            Err(e) if e.is_constraint_violation() => {
                tracing::warn!(comment_id = %comment.comment_id, "Duplicate comment: {}", e);
                return UpsertOutcome::duplicate();
            }
            Err(e) => {
                tracing::error!(
                    comment_id = %comment.comment_id,
                    "Failed to upsert comment: {}",
                    e
                );
                return UpsertOutcome::error();
            }
        };

        self.counters.record(ContentType::Comment, action);

        if action == UpsertAction::Inserted
            && !self.register_comment_id(&comment.post_id, &comment.comment_id)
        {
            tracing::debug!(
                post_id = %comment.post_id,
                "Parent post not stored, comment ID not registered"
            );
        }

        UpsertOutcome::from(action)
    }

    fn get_comment(&self, comment_id: &str) -> StorageResult<Option<Comment>> {
        Ok(self
            .comment_index
            .get(comment_id)
            .map(|&index| self.comments[index].clone()))
    }

    fn get_comments_for_post(&self, post_id: &str) -> StorageResult<Vec<Comment>> {
        Ok(oldest_first(
            self.comments.iter().filter(|c| c.post_id == post_id),
        ))
    }

    fn get_comment_thread(&self, parent_id: &str) -> StorageResult<Vec<Comment>> {
        Ok(oldest_first(
            self.comments.iter().filter(|c| c.parent_id == parent_id),
        ))
    }

    fn get_comments(&self, filter: &CommentFilter) -> StorageResult<Vec<Comment>> {
        let mut matched: Vec<&Comment> = self
            .comments
            .iter()
            .filter(|c| filter.subreddit.as_ref().map_or(true, |s| &c.subreddit == s))
            .filter(|c| filter.min_score.map_or(true, |min| c.score >= min))
            .filter(|c| filter.max_depth.map_or(true, |max| c.depth <= max))
            .filter(|c| within(c.created_at, filter.since, None))
            .collect();

        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.comment_id.cmp(&b.comment_id))
        });

        Ok(page(matched, filter.offset, filter.limit))
    }

    fn search_comments(&self, text: &str, limit: usize) -> StorageResult<Vec<Comment>> {
        let needle = text.to_ascii_lowercase();
        let mut matched: Vec<&Comment> = self
            .comments
            .iter()
            .filter(|c| c.body.to_ascii_lowercase().contains(&needle))
            .collect();
        matched.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.comment_id.cmp(&b.comment_id))
        });
        Ok(page(matched, 0, Some(limit)))
    }

    // ===== Change Log =====

    fn get_changes(&self, filter: &ChangeFilter) -> StorageResult<Vec<ChangeLogEntry>> {
        let mut matched: Vec<&ChangeLogEntry> = self
            .changes
            .iter()
            .filter(|e| filter.content_type.map_or(true, |t| e.content_type == t))
            .filter(|e| filter.since.map_or(true, |since| e.changed_at >= since))
            .collect();
        matched.sort_by(|a, b| b.changed_at.cmp(&a.changed_at).then_with(|| b.id.cmp(&a.id)));
        Ok(page(matched, 0, filter.limit))
    }

    // ===== Crawl State =====

    fn get_crawl_state(&self, source: &str) -> StorageResult<Option<CrawlState>> {
        Ok(self.crawl_states.get(source).cloned())
    }

    fn save_crawl_state(&mut self, state: &CrawlState) -> StorageResult<()> {
        let mut saved = state.clone();
        if let Some(existing) = self.crawl_states.get(&state.source) {
            saved.started_at = existing.started_at;
        }
        self.crawl_states.insert(saved.source.clone(), saved);
        Ok(())
    }

    fn reset_crawl_state(&mut self, source: &str) -> StorageResult<bool> {
        Ok(self.crawl_states.remove(source).is_some())
    }

    // ===== Statistics =====

    fn get_stats(&self) -> StorageResult<StoreStats> {
        Ok(self.counters.with_totals(
            self.posts.len() as u64,
            self.comments.len() as u64,
            self.changes.len() as u64,
        ))
    }

    fn reset_stats(&mut self) {
        self.counters = UpsertCounters::default();
    }
}

/// Time-range check where an unknown creation time never matches a bound
fn within(
    at: Option<DateTime<Utc>>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> bool {
    match at {
        Some(at) => since.map_or(true, |s| at >= s) && until.map_or(true, |u| at <= u),
        None => since.is_none() && until.is_none(),
    }
}

/// Stable sort by creation time; unknown times sort first, ties keep insertion order
fn oldest_first<'a>(comments: impl Iterator<Item = &'a Comment>) -> Vec<Comment> {
    let mut matched: Vec<&Comment> = comments.collect();
    matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    matched.into_iter().cloned().collect()
}

fn page<T: Clone>(items: Vec<&T>, offset: usize, limit: Option<usize>) -> Vec<T> {
    let items = items.into_iter().skip(offset);
    match limit {
        Some(limit) => items.take(limit).cloned().collect(),
        None => items.cloned().collect(),
    }
}
