//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait. Every
//! upsert runs in its own transaction, so a failing record rolls back alone.

use crate::model::{
    ChangeLogEntry, Comment, ContentType, CrawlState, Post, UpsertAction, UpsertOutcome,
    CHANGE_CONTENT_UPDATED,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    like_pattern, ChangeFilter, CommentFilter, PostFilter, PostSort, Store,
    StorageResult, StoreStats, UpsertCounters,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{named_params, params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

const POST_COLUMNS: &str = "post_id, permalink, url, title, selftext, selftext_html, author, \
     author_is_deleted, subreddit, subreddit_id, score, upvote_ratio, num_comments, gilded, \
     media, flair_text, flair_css_class, edited, edited_at, deleted, removed, stickied, locked, \
     spoiler, nsfw, created_at, first_seen, last_updated, fetched_at, content_hash, \
     comment_ids, comments_fetched_at";

const COMMENT_COLUMNS: &str = "comment_id, post_id, parent_id, body, body_html, author, \
     author_is_deleted, score, controversial, gilded, is_submitter, edited, edited_at, deleted, \
     removed, stickied, depth, reply_count, created_at, first_seen, last_updated, fetched_at, \
     content_hash, subreddit";

const CHANGE_COLUMNS: &str =
    "id, content_type, content_id, change_type, old_value, new_value, changed_at";

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
    counters: UpsertCounters,
}

impl SqliteStore {
    /// Creates a new SqliteStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        tracing::debug!("Opened SQLite store at {}", path.display());

        Ok(Self {
            conn,
            counters: UpsertCounters::default(),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            counters: UpsertCounters::default(),
        })
    }

    fn try_upsert_post(&mut self, post: &Post) -> StorageResult<UpsertAction> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;

        let stored = tx
            .query_row(
                &format!("SELECT {} FROM posts WHERE post_id = ?1", POST_COLUMNS),
                params![post.post_id],
                row_to_post,
            )
            .optional()?;

        let action = match stored {
            None => {
                insert_post(&tx, post, now)?;
                UpsertAction::Inserted
            }
            Some(stored) if stored.content_hash == post.content_hash => {
                tx.execute(
                    "UPDATE posts SET last_updated = ?1 WHERE post_id = ?2",
                    params![ts(&now), post.post_id],
                )?;
                UpsertAction::Unchanged
            }
            Some(stored) => {
                log_change(
                    &tx,
                    ContentType::Post,
                    &post.post_id,
                    &stored.snapshot(),
                    &post.snapshot(),
                    now,
                )?;
                update_post(&tx, post, now)?;
                UpsertAction::Updated
            }
        };

        tx.commit()?;
        Ok(action)
    }

    fn try_upsert_comment(&mut self, comment: &Comment) -> StorageResult<UpsertAction> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;

        let stored = tx
            .query_row(
                &format!("SELECT {} FROM comments WHERE comment_id = ?1", COMMENT_COLUMNS),
                params![comment.comment_id],
                row_to_comment,
            )
            .optional()?;

        let action = match stored {
            None => {
                insert_comment(&tx, comment, now)?;
                UpsertAction::Inserted
            }
            Some(stored) if stored.content_hash == comment.content_hash => {
                tx.execute(
                    "UPDATE comments SET last_updated = ?1 WHERE comment_id = ?2",
                    params![ts(&now), comment.comment_id],
                )?;
                UpsertAction::Unchanged
            }
            Some(stored) => {
                log_change(
                    &tx,
                    ContentType::Comment,
                    &comment.comment_id,
                    &stored.snapshot(),
                    &comment.snapshot(),
                    now,
                )?;
                update_comment(&tx, comment, now)?;
                UpsertAction::Updated
            }
        };

        tx.commit()?;
        Ok(action)
    }

    /// Adds a comment ID to its post's comment set and stamps `comments_fetched_at`
    ///
    /// Returns false when the post is not stored.
    fn register_comment_id(&self, post_id: &str, comment_id: &str) -> StorageResult<bool> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT comment_ids FROM posts WHERE post_id = ?1",
                params![post_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(false);
        };

        let mut ids: Vec<String> = serde_json::from_str(&raw)?;
        if !ids.iter().any(|id| id == comment_id) {
            ids.push(comment_id.to_string());
        }

        self.conn.execute(
            "UPDATE posts SET comment_ids = ?1, comments_fetched_at = ?2 WHERE post_id = ?3",
            params![serde_json::to_string(&ids)?, ts(&Utc::now()), post_id],
        )?;
        Ok(true)
    }

    fn count(&self, table: &str) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

impl Store for SqliteStore {
    // ===== Connectivity =====

    fn ping(&self) -> StorageResult<()> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    // ===== Posts =====

    fn upsert_post(&mut self, post: &Post) -> UpsertOutcome {
        match self.try_upsert_post(post) {
            Ok(action) => {
                self.counters.record(ContentType::Post, action);
                tracing::trace!(post_id = %post.post_id, "Post {}", action);
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
        let post = self
            .conn
            .query_row(
                &format!("SELECT {} FROM posts WHERE post_id = ?1", POST_COLUMNS),
                params![post_id],
                row_to_post,
            )
            .optional()?;
        Ok(post)
    }

    fn get_posts(&self, filter: &PostFilter) -> StorageResult<Vec<Post>> {
        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(subreddit) = &filter.subreddit {
            conditions.push("subreddit = ?");
            values.push(Box::new(subreddit.clone()));
        }
        if let Some(min_score) = filter.min_score {
            conditions.push("score >= ?");
            values.push(Box::new(min_score));
        }
        if let Some(flair) = &filter.flair {
            conditions.push("flair_text = ?");
            values.push(Box::new(flair.clone()));
        }
        if let Some(since) = &filter.since {
            conditions.push("created_at >= ?");
            values.push(Box::new(ts(since)));
        }
        if let Some(until) = &filter.until {
            conditions.push("created_at <= ?");
            values.push(Box::new(ts(until)));
        }

        let column = match filter.sort {
            PostSort::CreatedAt => "created_at",
            PostSort::Score => "score",
            PostSort::NumComments => "num_comments",
            PostSort::FetchedAt => "fetched_at",
        };
        let direction = if filter.descending { "DESC" } else { "ASC" };

        values.push(Box::new(sql_limit(filter.limit)));
        values.push(Box::new(sql_offset(filter.offset)));

        let sql = format!(
            "SELECT {} FROM posts {} ORDER BY {} {}, post_id ASC LIMIT ? OFFSET ?",
            POST_COLUMNS,
            where_clause(&conditions),
            column,
            direction
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let posts = stmt
            .query_map(params_from_iter(values.iter()), row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    fn search_posts(&self, text: &str, limit: usize) -> StorageResult<Vec<Post>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM posts
             WHERE title LIKE ?1 ESCAPE '\\' OR selftext LIKE ?1 ESCAPE '\\'
             ORDER BY score DESC, post_id ASC LIMIT ?2",
            POST_COLUMNS
        ))?;
        let posts = stmt
            .query_map(params![like_pattern(text), sql_limit(Some(limit))], row_to_post)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
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

        if action == UpsertAction::Inserted {
            match self.register_comment_id(&comment.post_id, &comment.comment_id) {
                Ok(true) => {}
                Ok(false) => tracing::debug!(
                    post_id = %comment.post_id,
                    "Parent post not stored, comment ID not registered"
                ),
                Err(e) => tracing::warn!(
                    post_id = %comment.post_id,
                    comment_id = %comment.comment_id,
                    "Failed to register comment ID: {}",
                    e
                ),
            }
        }

        UpsertOutcome::from(action)
    }

    fn get_comment(&self, comment_id: &str) -> StorageResult<Option<Comment>> {
        let comment = self
            .conn
            .query_row(
                &format!("SELECT {} FROM comments WHERE comment_id = ?1", COMMENT_COLUMNS),
                params![comment_id],
                row_to_comment,
            )
            .optional()?;
        Ok(comment)
    }

    fn get_comments_for_post(&self, post_id: &str) -> StorageResult<Vec<Comment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM comments WHERE post_id = ?1 ORDER BY created_at ASC, id ASC",
            COMMENT_COLUMNS
        ))?;
        let comments = stmt
            .query_map(params![post_id], row_to_comment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn get_comment_thread(&self, parent_id: &str) -> StorageResult<Vec<Comment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM comments WHERE parent_id = ?1 ORDER BY created_at ASC, id ASC",
            COMMENT_COLUMNS
        ))?;
        let comments = stmt
            .query_map(params![parent_id], row_to_comment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn get_comments(&self, filter: &CommentFilter) -> StorageResult<Vec<Comment>> {
        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(subreddit) = &filter.subreddit {
            conditions.push("subreddit = ?");
            values.push(Box::new(subreddit.clone()));
        }
        if let Some(min_score) = filter.min_score {
            conditions.push("score >= ?");
            values.push(Box::new(min_score));
        }
        if let Some(max_depth) = filter.max_depth {
            conditions.push("depth <= ?");
            values.push(Box::new(max_depth));
        }
        if let Some(since) = &filter.since {
            conditions.push("created_at >= ?");
            values.push(Box::new(ts(since)));
        }

        values.push(Box::new(sql_limit(filter.limit)));
        values.push(Box::new(sql_offset(filter.offset)));

        let sql = format!(
            "SELECT {} FROM comments {} ORDER BY created_at DESC, comment_id ASC LIMIT ? OFFSET ?",
            COMMENT_COLUMNS,
            where_clause(&conditions)
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let comments = stmt
            .query_map(params_from_iter(values.iter()), row_to_comment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    fn search_comments(&self, text: &str, limit: usize) -> StorageResult<Vec<Comment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM comments WHERE body LIKE ?1 ESCAPE '\\'
             ORDER BY score DESC, comment_id ASC LIMIT ?2",
            COMMENT_COLUMNS
        ))?;
        let comments = stmt
            .query_map(params![like_pattern(text), sql_limit(Some(limit))], row_to_comment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    // ===== Change Log =====

    fn get_changes(&self, filter: &ChangeFilter) -> StorageResult<Vec<ChangeLogEntry>> {
        let mut conditions = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(content_type) = filter.content_type {
            conditions.push("content_type = ?");
            values.push(Box::new(content_type.to_db_string()));
        }
        if let Some(since) = &filter.since {
            conditions.push("changed_at >= ?");
            values.push(Box::new(ts(since)));
        }
        values.push(Box::new(sql_limit(filter.limit)));

        let sql = format!(
            "SELECT {} FROM change_log {} ORDER BY changed_at DESC, id DESC LIMIT ?",
            CHANGE_COLUMNS,
            where_clause(&conditions)
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let changes = stmt
            .query_map(params_from_iter(values.iter()), row_to_change)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(changes)
    }

    // ===== Crawl State =====

    fn get_crawl_state(&self, source: &str) -> StorageResult<Option<CrawlState>> {
        let state = self
            .conn
            .query_row(
                "SELECT source, last_post_id, after_token, posts_crawled, comments_crawled,
                 started_at, last_activity, is_complete
                 FROM crawl_states WHERE source = ?1",
                params![source],
                |row| {
                    Ok(CrawlState {
                        source: row.get("source")?,
                        last_post_id: row.get("last_post_id")?,
                        after_token: row.get("after_token")?,
                        posts_crawled: read_count(row, "posts_crawled")?,
                        comments_crawled: read_count(row, "comments_crawled")?,
                        started_at: read_ts(row, "started_at")?,
                        last_activity: read_ts(row, "last_activity")?,
                        is_complete: row.get("is_complete")?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn save_crawl_state(&mut self, state: &CrawlState) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO crawl_states (
                source, last_post_id, after_token, posts_crawled, comments_crawled,
                started_at, last_activity, is_complete
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(source) DO UPDATE SET
                last_post_id = excluded.last_post_id,
                after_token = excluded.after_token,
                posts_crawled = excluded.posts_crawled,
                comments_crawled = excluded.comments_crawled,
                last_activity = excluded.last_activity,
                is_complete = excluded.is_complete",
            params![
                state.source,
                state.last_post_id,
                state.after_token,
                i64::try_from(state.posts_crawled).unwrap_or(i64::MAX),
                i64::try_from(state.comments_crawled).unwrap_or(i64::MAX),
                ts(&state.started_at),
                ts(&state.last_activity),
                state.is_complete,
            ],
        )?;
        Ok(())
    }

    fn reset_crawl_state(&mut self, source: &str) -> StorageResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM crawl_states WHERE source = ?1", params![source])?;
        Ok(deleted > 0)
    }

    // ===== Statistics =====

    fn get_stats(&self) -> StorageResult<StoreStats> {
        Ok(self.counters.with_totals(
            self.count("posts")?,
            self.count("comments")?,
            self.count("change_log")?,
        ))
    }

    fn reset_stats(&mut self) {
        self.counters = UpsertCounters::default();
    }
}

// ===== Writes =====

fn insert_post(tx: &Transaction<'_>, post: &Post, now: DateTime<Utc>) -> StorageResult<()> {
    let now = ts(&now);
    tx.execute(
        "INSERT INTO posts (
            post_id, permalink, url, title, selftext, selftext_html, author, author_is_deleted,
            subreddit, subreddit_id, score, upvote_ratio, num_comments, gilded, media,
            flair_text, flair_css_class, edited, edited_at, deleted, removed, stickied, locked,
            spoiler, nsfw, created_at, first_seen, last_updated, fetched_at, content_hash,
            comment_ids, comments_fetched_at
         ) VALUES (
            :post_id, :permalink, :url, :title, :selftext, :selftext_html, :author,
            :author_is_deleted, :subreddit, :subreddit_id, :score, :upvote_ratio,
            :num_comments, :gilded, :media, :flair_text, :flair_css_class, :edited,
            :edited_at, :deleted, :removed, :stickied, :locked, :spoiler, :nsfw, :created_at,
            :first_seen, :last_updated, :fetched_at, :content_hash, :comment_ids,
            :comments_fetched_at
         )",
        named_params! {
            ":post_id": post.post_id,
            ":permalink": post.permalink,
            ":url": post.url,
            ":title": post.title,
            ":selftext": post.selftext,
            ":selftext_html": post.selftext_html,
            ":author": post.author,
            ":author_is_deleted": post.author_is_deleted,
            ":subreddit": post.subreddit,
            ":subreddit_id": post.subreddit_id,
            ":score": post.score,
            ":upvote_ratio": post.upvote_ratio,
            ":num_comments": post.num_comments,
            ":gilded": post.gilded,
            ":media": serde_json::to_string(&post.media)?,
            ":flair_text": post.flair_text,
            ":flair_css_class": post.flair_css_class,
            ":edited": post.edited,
            ":edited_at": opt_ts(&post.edited_at),
            ":deleted": post.deleted,
            ":removed": post.removed,
            ":stickied": post.stickied,
            ":locked": post.locked,
            ":spoiler": post.spoiler,
            ":nsfw": post.nsfw,
            ":created_at": opt_ts(&post.created_at),
            ":first_seen": now,
            ":last_updated": now,
            ":fetched_at": ts(&post.fetched_at),
            ":content_hash": post.content_hash,
            ":comment_ids": serde_json::to_string(&post.comment_ids)?,
            ":comments_fetched_at": opt_ts(&post.comments_fetched_at),
        },
    )?;
    Ok(())
}

/// Overwrites a changed post, keeping `first_seen` and the registered comment IDs
fn update_post(tx: &Transaction<'_>, post: &Post, now: DateTime<Utc>) -> StorageResult<()> {
    tx.execute(
        "UPDATE posts SET
            permalink = :permalink, url = :url, title = :title, selftext = :selftext,
            selftext_html = :selftext_html, author = :author,
            author_is_deleted = :author_is_deleted, subreddit = :subreddit,
            subreddit_id = :subreddit_id, score = :score, upvote_ratio = :upvote_ratio,
            num_comments = :num_comments, gilded = :gilded, media = :media,
            flair_text = :flair_text, flair_css_class = :flair_css_class, edited = :edited,
            edited_at = :edited_at, deleted = :deleted, removed = :removed,
            stickied = :stickied, locked = :locked, spoiler = :spoiler, nsfw = :nsfw,
            created_at = :created_at, last_updated = :last_updated, fetched_at = :fetched_at,
            content_hash = :content_hash
         WHERE post_id = :post_id",
        named_params! {
            ":post_id": post.post_id,
            ":permalink": post.permalink,
            ":url": post.url,
            ":title": post.title,
            ":selftext": post.selftext,
            ":selftext_html": post.selftext_html,
            ":author": post.author,
            ":author_is_deleted": post.author_is_deleted,
            ":subreddit": post.subreddit,
            ":subreddit_id": post.subreddit_id,
            ":score": post.score,
            ":upvote_ratio": post.upvote_ratio,
            ":num_comments": post.num_comments,
            ":gilded": post.gilded,
            ":media": serde_json::to_string(&post.media)?,
            ":flair_text": post.flair_text,
            ":flair_css_class": post.flair_css_class,
            ":edited": post.edited,
            ":edited_at": opt_ts(&post.edited_at),
            ":deleted": post.deleted,
            ":removed": post.removed,
            ":stickied": post.stickied,
            ":locked": post.locked,
            ":spoiler": post.spoiler,
            ":nsfw": post.nsfw,
            ":created_at": opt_ts(&post.created_at),
            ":last_updated": ts(&now),
            ":fetched_at": ts(&post.fetched_at),
            ":content_hash": post.content_hash,
        },
    )?;
    Ok(())
}

fn insert_comment(tx: &Transaction<'_>, comment: &Comment, now: DateTime<Utc>) -> StorageResult<()> {
    let now = ts(&now);
    tx.execute(
        "INSERT INTO comments (
            comment_id, post_id, parent_id, body, body_html, author, author_is_deleted, score,
            controversial, gilded, is_submitter, edited, edited_at, deleted, removed, stickied,
            depth, reply_count, created_at, first_seen, last_updated, fetched_at, content_hash,
            subreddit
         ) VALUES (
            :comment_id, :post_id, :parent_id, :body, :body_html, :author, :author_is_deleted,
            :score, :controversial, :gilded, :is_submitter, :edited, :edited_at, :deleted,
            :removed, :stickied, :depth, :reply_count, :created_at, :first_seen,
            :last_updated, :fetched_at, :content_hash, :subreddit
         )",
        named_params! {
            ":comment_id": comment.comment_id,
            ":post_id": comment.post_id,
            ":parent_id": comment.parent_id,
            ":body": comment.body,
            ":body_html": comment.body_html,
            ":author": comment.author,
            ":author_is_deleted": comment.author_is_deleted,
            ":score": comment.score,
            ":controversial": comment.controversial,
            ":gilded": comment.gilded,
            ":is_submitter": comment.is_submitter,
            ":edited": comment.edited,
            ":edited_at": opt_ts(&comment.edited_at),
            ":deleted": comment.deleted,
            ":removed": comment.removed,
            ":stickied": comment.stickied,
            ":depth": comment.depth,
            ":reply_count": comment.reply_count,
            ":created_at": opt_ts(&comment.created_at),
            ":first_seen": now,
            ":last_updated": now,
            ":fetched_at": ts(&comment.fetched_at),
            ":content_hash": comment.content_hash,
            ":subreddit": comment.subreddit,
        },
    )?;
    Ok(())
}

/// Overwrites a changed comment, keeping `first_seen`
fn update_comment(tx: &Transaction<'_>, comment: &Comment, now: DateTime<Utc>) -> StorageResult<()> {
    tx.execute(
        "UPDATE comments SET
            post_id = :post_id, parent_id = :parent_id, body = :body, body_html = :body_html,
            author = :author, author_is_deleted = :author_is_deleted, score = :score,
            controversial = :controversial, gilded = :gilded, is_submitter = :is_submitter,
            edited = :edited, edited_at = :edited_at, deleted = :deleted, removed = :removed,
            stickied = :stickied, depth = :depth, reply_count = :reply_count,
            created_at = :created_at, last_updated = :last_updated, fetched_at = :fetched_at,
            content_hash = :content_hash, subreddit = :subreddit
         WHERE comment_id = :comment_id",
        named_params! {
            ":comment_id": comment.comment_id,
            ":post_id": comment.post_id,
            ":parent_id": comment.parent_id,
            ":body": comment.body,
            ":body_html": comment.body_html,
            ":author": comment.author,
            ":author_is_deleted": comment.author_is_deleted,
            ":score": comment.score,
            ":controversial": comment.controversial,
            ":gilded": comment.gilded,
            ":is_submitter": comment.is_submitter,
            ":edited": comment.edited,
            ":edited_at": opt_ts(&comment.edited_at),
            ":deleted": comment.deleted,
            ":removed": comment.removed,
            ":stickied": comment.stickied,
            ":depth": comment.depth,
            ":reply_count": comment.reply_count,
            ":created_at": opt_ts(&comment.created_at),
            ":last_updated": ts(&now),
            ":fetched_at": ts(&comment.fetched_at),
            ":content_hash": comment.content_hash,
            ":subreddit": comment.subreddit,
        },
    )?;
    Ok(())
}

fn log_change(
    tx: &Transaction<'_>,
    content_type: ContentType,
    content_id: &str,
    old_value: &Value,
    new_value: &Value,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    tx.execute(
        "INSERT INTO change_log (content_type, content_id, change_type, old_value, new_value, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            content_type.to_db_string(),
            content_id,
            CHANGE_CONTENT_UPDATED,
            serde_json::to_string(old_value)?,
            serde_json::to_string(new_value)?,
            ts(&now),
        ],
    )?;
    tracing::debug!(%content_type, content_id, "Logged content change");
    Ok(())
}

// ===== Row Mapping =====

fn row_to_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        post_id: row.get("post_id")?,
        permalink: row.get("permalink")?,
        url: row.get("url")?,
        title: row.get("title")?,
        selftext: row.get("selftext")?,
        selftext_html: row.get("selftext_html")?,
        author: row.get("author")?,
        author_is_deleted: row.get("author_is_deleted")?,
        subreddit: row.get("subreddit")?,
        subreddit_id: row.get("subreddit_id")?,
        score: row.get("score")?,
        upvote_ratio: row.get("upvote_ratio")?,
        num_comments: row.get("num_comments")?,
        gilded: row.get("gilded")?,
        media: read_json(row, "media")?,
        flair_text: row.get("flair_text")?,
        flair_css_class: row.get("flair_css_class")?,
        edited: row.get("edited")?,
        edited_at: read_opt_ts(row, "edited_at")?,
        deleted: row.get("deleted")?,
        removed: row.get("removed")?,
        stickied: row.get("stickied")?,
        locked: row.get("locked")?,
        spoiler: row.get("spoiler")?,
        nsfw: row.get("nsfw")?,
        created_at: read_opt_ts(row, "created_at")?,
        first_seen: read_ts(row, "first_seen")?,
        last_updated: read_ts(row, "last_updated")?,
        fetched_at: read_ts(row, "fetched_at")?,
        content_hash: row.get("content_hash")?,
        comment_ids: read_json(row, "comment_ids")?,
        comments_fetched_at: read_opt_ts(row, "comments_fetched_at")?,
    })
}

fn row_to_comment(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        comment_id: row.get("comment_id")?,
        post_id: row.get("post_id")?,
        parent_id: row.get("parent_id")?,
        body: row.get("body")?,
        body_html: row.get("body_html")?,
        author: row.get("author")?,
        author_is_deleted: row.get("author_is_deleted")?,
        score: row.get("score")?,
        controversial: row.get("controversial")?,
        gilded: row.get("gilded")?,
        is_submitter: row.get("is_submitter")?,
        edited: row.get("edited")?,
        edited_at: read_opt_ts(row, "edited_at")?,
        deleted: row.get("deleted")?,
        removed: row.get("removed")?,
        stickied: row.get("stickied")?,
        depth: row.get("depth")?,
        reply_count: row.get("reply_count")?,
        created_at: read_opt_ts(row, "created_at")?,
        first_seen: read_ts(row, "first_seen")?,
        last_updated: read_ts(row, "last_updated")?,
        fetched_at: read_ts(row, "fetched_at")?,
        content_hash: row.get("content_hash")?,
        subreddit: row.get("subreddit")?,
    })
}

fn row_to_change(row: &Row<'_>) -> rusqlite::Result<ChangeLogEntry> {
    let raw_type: String = row.get("content_type")?;
    let content_type = ContentType::from_db_string(&raw_type).ok_or_else(|| {
        conversion_error(row, "content_type", format!("unknown content type '{}'", raw_type).into())
    })?;

    Ok(ChangeLogEntry {
        id: row.get("id")?,
        content_type,
        content_id: row.get("content_id")?,
        change_type: row.get("change_type")?,
        old_value: read_json(row, "old_value")?,
        new_value: read_json(row, "new_value")?,
        changed_at: read_ts(row, "changed_at")?,
    })
}

// ===== Column Helpers =====

/// Fixed-width RFC 3339 (microseconds, `Z`) so text order matches time order
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn opt_ts(at: &Option<DateTime<Utc>>) -> Option<String> {
    at.as_ref().map(ts)
}

fn conversion_error(
    row: &Row<'_>,
    column: &str,
    source: Box<dyn std::error::Error + Send + Sync>,
) -> rusqlite::Error {
    let index = row.as_ref().column_index(column).unwrap_or_default();
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, source)
}

fn read_ts(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| conversion_error(row, column, Box::new(e)))
}

fn read_opt_ts(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| conversion_error(row, column, Box::new(e)))
    })
    .transpose()
}

fn read_json<T: DeserializeOwned>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(row, column, Box::new(e)))
}

fn read_count(row: &Row<'_>, column: &str) -> rusqlite::Result<u64> {
    let count: i64 = row.get(column)?;
    Ok(u64::try_from(count).unwrap_or_default())
}

fn where_clause(conditions: &[&str]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

/// `LIMIT -1` means no limit in SQLite
fn sql_limit(limit: Option<usize>) -> i64 {
    limit
        .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
        .unwrap_or(-1)
}

fn sql_offset(offset: usize) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}
