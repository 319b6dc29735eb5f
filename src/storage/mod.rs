//! Storage module for persisting harvested content
//!
//! This module handles all persistence for the harvester, including:
//! - SQLite database initialization and schema management
//! - Change-aware upserts of posts and comments
//! - The append-only change log
//! - Resumable crawl state per source
//!
//! [`SqliteStore`] is the durable backend; [`MemoryStore`] satisfies the same
//! [`Store`] contract in process memory.

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    ChangeFilter, CommentFilter, PostFilter, PostSort, Store, StorageError, StorageResult,
    StoreStats,
};

use crate::config::{StorageBackend, StorageConfig};
use crate::model::{ChangeLogEntry, Comment, CrawlState, Post, UpsertOutcome};
use std::path::Path;

/// Opens the store selected by the storage configuration
///
/// # Arguments
///
/// * `config` - Storage configuration
///
/// # Returns
///
/// * `Ok(Box<dyn Store + Send>)` - Ready-to-use store
/// * `Err(StorageError)` - Failed to open the database
pub fn open_store(config: &StorageConfig) -> StorageResult<Box<dyn Store + Send>> {
    match config.backend {
        StorageBackend::Sqlite => Ok(Box::new(SqliteStore::new(Path::new(&config.database_path))?)),
        StorageBackend::Memory => Ok(Box::new(MemoryStore::new())),
    }
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn ping(&self) -> StorageResult<()> {
        (**self).ping()
    }

    fn upsert_post(&mut self, post: &Post) -> UpsertOutcome {
        (**self).upsert_post(post)
    }

    fn get_post(&self, post_id: &str) -> StorageResult<Option<Post>> {
        (**self).get_post(post_id)
    }

    fn get_posts(&self, filter: &PostFilter) -> StorageResult<Vec<Post>> {
        (**self).get_posts(filter)
    }

    fn search_posts(&self, text: &str, limit: usize) -> StorageResult<Vec<Post>> {
        (**self).search_posts(text, limit)
    }

    fn upsert_comment(&mut self, comment: &Comment) -> UpsertOutcome {
        (**self).upsert_comment(comment)
    }

    fn get_comment(&self, comment_id: &str) -> StorageResult<Option<Comment>> {
        (**self).get_comment(comment_id)
    }

    fn get_comments_for_post(&self, post_id: &str) -> StorageResult<Vec<Comment>> {
        (**self).get_comments_for_post(post_id)
    }

    fn get_comment_thread(&self, parent_id: &str) -> StorageResult<Vec<Comment>> {
        (**self).get_comment_thread(parent_id)
    }

    fn get_comments(&self, filter: &CommentFilter) -> StorageResult<Vec<Comment>> {
        (**self).get_comments(filter)
    }

    fn search_comments(
        &self,
        text: &str,
        limit: usize,
    ) -> StorageResult<Vec<Comment>> {
        (**self).search_comments(text, limit)
    }

    fn get_changes(
        &self,
        filter: &ChangeFilter,
    ) -> StorageResult<Vec<ChangeLogEntry>> {
        (**self).get_changes(filter)
    }

    fn get_crawl_state(&self, source: &str) -> StorageResult<Option<CrawlState>> {
        (**self).get_crawl_state(source)
    }

    fn save_crawl_state(&mut self, state: &CrawlState) -> StorageResult<()> {
        (**self).save_crawl_state(state)
    }

    fn reset_crawl_state(&mut self, source: &str) -> StorageResult<bool> {
        (**self).reset_crawl_state(source)
    }

    fn get_stats(&self) -> StorageResult<StoreStats> {
        (**self).get_stats()
    }

    fn reset_stats(&mut self) {
        (**self).reset_stats()
    }
}
