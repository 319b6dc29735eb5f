//! Crawl progress and change audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The only change type the harvester records
pub const CHANGE_CONTENT_UPDATED: &str = "content_updated";

/// Resumable progress of crawling one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlState {
    pub source: String,
    pub last_post_id: Option<String>,
    pub after_token: Option<String>,
    pub posts_crawled: u64,
    pub comments_crawled: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_complete: bool,
}

impl CrawlState {
    /// Fresh state for a crawl starting now
    pub fn new(source: &str, now: DateTime<Utc>) -> Self {
        Self {
            source: source.to_string(),
            last_post_id: None,
            after_token: None,
            posts_crawled: 0,
            comments_crawled: 0,
            started_at: now,
            last_activity: now,
            is_complete: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Post,
    Comment,
}

impl ContentType {
    /// Converts to the database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            ContentType::Post => "post",
            ContentType::Comment => "comment",
        }
    }

    /// Parses from the database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "post" => Some(ContentType::Post),
            "comment" => Some(ContentType::Comment),
            _ => None,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Append-only record of a detected content mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub content_type: ContentType,
    pub content_id: String,
    pub change_type: String,
    pub old_value: Value,
    pub new_value: Value,
    pub changed_at: DateTime<Utc>,
}
