use crate::model::truncate_for_snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A comment flattened out of a post's reply tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: String,
    pub post_id: String,

    /// Bare ID of the parent post or comment, type prefix stripped
    pub parent_id: String,

    pub body: String,
    pub body_html: Option<String>,

    pub author: String,
    pub author_is_deleted: bool,

    pub score: i64,
    pub controversial: bool,
    pub gilded: i64,
    pub is_submitter: bool,

    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub removed: bool,
    pub stickied: bool,

    /// Distance from the post root; top-level comments are depth 0
    pub depth: u32,

    /// Direct replies observed in the fetched tree
    pub reply_count: u32,

    pub created_at: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,

    pub content_hash: String,
    pub subreddit: String,
}

impl Comment {
    /// Bounded view of the fields tracked in the change log
    pub fn snapshot(&self) -> Value {
        json!({
            "content_hash": self.content_hash,
            "score": self.score,
            "body": truncate_for_snapshot(&self.body),
        })
    }
}
