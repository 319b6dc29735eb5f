use crate::model::truncate_for_snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// How a post carries its content
///
/// Classified once at parse time; every consumer matches on it exhaustively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Media {
    /// Text post, content lives in `selftext`
    #[default]
    #[serde(rename = "self")]
    SelfPost,

    /// Hosted video; `url` is the fallback stream when the payload provides one
    Video {
        url: Option<String>,
        thumbnail: Option<String>,
    },

    /// Image gallery, URLs in gallery order
    Gallery {
        urls: Vec<String>,
        thumbnail: Option<String>,
    },

    /// External link with the API's content hint (`link`, `image`, `rich:video`, ...)
    Link {
        url: Option<String>,
        thumbnail: Option<String>,
        hint: String,
    },
}

/// A submission in a subreddit listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: String,
    pub permalink: String,
    pub url: String,
    pub title: String,
    pub selftext: String,
    pub selftext_html: Option<String>,

    pub author: String,
    pub author_is_deleted: bool,

    pub subreddit: String,
    pub subreddit_id: String,

    pub score: i64,
    pub upvote_ratio: f64,
    pub num_comments: i64,
    pub gilded: i64,

    pub media: Media,

    pub flair_text: Option<String>,
    pub flair_css_class: Option<String>,

    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub removed: bool,
    pub stickied: bool,
    pub locked: bool,
    pub spoiler: bool,
    pub nsfw: bool,

    pub created_at: Option<DateTime<Utc>>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,

    /// Digest over title, selftext and score, recomputed on every parse
    pub content_hash: String,

    /// Comment IDs registered against this post so far
    pub comment_ids: Vec<String>,
    pub comments_fetched_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Bounded view of the fields tracked in the change log
    pub fn snapshot(&self) -> Value {
        json!({
            "content_hash": self.content_hash,
            "score": self.score,
            "num_comments": self.num_comments,
            "selftext": truncate_for_snapshot(&self.selftext),
        })
    }
}
