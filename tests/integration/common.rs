//! Shared fixtures for the integration tests

use serde_json::{json, Value};
use subreddit_harvester::config::{Config, StorageBackend};
use subreddit_harvester::crawler::{parse_comment, parse_post, ParseOptions};
use subreddit_harvester::model::{ChangeLogEntry, Comment, CrawlState, Post, UpsertOutcome};
use subreddit_harvester::storage::{
    ChangeFilter, CommentFilter, MemoryStore, PostFilter, SqliteStore, StorageError,
    StorageResult, Store, StoreStats,
};
use tokio_util::sync::CancellationToken;

pub const SUBREDDIT: &str = "rust";
pub const BASE_CREATED: i64 = 1_700_000_000;

/// Configuration pointed at a mock server, with no pacing and short retry waits
pub fn test_config(base_url: &str) -> Config {
    let mut config = Config::default();
    config.crawler.subreddit = SUBREDDIT.to_string();
    config.crawler.base_url = base_url.to_string();
    config.http.request_delay = 0.0;
    config.http.retry_delay = 0.05;
    config.http.rate_limit_wait = 0.05;
    config.http.max_retries = 3;
    config.http.timeout = 5;
    config.storage.backend = StorageBackend::Memory;
    config
}

pub fn permalink(post_id: &str) -> String {
    format!("/r/{}/comments/{}/post_{}/", SUBREDDIT, post_id, post_id)
}

/// A self-post listing child
pub fn raw_post(post_id: &str, score: i64, created_offset: i64) -> Value {
    json!({
        "kind": "t3",
        "data": {
            "id": post_id,
            "name": format!("t3_{}", post_id),
            "title": format!("Post {}", post_id),
            "selftext": format!("Body of {}", post_id),
            "author": "author_one",
            "subreddit": SUBREDDIT,
            "subreddit_id": "t5_2s7lj",
            "permalink": permalink(post_id),
            "url": format!("https://www.reddit.com{}", permalink(post_id)),
            "score": score,
            "upvote_ratio": 0.95,
            "num_comments": 0,
            "gilded": 0,
            "is_self": true,
            "is_video": false,
            "stickied": false,
            "locked": false,
            "spoiler": false,
            "over_18": false,
            "edited": false,
            "created_utc": (BASE_CREATED + created_offset) as f64
        }
    })
}

pub fn listing(children: Vec<Value>, after: Option<&str>) -> Value {
    json!({
        "kind": "Listing",
        "data": {
            "after": after,
            "children": children
        }
    })
}

/// A comment listing child; `replies` is a listing or `None` for no replies
pub fn raw_comment(
    comment_id: &str,
    parent: &str,
    body: &str,
    score: i64,
    created_offset: i64,
    replies: Option<Value>,
) -> Value {
    json!({
        "kind": "t1",
        "data": {
            "id": comment_id,
            "parent_id": parent,
            "body": body,
            "author": "replier",
            "score": score,
            "controversiality": 0,
            "gilded": 0,
            "is_submitter": false,
            "stickied": false,
            "edited": false,
            "created_utc": (BASE_CREATED + created_offset) as f64,
            "replies": replies.unwrap_or_else(|| json!(""))
        }
    })
}

pub fn more_stub(ids: &[&str]) -> Value {
    json!({
        "kind": "more",
        "data": { "count": ids.len(), "children": ids }
    })
}

/// The two-element body of a post's comment endpoint
pub fn comments_page(post: Value, comments: Vec<Value>) -> Value {
    json!([listing(vec![post], None), listing(comments, None)])
}

pub fn post(post_id: &str, score: i64) -> Post {
    post_created(post_id, score, 0)
}

pub fn post_created(post_id: &str, score: i64, created_offset: i64) -> Post {
    let raw = raw_post(post_id, score, created_offset);
    parse_post(&raw["data"], &ParseOptions::default())
        .expect("fixture post parses")
        .expect("fixture post is live")
}

pub fn comment(
    comment_id: &str,
    post_id: &str,
    parent: &str,
    depth: u32,
    score: i64,
    created_offset: i64,
) -> Comment {
    let raw = raw_comment(
        comment_id,
        parent,
        &format!("Comment {}", comment_id),
        score,
        created_offset,
        None,
    );
    parse_comment(&raw["data"], post_id, SUBREDDIT, depth, &ParseOptions::default())
        .expect("fixture comment parses")
        .expect("fixture comment is live")
}

/// Every backend the store contract is checked against
pub fn backends() -> Vec<(&'static str, Box<dyn Store>)> {
    vec![
        (
            "sqlite",
            Box::new(SqliteStore::new_in_memory().expect("in-memory sqlite opens")),
        ),
        ("memory", Box::new(MemoryStore::new())),
    ]
}

/// Memory store with injectable failures
///
/// Every saved crawl state is also kept in `saves`, in order. When `cancel_on` is
/// set, upserting that post cancels the token.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub unreachable: bool,
    pub failing_posts: Vec<String>,
    pub saves: Vec<CrawlState>,
    pub cancel_on: Option<(String, CancellationToken)>,
}

impl Store for FaultyStore {
    fn ping(&self) -> StorageResult<()> {
        if self.unreachable {
            return Err(StorageError::Unavailable("connection refused".to_string()));
        }
        self.inner.ping()
    }

    fn upsert_post(&mut self, post: &Post) -> UpsertOutcome {
        if let Some((post_id, token)) = &self.cancel_on {
            if *post_id == post.post_id {
                token.cancel();
            }
        }
        if self.failing_posts.contains(&post.post_id) {
            return UpsertOutcome::error();
        }
        self.inner.upsert_post(post)
    }

    fn get_post(&self, post_id: &str) -> StorageResult<Option<Post>> {
        self.inner.get_post(post_id)
    }

    fn get_posts(&self, filter: &PostFilter) -> StorageResult<Vec<Post>> {
        self.inner.get_posts(filter)
    }

    fn search_posts(&self, text: &str, limit: usize) -> StorageResult<Vec<Post>> {
        self.inner.search_posts(text, limit)
    }

    fn upsert_comment(&mut self, comment: &Comment) -> UpsertOutcome {
        self.inner.upsert_comment(comment)
    }

    fn get_comment(&self, comment_id: &str) -> StorageResult<Option<Comment>> {
        self.inner.get_comment(comment_id)
    }

    fn get_comments_for_post(&self, post_id: &str) -> StorageResult<Vec<Comment>> {
        self.inner.get_comments_for_post(post_id)
    }

    fn get_comment_thread(&self, parent_id: &str) -> StorageResult<Vec<Comment>> {
        self.inner.get_comment_thread(parent_id)
    }

    fn get_comments(&self, filter: &CommentFilter) -> StorageResult<Vec<Comment>> {
        self.inner.get_comments(filter)
    }

    fn search_comments(&self, text: &str, limit: usize) -> StorageResult<Vec<Comment>> {
        self.inner.search_comments(text, limit)
    }

    fn get_changes(&self, filter: &ChangeFilter) -> StorageResult<Vec<ChangeLogEntry>> {
        self.inner.get_changes(filter)
    }

    fn get_crawl_state(&self, source: &str) -> StorageResult<Option<CrawlState>> {
        self.inner.get_crawl_state(source)
    }

    fn save_crawl_state(&mut self, state: &CrawlState) -> StorageResult<()> {
        self.saves.push(state.clone());
        self.inner.save_crawl_state(state)
    }

    fn reset_crawl_state(&mut self, source: &str) -> StorageResult<bool> {
        self.inner.reset_crawl_state(source)
    }

    fn get_stats(&self) -> StorageResult<StoreStats> {
        self.inner.get_stats()
    }

    fn reset_stats(&mut self) {
        self.inner.reset_stats()
    }
}
