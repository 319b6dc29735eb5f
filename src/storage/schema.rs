//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the harvester database.
//! Timestamps are stored as fixed-width RFC 3339 text so they compare correctly as
//! strings; `media` and `comment_ids` are stored as JSON text.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Posts, one row per post ID
CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    post_id TEXT NOT NULL UNIQUE,
    permalink TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    selftext TEXT NOT NULL,
    selftext_html TEXT,
    author TEXT NOT NULL,
    author_is_deleted INTEGER NOT NULL DEFAULT 0,
    subreddit TEXT NOT NULL,
    subreddit_id TEXT NOT NULL,
    score INTEGER NOT NULL DEFAULT 0,
    upvote_ratio REAL NOT NULL DEFAULT 0.0,
    num_comments INTEGER NOT NULL DEFAULT 0,
    gilded INTEGER NOT NULL DEFAULT 0,
    media TEXT NOT NULL,
    flair_text TEXT,
    flair_css_class TEXT,
    edited INTEGER NOT NULL DEFAULT 0,
    edited_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    removed INTEGER NOT NULL DEFAULT 0,
    stickied INTEGER NOT NULL DEFAULT 0,
    locked INTEGER NOT NULL DEFAULT 0,
    spoiler INTEGER NOT NULL DEFAULT 0,
    nsfw INTEGER NOT NULL DEFAULT 0,
    created_at TEXT,
    first_seen TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    comment_ids TEXT NOT NULL DEFAULT '[]',
    comments_fetched_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_posts_subreddit ON posts(subreddit);
CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_posts_score ON posts(score DESC);
CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author);
CREATE INDEX IF NOT EXISTS idx_posts_flair ON posts(flair_text);
CREATE INDEX IF NOT EXISTS idx_posts_fetched_at ON posts(fetched_at DESC);

-- Comments, flattened out of each post's reply tree
CREATE TABLE IF NOT EXISTS comments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    comment_id TEXT NOT NULL UNIQUE,
    post_id TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    body TEXT NOT NULL,
    body_html TEXT,
    author TEXT NOT NULL,
    author_is_deleted INTEGER NOT NULL DEFAULT 0,
    score INTEGER NOT NULL DEFAULT 0,
    controversial INTEGER NOT NULL DEFAULT 0,
    gilded INTEGER NOT NULL DEFAULT 0,
    is_submitter INTEGER NOT NULL DEFAULT 0,
    edited INTEGER NOT NULL DEFAULT 0,
    edited_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    removed INTEGER NOT NULL DEFAULT 0,
    stickied INTEGER NOT NULL DEFAULT 0,
    depth INTEGER NOT NULL DEFAULT 0,
    reply_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT,
    first_seen TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    subreddit TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id);
CREATE INDEX IF NOT EXISTS idx_comments_parent_id ON comments(parent_id);
CREATE INDEX IF NOT EXISTS idx_comments_author ON comments(author);
CREATE INDEX IF NOT EXISTS idx_comments_subreddit ON comments(subreddit);
CREATE INDEX IF NOT EXISTS idx_comments_created_at ON comments(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_comments_score ON comments(score DESC);
CREATE INDEX IF NOT EXISTS idx_comments_depth ON comments(depth);

-- Resumable crawl progress, one row per source
CREATE TABLE IF NOT EXISTS crawl_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL UNIQUE,
    last_post_id TEXT,
    after_token TEXT,
    posts_crawled INTEGER NOT NULL DEFAULT 0,
    comments_crawled INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    is_complete INTEGER NOT NULL DEFAULT 0
);

-- Append-only audit trail of content changes
CREATE TABLE IF NOT EXISTS change_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_type TEXT NOT NULL,
    content_id TEXT NOT NULL,
    change_type TEXT NOT NULL,
    old_value TEXT NOT NULL,
    new_value TEXT NOT NULL,
    changed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_changelog_content_type ON change_log(content_type);
CREATE INDEX IF NOT EXISTS idx_changelog_content_id ON change_log(content_id);
CREATE INDEX IF NOT EXISTS idx_changelog_changed_at ON change_log(changed_at DESC);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
