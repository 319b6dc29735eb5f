//! Listing payload parser
//!
//! This module turns raw listing API payloads into [`Post`] and [`Comment`] records:
//! - Post listings (`kind = "t3"` children plus the next-page cursor)
//! - Comment pages (a two-element array of post listing and comment tree)
//! - Media classification, deletion detection and content hashing
//!
//! Everything here is pure. A child that fails to parse is logged and skipped; only a
//! payload whose overall shape is wrong produces an error.

use crate::model::{Comment, Media, Post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

const POST_KIND: &str = "t3";
const COMMENT_KIND: &str = "t1";
const MORE_KIND: &str = "more";

const DELETED_MARKER: &str = "[deleted]";
const REMOVED_MARKER: &str = "[removed]";

/// Errors raised while reading a payload
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Malformed {kind}: {message}")]
    Malformed { kind: &'static str, message: String },

    #[error("Unexpected payload shape: {0}")]
    UnexpectedShape(String),
}

/// Options shared by every parse call
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Keep posts and comments whose author or body marks them deleted or removed
    pub include_deleted: bool,
}

/// One page of a post listing
#[derive(Debug, Clone, Default)]
pub struct PostPage {
    pub posts: Vec<Post>,

    /// Cursor for the next page; `None` on the last page
    pub after: Option<String>,
}

/// Parsed result of a post's comment endpoint
#[derive(Debug, Clone, Default)]
pub struct CommentsPage {
    /// The post as returned alongside its comments, if it parsed
    pub post: Option<Post>,

    /// Comments in tree pre-order
    pub comments: Vec<Comment>,
}

// ===== Raw payload shapes =====

#[derive(Debug, Deserialize)]
struct RawListing {
    data: RawListingData,
}

#[derive(Debug, Default, Deserialize)]
struct RawListingData {
    #[serde(default)]
    after: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    children: Vec<RawThing>,
}

#[derive(Debug, Deserialize)]
struct RawThing {
    #[serde(default, deserialize_with = "null_default")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// `edited` is `false` or the edit time in epoch seconds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum RawEdited {
    Flag(bool),
    At(f64),
}

impl RawEdited {
    fn resolve(edited: Option<RawEdited>) -> (bool, Option<DateTime<Utc>>) {
        match edited {
            Some(RawEdited::At(at)) if at > 0.0 => (true, parse_timestamp(Some(at))),
            Some(RawEdited::Flag(true)) => (true, None),
            _ => (false, None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPost {
    #[serde(default, deserialize_with = "null_default")]
    id: String,
    #[serde(default, deserialize_with = "null_default")]
    permalink: String,
    #[serde(default, deserialize_with = "null_default")]
    url: String,
    #[serde(default, deserialize_with = "null_default")]
    title: String,
    #[serde(default, deserialize_with = "null_default")]
    selftext: String,
    #[serde(default)]
    selftext_html: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    subreddit: String,
    #[serde(default, deserialize_with = "null_default")]
    subreddit_id: String,
    #[serde(default, deserialize_with = "null_default")]
    score: i64,
    #[serde(default, deserialize_with = "null_default")]
    upvote_ratio: f64,
    #[serde(default, deserialize_with = "null_default")]
    num_comments: i64,
    #[serde(default, deserialize_with = "null_default")]
    gilded: i64,
    #[serde(default)]
    is_self: Option<bool>,
    #[serde(default, deserialize_with = "null_default")]
    is_video: bool,
    #[serde(default, deserialize_with = "null_default")]
    is_gallery: bool,
    #[serde(default)]
    media: Option<RawMedia>,
    #[serde(default)]
    gallery_data: Option<RawGalleryData>,
    #[serde(default)]
    media_metadata: Option<HashMap<String, RawMediaMetadata>>,
    #[serde(default)]
    post_hint: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    link_flair_text: Option<String>,
    #[serde(default)]
    link_flair_css_class: Option<String>,
    #[serde(default)]
    edited: Option<RawEdited>,
    #[serde(default, deserialize_with = "null_default")]
    stickied: bool,
    #[serde(default, deserialize_with = "null_default")]
    locked: bool,
    #[serde(default, deserialize_with = "null_default")]
    spoiler: bool,
    #[serde(default, deserialize_with = "null_default")]
    over_18: bool,
    #[serde(default)]
    created_utc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    #[serde(default)]
    reddit_video: Option<RawVideo>,
}

#[derive(Debug, Deserialize)]
struct RawVideo {
    #[serde(default)]
    fallback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGalleryData {
    #[serde(default, deserialize_with = "null_default")]
    items: Vec<RawGalleryItem>,
}

#[derive(Debug, Deserialize)]
struct RawGalleryItem {
    #[serde(default)]
    media_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMediaMetadata {
    #[serde(default)]
    s: Option<RawMediaSource>,
}

#[derive(Debug, Deserialize)]
struct RawMediaSource {
    #[serde(default)]
    u: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    #[serde(default, deserialize_with = "null_default")]
    id: String,
    #[serde(default, deserialize_with = "null_default")]
    parent_id: String,
    #[serde(default, deserialize_with = "null_default")]
    body: String,
    #[serde(default)]
    body_html: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default, deserialize_with = "null_default")]
    score: i64,
    #[serde(default, deserialize_with = "null_default")]
    controversiality: i64,
    #[serde(default, deserialize_with = "null_default")]
    gilded: i64,
    #[serde(default, deserialize_with = "null_default")]
    is_submitter: bool,
    #[serde(default)]
    edited: Option<RawEdited>,
    #[serde(default, deserialize_with = "null_default")]
    stickied: bool,
    #[serde(default)]
    created_utc: Option<f64>,

    /// An empty string when there are no replies, otherwise a listing
    #[serde(default)]
    replies: Value,
}

/// Treats an explicit JSON `null` like a missing field
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ===== Helpers =====

/// Computes the change-detection digest over textual content and score
///
/// The result is the hex-encoded SHA-256 of `"{content}:{score}"`.
pub fn compute_content_hash(content: &str, score: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", content, score).as_bytes());
    hex::encode(hasher.finalize())
}

/// Converts epoch seconds to a UTC timestamp; absent or zero means unknown
pub fn parse_timestamp(epoch: Option<f64>) -> Option<DateTime<Utc>> {
    let epoch = epoch?;
    if epoch == 0.0 || !epoch.is_finite() {
        return None;
    }
    let secs = epoch.trunc() as i64;
    let nanos = (epoch.fract().abs() * 1_000_000_000.0) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
}

/// Strips the post (`t3_`) or comment (`t1_`) type prefix from a parent reference
pub fn normalize_parent_id(raw: &str) -> &str {
    raw.strip_prefix("t1_")
        .or_else(|| raw.strip_prefix("t3_"))
        .unwrap_or(raw)
}

fn is_marker(text: &str) -> bool {
    text == DELETED_MARKER || text == REMOVED_MARKER
}

fn is_deleted(author: &str, body: &str) -> bool {
    is_marker(author) || is_marker(body)
}

fn malformed(kind: &'static str, e: impl ToString) -> ParseError {
    ParseError::Malformed {
        kind,
        message: e.to_string(),
    }
}

// ===== Posts =====

/// Parses one page of a post listing
///
/// Only `t3` children are considered. A child that fails to parse is logged and
/// skipped, and deleted or removed posts are dropped unless requested.
///
/// # Returns
///
/// * `Ok(PostPage)` - Posts in listing order and the next-page cursor
/// * `Err(ParseError)` - The payload is not a listing
pub fn parse_post_listing(payload: &Value, opts: &ParseOptions) -> Result<PostPage, ParseError> {
    let listing = RawListing::deserialize(payload)
        .map_err(|e| ParseError::UnexpectedShape(format!("post listing: {}", e)))?;

    let mut posts = Vec::with_capacity(listing.data.children.len());
    for child in &listing.data.children {
        if child.kind != POST_KIND {
            tracing::debug!("Skipping listing child of kind '{}'", child.kind);
            continue;
        }

        match parse_post(&child.data, opts) {
            Ok(Some(post)) => posts.push(post),
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping post: {}", e),
        }
    }

    tracing::debug!("Parsed {} posts from listing", posts.len());

    Ok(PostPage {
        posts,
        after: listing.data.after.filter(|after| !after.is_empty()),
    })
}

/// Parses a single post object (the `data` of a `t3` child)
///
/// # Returns
///
/// * `Ok(Some(Post))` - The parsed post
/// * `Ok(None)` - The post is deleted or removed and `include_deleted` is off
/// * `Err(ParseError)` - The object is malformed
pub fn parse_post(raw: &Value, opts: &ParseOptions) -> Result<Option<Post>, ParseError> {
    let raw = RawPost::deserialize(raw).map_err(|e| malformed("post", e))?;
    if raw.id.is_empty() {
        return Err(malformed("post", "missing id"));
    }

    let author = raw
        .author
        .clone()
        .unwrap_or_else(|| DELETED_MARKER.to_string());
    let deleted = is_deleted(&author, &raw.selftext);
    if deleted && !opts.include_deleted {
        tracing::trace!(post_id = %raw.id, "Dropping deleted post");
        return Ok(None);
    }

    let media = classify_media(&raw);
    let (edited, edited_at) = RawEdited::resolve(raw.edited);
    let content_hash = compute_content_hash(&format!("{}:{}", raw.title, raw.selftext), raw.score);
    let now = Utc::now();

    Ok(Some(Post {
        post_id: raw.id,
        permalink: raw.permalink,
        url: raw.url,
        title: raw.title,
        author_is_deleted: is_marker(&author),
        removed: author == REMOVED_MARKER,
        selftext: raw.selftext,
        selftext_html: raw.selftext_html,
        author,
        subreddit: raw.subreddit,
        subreddit_id: raw.subreddit_id,
        score: raw.score,
        upvote_ratio: raw.upvote_ratio,
        num_comments: raw.num_comments,
        gilded: raw.gilded,
        media,
        flair_text: raw.link_flair_text,
        flair_css_class: raw.link_flair_css_class,
        edited,
        edited_at,
        deleted,
        stickied: raw.stickied,
        locked: raw.locked,
        spoiler: raw.spoiler,
        nsfw: raw.over_18,
        created_at: parse_timestamp(raw.created_utc),
        first_seen: now,
        last_updated: now,
        fetched_at: now,
        content_hash,
        comment_ids: Vec::new(),
        comments_fetched_at: None,
    }))
}

/// Media precedence: self post, then video, then gallery, then link
fn classify_media(raw: &RawPost) -> Media {
    let thumbnail = raw.thumbnail.clone().filter(|t| !t.is_empty());

    if raw.is_self.unwrap_or(true) {
        return Media::SelfPost;
    }

    if raw.is_video {
        let url = raw
            .media
            .as_ref()
            .and_then(|m| m.reddit_video.as_ref())
            .and_then(|v| v.fallback_url.clone());
        return Media::Video { url, thumbnail };
    }

    if raw.is_gallery {
        let urls = match (&raw.gallery_data, &raw.media_metadata) {
            (Some(gallery), Some(metadata)) => gallery
                .items
                .iter()
                .filter_map(|item| item.media_id.as_deref())
                .filter_map(|id| metadata.get(id))
                .filter_map(|meta| meta.s.as_ref()?.u.as_deref())
                .map(|u| u.replace("&amp;", "&"))
                .filter(|u| !u.is_empty())
                .collect(),
            _ => Vec::new(),
        };
        return Media::Gallery { urls, thumbnail };
    }

    Media::Link {
        url: Some(raw.url.clone()).filter(|u| !u.is_empty()),
        thumbnail,
        hint: raw
            .post_hint
            .clone()
            .unwrap_or_else(|| "link".to_string()),
    }
}

// ===== Comments =====

/// Parses a single comment object (the `data` of a `t1` child)
///
/// # Arguments
///
/// * `raw` - The comment object
/// * `post_id` - Bare ID of the post the comment belongs to
/// * `subreddit` - Source the post was crawled from
/// * `depth` - Distance from the post root
/// * `opts` - Parse options
///
/// # Returns
///
/// * `Ok(Some(Comment))` - The parsed comment
/// * `Ok(None)` - The comment is deleted or removed and `include_deleted` is off
/// * `Err(ParseError)` - The object is malformed
pub fn parse_comment(
    raw: &Value,
    post_id: &str,
    subreddit: &str,
    depth: u32,
    opts: &ParseOptions,
) -> Result<Option<Comment>, ParseError> {
    let raw = RawComment::deserialize(raw).map_err(|e| malformed("comment", e))?;
    let replies = reply_children(&raw.replies);
    Ok(build_comment(raw, replies.len(), post_id, subreddit, depth, opts))
}

fn build_comment(
    raw: RawComment,
    reply_count: usize,
    post_id: &str,
    subreddit: &str,
    depth: u32,
    opts: &ParseOptions,
) -> Option<Comment> {
    let author = raw
        .author
        .unwrap_or_else(|| DELETED_MARKER.to_string());
    let deleted = is_deleted(&author, &raw.body);
    if deleted && !opts.include_deleted {
        tracing::trace!(comment_id = %raw.id, "Dropping deleted comment");
        return None;
    }

    let (edited, edited_at) = RawEdited::resolve(raw.edited);
    let content_hash = compute_content_hash(&raw.body, raw.score);
    let now = Utc::now();

    Some(Comment {
        comment_id: raw.id,
        post_id: post_id.to_string(),
        parent_id: normalize_parent_id(&raw.parent_id).to_string(),
        author_is_deleted: is_marker(&author),
        removed: author == REMOVED_MARKER || raw.body == REMOVED_MARKER,
        body: raw.body,
        body_html: raw.body_html,
        author,
        score: raw.score,
        controversial: raw.controversiality > 0,
        gilded: raw.gilded,
        is_submitter: raw.is_submitter,
        edited,
        edited_at,
        deleted,
        stickied: raw.stickied,
        depth,
        reply_count: u32::try_from(reply_count).unwrap_or(u32::MAX),
        created_at: parse_timestamp(raw.created_utc),
        first_seen: now,
        last_updated: now,
        fetched_at: now,
        content_hash,
        subreddit: subreddit.to_string(),
    })
}

/// Children of a comment's reply listing, empty when `replies` is not a listing
fn reply_children(replies: &Value) -> Vec<RawThing> {
    if !replies.is_object() {
        return Vec::new();
    }
    match RawListing::deserialize(replies) {
        Ok(listing) => listing.data.children,
        Err(e) => {
            tracing::warn!("Ignoring malformed reply listing: {}", e);
            Vec::new()
        }
    }
}

/// Parses a post's comment page: `[post listing, comment listing]`
///
/// The comment tree is flattened in pre-order. `more` stubs are dropped and nothing
/// deeper than `max_depth` is produced. Replies under a comment that was dropped as
/// deleted are still walked.
///
/// # Returns
///
/// * `Ok(CommentsPage)` - The post (if it parsed) and its comments
/// * `Err(ParseError)` - The payload is not a two-element array of listings
pub fn parse_comments_page(
    payload: &Value,
    post_id: &str,
    subreddit: &str,
    max_depth: u32,
    opts: &ParseOptions,
) -> Result<CommentsPage, ParseError> {
    let parts = payload
        .as_array()
        .filter(|parts| parts.len() >= 2)
        .ok_or_else(|| {
            ParseError::UnexpectedShape(
                "comment page must be a two-element array".to_string(),
            )
        })?;

    let post = match RawListing::deserialize(&parts[0]) {
        Ok(listing) => listing
            .data
            .children
            .iter()
            .find(|child| child.kind == POST_KIND)
            .and_then(|child| match parse_post(&child.data, opts) {
                Ok(post) => post,
                Err(e) => {
                    tracing::warn!(post_id, "Skipping post in comment page: {}", e);
                    None
                }
            }),
        Err(e) => {
            tracing::warn!(post_id, "Comment page has no post listing: {}", e);
            None
        }
    };

    let listing = RawListing::deserialize(&parts[1])
        .map_err(|e| ParseError::UnexpectedShape(format!("comment listing: {}", e)))?;

    let walker = TreeWalker {
        post_id,
        subreddit,
        max_depth,
        opts,
    };
    let mut comments = Vec::new();
    walker.walk(listing.data.children, 0, &mut comments);

    tracing::debug!(post_id, "Parsed {} comments", comments.len());

    Ok(CommentsPage { post, comments })
}

struct TreeWalker<'a> {
    post_id: &'a str,
    subreddit: &'a str,
    max_depth: u32,
    opts: &'a ParseOptions,
}

impl TreeWalker<'_> {
    fn walk(&self, children: Vec<RawThing>, depth: u32, out: &mut Vec<Comment>) {
        if depth > self.max_depth {
            return;
        }

        for child in children {
            match child.kind.as_str() {
                COMMENT_KIND => {}
                MORE_KIND => continue,
                other => {
                    tracing::debug!("Skipping comment tree child of kind '{}'", other);
                    continue;
                }
            }

            let raw = match RawComment::deserialize(&child.data) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(post_id = self.post_id, "Skipping comment: {}", e);
                    continue;
                }
            };

            let replies = reply_children(&raw.replies);
            if let Some(comment) = build_comment(
                raw,
                replies.len(),
                self.post_id,
                self.subreddit,
                depth,
                self.opts,
            ) {
                out.push(comment);
                self.walk(replies, depth + 1, out);
            }
        }
    }
}
