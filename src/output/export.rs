//! Bulk export of stored content for downstream consumers
//!
//! This is the read path for batch hand-off (analytics, model training). Posts are
//! exported either with their comments nested under each post or as one flat stream
//! of tagged records.

use crate::model::{Comment, Post};
use crate::storage::{CommentFilter, PostFilter, StorageResult, Store};
use crate::HarvestError;
use serde::Serialize;
use std::io::Write;
use std::str::FromStr;

/// How posts and comments are arranged in an export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportLayout {
    /// Each post carries its comments, oldest first
    #[default]
    Nested,

    /// All posts, then all comments, each tagged with `record_type`
    Flat,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Restrict to one subreddit
    pub subreddit: Option<String>,
    pub include_comments: bool,
    pub layout: ExportLayout,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            subreddit: None,
            include_comments: true,
            layout: ExportLayout::Nested,
        }
    }
}

/// A post with its comments inlined
#[derive(Debug, Clone, Serialize)]
pub struct PostWithComments {
    #[serde(flatten)]
    pub post: Post,
    pub comments: Vec<Comment>,
}

/// One record of a flat export
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "record_type", rename_all = "lowercase")]
pub enum ExportRecord {
    Post(Post),
    Comment(Comment),
}

/// Exported content
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Export {
    Posts(Vec<Post>),
    Nested(Vec<PostWithComments>),
    Flat(Vec<ExportRecord>),
}

impl Export {
    /// Number of top-level records
    pub fn len(&self) -> usize {
        match self {
            Export::Posts(posts) => posts.len(),
            Export::Nested(posts) => posts.len(),
            Export::Flat(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serialization format for [`write_export`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// One pretty-printed JSON array
    #[default]
    Json,

    /// One compact JSON object per line
    JsonLines,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "jsonl" | "jsonlines" | "ndjson" => Ok(ExportFormat::JsonLines),
            other => Err(format!("unknown export format '{}' (expected json or jsonl)", other)),
        }
    }
}

/// Reads posts (and optionally comments) out of a store
///
/// # Arguments
///
/// * `store` - The store to read from
/// * `options` - Subreddit filter, comment inclusion and layout
///
/// # Returns
///
/// * `Ok(Export)` - Posts only when comments are excluded, otherwise the chosen layout
/// * `Err(StorageError)` - A query failed
pub fn export_for_downstream(store: &dyn Store, options: &ExportOptions) -> StorageResult<Export> {
    let posts = store.get_posts(&PostFilter {
        subreddit: options.subreddit.clone(),
        limit: None,
        ..Default::default()
    })?;

    if !options.include_comments {
        return Ok(Export::Posts(posts));
    }

    match options.layout {
        ExportLayout::Flat => {
            let comments = store.get_comments(&CommentFilter {
                subreddit: options.subreddit.clone(),
                limit: None,
                ..Default::default()
            })?;
            let records = posts
                .into_iter()
                .map(ExportRecord::Post)
                .chain(comments.into_iter().map(ExportRecord::Comment))
                .collect();
            Ok(Export::Flat(records))
        }
        ExportLayout::Nested => {
            let nested = posts
                .into_iter()
                .map(|post| {
                    let comments = store.get_comments_for_post(&post.post_id)?;
                    Ok(PostWithComments { post, comments })
                })
                .collect::<StorageResult<Vec<_>>>()?;
            Ok(Export::Nested(nested))
        }
    }
}

/// Writes an export as JSON or JSON Lines
pub fn write_export<W: Write>(
    export: &Export,
    mut writer: W,
    format: ExportFormat,
) -> Result<(), HarvestError> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, export)?;
            writeln!(writer)?;
        }
        ExportFormat::JsonLines => match export {
            Export::Posts(posts) => write_lines(&mut writer, posts)?,
            Export::Nested(posts) => write_lines(&mut writer, posts)?,
            Export::Flat(records) => write_lines(&mut writer, records)?,
        },
    }
    writer.flush()?;
    Ok(())
}

fn write_lines<W: Write, T: Serialize>(writer: &mut W, items: &[T]) -> Result<(), HarvestError> {
    for item in items {
        serde_json::to_writer(&mut *writer, item)?;
        writeln!(writer)?;
    }
    Ok(())
}
