//! Domain records produced by the parser and persisted by the store
//!
//! Posts and comments are created on the first successful parse of a fetch and are
//! updated in place whenever their content hash changes. Nothing here is ever deleted
//! by the harvester; forum-side deletion is recorded as a flag on the record.

mod comment;
mod post;
mod tracking;

pub use comment::Comment;
pub use post::{Media, Post};
pub use tracking::{ChangeLogEntry, ContentType, CrawlState, CHANGE_CONTENT_UPDATED};

use serde::Serialize;
use std::fmt;

/// Maximum number of characters of free text kept in a change-log snapshot
pub const SNAPSHOT_TEXT_LIMIT: usize = 500;

/// What an upsert did with the record it was given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Inserted,
    Updated,
    Unchanged,
    Duplicate,
    Error,
}

impl UpsertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Duplicate => "duplicate",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single upsert: whether stored content changed, and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub changed: bool,
    pub action: UpsertAction,
}

impl UpsertOutcome {
    pub fn inserted() -> Self {
        Self {
            changed: true,
            action: UpsertAction::Inserted,
        }
    }

    pub fn updated() -> Self {
        Self {
            changed: true,
            action: UpsertAction::Updated,
        }
    }

    pub fn unchanged() -> Self {
        Self {
            changed: false,
            action: UpsertAction::Unchanged,
        }
    }

    pub fn duplicate() -> Self {
        Self {
            changed: false,
            action: UpsertAction::Duplicate,
        }
    }

    pub fn error() -> Self {
        Self {
            changed: false,
            action: UpsertAction::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.action == UpsertAction::Error
    }
}

impl From<UpsertAction> for UpsertOutcome {
    fn from(action: UpsertAction) -> Self {
        Self {
            changed: matches!(action, UpsertAction::Inserted | UpsertAction::Updated),
            action,
        }
    }
}

/// Truncates free text to the snapshot limit, counting characters rather than bytes
pub(crate) fn truncate_for_snapshot(text: &str) -> String {
    text.chars().take(SNAPSHOT_TEXT_LIMIT).collect()
}
