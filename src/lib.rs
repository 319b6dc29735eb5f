//! Subreddit-Harvester: an incremental forum crawler
//!
//! This crate ingests posts and nested comment threads from a subreddit listing API,
//! normalizes them into typed records, detects content changes across repeated crawls,
//! and persists everything through a change-aware store with resumable crawl state.

pub mod config;
pub mod crawler;
pub mod model;
pub mod output;
pub mod storage;

use thiserror::Error;

/// Main error type for Subreddit-Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] crawler::TransportError),

    #[error("Parse error: {0}")]
    Parse(#[from] crawler::ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Failed to connect to database: {0}")]
    FatalInit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Subreddit-Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlResult, Crawler, Scheduler, Transport};
pub use model::{Comment, CrawlState, Media, Post, UpsertAction, UpsertOutcome};
pub use storage::{MemoryStore, SqliteStore, Store};
