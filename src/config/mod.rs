//! Configuration module for Subreddit-Harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use subreddit_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvester.toml")).unwrap();
//! println!("Crawling r/{}", config.crawler.subreddit);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CommentsConfig, Config, CrawlerConfig, HttpConfig, SchedulerConfig, SortMode,
    StorageBackend, StorageConfig, TimeFilter, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

// Re-export validation
pub use validation::validate;
