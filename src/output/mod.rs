//! Output module for crawl summaries and downstream exports
//!
//! This module handles:
//! - Printing crawl results and combined statistics
//! - Exporting stored posts and comments as JSON or JSON Lines

mod export;
pub mod stats;

pub use export::{
    export_for_downstream, write_export, Export, ExportFormat, ExportLayout, ExportOptions,
    ExportRecord, PostWithComments,
};
pub use stats::{print_crawl_result, print_statistics};
