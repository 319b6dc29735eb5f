//! Human-readable crawl and store statistics
//!
//! This module formats the crawler's counters and crawl summaries for the CLI.

use crate::crawler::{CrawlResult, CrawlerStats};
use std::fmt::Write;

/// Number of crawl errors listed before the rest are summarized
const MAX_LISTED_ERRORS: usize = 5;

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlerStats) {
    print!("{}", format_statistics(stats));
}

/// Prints a crawl summary to stdout
pub fn print_crawl_result(result: &CrawlResult) {
    print!("{}", format_crawl_result(result));
}

pub fn format_statistics(stats: &CrawlerStats) -> String {
    let store = &stats.store;
    let transport = &stats.transport;
    let mut out = String::new();

    let _ = writeln!(out, "=== Harvest Statistics ===\n");

    let _ = writeln!(out, "Store:");
    let _ = writeln!(out, "  Total posts: {}", store.total_posts);
    let _ = writeln!(out, "  Total comments: {}", store.total_comments);
    let _ = writeln!(out, "  Total changes logged: {}", store.total_changes);
    let _ = writeln!(out);

    let _ = writeln!(out, "This Run:");
    let _ = writeln!(
        out,
        "  Posts: {} inserted, {} updated",
        store.posts_inserted, store.posts_updated
    );
    let _ = writeln!(
        out,
        "  Comments: {} inserted, {} updated",
        store.comments_inserted, store.comments_updated
    );
    let _ = writeln!(out, "  Changes logged: {}", store.changes_logged);
    let _ = writeln!(out);

    let _ = writeln!(out, "HTTP:");
    let _ = writeln!(out, "  Requests: {}", transport.requests);
    let _ = writeln!(out, "  Successful: {}", transport.successful);
    let _ = writeln!(out, "  Failed: {}", transport.failed);
    let _ = writeln!(out, "  Retries: {}", transport.retries);
    let _ = writeln!(out, "  Rate limited: {}", transport.rate_limited);

    let success_rate = if transport.requests > 0 {
        (transport.successful as f64 / transport.requests as f64) * 100.0
    } else {
        0.0
    };
    let _ = writeln!(out, "\nSuccess Rate: {:.1}%", success_rate);

    out
}

pub fn format_crawl_result(result: &CrawlResult) -> String {
    let mut out = String::new();

    let status = if result.interrupted {
        "Interrupted"
    } else {
        "Complete"
    };
    let _ = writeln!(out, "=== Crawl {}: r/{} ===\n", status, result.source);
    let _ = writeln!(out, "  Duration: {:.2}s", result.duration.as_secs_f64());
    let _ = writeln!(
        out,
        "  Posts: {} fetched, {} inserted, {} updated",
        result.posts_fetched, result.posts_inserted, result.posts_updated
    );
    let _ = writeln!(
        out,
        "  Comments: {} fetched, {} inserted, {} updated",
        result.comments_fetched, result.comments_inserted, result.comments_updated
    );

    if !result.errors.is_empty() {
        let _ = writeln!(out, "\nErrors ({}):", result.errors.len());
        for error in result.errors.iter().take(MAX_LISTED_ERRORS) {
            let _ = writeln!(out, "  - {}", error);
        }
        if result.errors.len() > MAX_LISTED_ERRORS {
            let _ = writeln!(
                out,
                "  ... and {} more",
                result.errors.len() - MAX_LISTED_ERRORS
            );
        }
    }

    out
}
