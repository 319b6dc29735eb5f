//! Subreddit-Harvester main entry point
//!
//! This is the command-line interface for the Subreddit-Harvester crawler.

use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use subreddit_harvester::config::{load_config_with_hash, validate, Config, SortMode};
use subreddit_harvester::crawler::{Crawler, Scheduler};
use subreddit_harvester::output::{
    print_crawl_result, print_statistics, write_export, ExportFormat, ExportLayout, ExportOptions,
};
use subreddit_harvester::storage::{open_store, Store};
use tracing_subscriber::EnvFilter;

/// Subreddit-Harvester: an incremental subreddit crawler
///
/// Harvests posts and comment threads from a subreddit, tracks content changes
/// across repeated crawls, and keeps resumable crawl state.
#[derive(Parser, Debug)]
#[command(name = "subreddit-harvester")]
#[command(version = "1.0.0")]
#[command(about = "An incremental subreddit crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Subreddit to crawl (overrides the config)
    #[arg(short, long)]
    subreddit: Option<String>,

    /// Maximum number of posts to fetch (overrides the config)
    #[arg(short = 'n', long)]
    max_posts: Option<usize>,

    /// Listing sort: new, hot, top or rising (overrides the config)
    #[arg(long)]
    sort: Option<SortMode>,

    /// Crawl the newest posts once, with comments, without resuming
    #[arg(long, conflicts_with_all = ["scheduled", "resume"])]
    incremental: bool,

    /// Run incremental crawls on the configured interval until interrupted
    #[arg(long, conflicts_with = "resume")]
    scheduled: bool,

    /// Start from the stored crawl state of the subreddit
    #[arg(long)]
    resume: bool,

    /// Skip comment fetching
    #[arg(long)]
    no_comments: bool,

    /// Show statistics from the store and exit
    #[arg(long, conflicts_with_all = ["export", "reset_state"])]
    stats: bool,

    /// Export stored posts and comments and exit
    #[arg(long, conflicts_with_all = ["stats", "reset_state"])]
    export: bool,

    /// Export destination (stdout when omitted)
    #[arg(short, long, requires = "export")]
    output: Option<PathBuf>,

    /// Export format: json or jsonl
    #[arg(long, default_value = "json")]
    format: ExportFormat,

    /// Export posts and comments as one flat list of records
    #[arg(long, requires = "export")]
    flat: bool,

    /// Delete the stored crawl state of the subreddit and exit
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    reset_state: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_overrides(&mut config, &cli)?;

    let store = open_store(&config.storage).context("Failed to open store")?;
    let crawler = Crawler::new(config, store).context("Failed to build crawler")?;

    // Handle different modes
    if cli.stats {
        handle_stats(&crawler)
    } else if cli.export {
        handle_export(&crawler, &cli)
    } else if cli.reset_state {
        handle_reset_state(crawler)
    } else if cli.scheduled {
        handle_scheduled(crawler).await
    } else {
        handle_crawl(crawler, &cli).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("subreddit_harvester=info,warn"),
            1 => EnvFilter::new("subreddit_harvester=debug,info"),
            2 => EnvFilter::new("subreddit_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Folds command-line overrides into the configuration and re-validates it
fn apply_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(subreddit) = &cli.subreddit {
        config.crawler.subreddit = subreddit.trim_start_matches("r/").to_string();
    }
    if let Some(max_posts) = cli.max_posts {
        config.crawler.max_posts = max_posts;
    }
    if let Some(sort) = cli.sort {
        config.crawler.sort = sort;
    }
    validate(config).context("Invalid command-line override")?;
    Ok(())
}

/// Cancels the crawl token on Ctrl-C
fn spawn_interrupt_handler<F>(on_interrupt: F)
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current item...");
            on_interrupt();
        }
    });
}

/// Handles the --stats mode: shows statistics from the store
fn handle_stats<S: Store>(crawler: &Crawler<S>) -> anyhow::Result<()> {
    println!("Storage: {:?}\n", crawler.config().storage.backend);
    let stats = crawler.get_stats().context("Failed to read statistics")?;
    print_statistics(&stats);
    Ok(())
}

/// Handles the --export mode: writes stored content as JSON or JSON Lines
fn handle_export<S: Store>(crawler: &Crawler<S>, cli: &Cli) -> anyhow::Result<()> {
    let options = ExportOptions {
        subreddit: cli.subreddit.as_ref().map(|_| crawler.config().crawler.subreddit.clone()),
        include_comments: !cli.no_comments,
        layout: if cli.flat {
            ExportLayout::Flat
        } else {
            ExportLayout::Nested
        },
    };

    tracing::info!("Loading stored content...");
    let export = crawler
        .export_for_downstream(&options)
        .context("Failed to export")?;

    match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_export(&export, BufWriter::new(file), cli.format)?;
            tracing::info!("Exported {} records to {}", export.len(), path.display());
        }
        None => {
            write_export(&export, io::stdout().lock(), cli.format)?;
        }
    }

    Ok(())
}

/// Handles the --reset-state mode
fn handle_reset_state<S: Store>(mut crawler: Crawler<S>) -> anyhow::Result<()> {
    let source = crawler.config().crawler.subreddit.clone();
    if crawler.reset_crawl_state(&source)? {
        println!("✓ Crawl state for r/{} reset", source);
    } else {
        println!("No crawl state stored for r/{}", source);
    }
    Ok(())
}

/// Handles the --scheduled mode: incremental crawls until Ctrl-C
async fn handle_scheduled<S: Store>(crawler: Crawler<S>) -> anyhow::Result<()> {
    let source = crawler.config().crawler.subreddit.clone();
    let max_posts = crawler.config().crawler.max_posts;
    let interval = crawler.config().scheduler.interval();
    let token = crawler.cancellation_token();

    let mut scheduler = Scheduler::new(crawler, interval);
    let handle = scheduler.handle();
    spawn_interrupt_handler(move || {
        handle.stop();
        token.cancel();
    });

    scheduler.start(&source, max_posts).await;
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl<S: Store>(mut crawler: Crawler<S>, cli: &Cli) -> anyhow::Result<()> {
    let source = crawler.config().crawler.subreddit.clone();
    let max_posts = crawler.config().crawler.max_posts;

    let token = crawler.cancellation_token();
    spawn_interrupt_handler(move || token.cancel());

    let result = if cli.incremental {
        crawler.crawl_incremental(&source, max_posts).await
    } else {
        crawler
            .crawl(&source, max_posts, !cli.no_comments, cli.resume)
            .await
    };

    match result {
        Ok(result) => {
            print_crawl_result(&result);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
