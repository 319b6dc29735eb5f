use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Main configuration structure for Subreddit-Harvester
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub comments: CommentsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Listing crawl configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Subreddit (source) to crawl, without the `r/` prefix
    pub subreddit: String,

    /// Base URL of the listing API
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Listing sort order
    pub sort: SortMode,

    /// Time window for the `top` sort
    #[serde(rename = "time-filter")]
    pub time_filter: TimeFilter,

    /// Maximum number of posts fetched per crawl
    #[serde(rename = "max-posts")]
    pub max_posts: usize,

    /// Number of processed posts between crawl state checkpoints
    #[serde(rename = "checkpoint-every")]
    pub checkpoint_every: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            subreddit: "IndianStockMarket".to_string(),
            base_url: "https://www.reddit.com".to_string(),
            sort: SortMode::New,
            time_filter: TimeFilter::All,
            max_posts: 100,
            checkpoint_every: 10,
        }
    }
}

/// Comment tree configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommentsConfig {
    /// Whether comment trees are fetched at all
    pub enabled: bool,

    /// Maximum comments requested per post
    #[serde(rename = "max-per-post")]
    pub max_per_post: u32,

    /// Maximum reply depth kept from a comment tree
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Keep `[deleted]` / `[removed]` posts and comments
    #[serde(rename = "include-deleted")]
    pub include_deleted: bool,
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_post: 500,
            max_depth: 10,
            include_deleted: false,
        }
    }
}

/// HTTP pacing and retry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Minimum seconds between two dispatched requests
    #[serde(rename = "request-delay")]
    pub request_delay: f64,

    /// Total attempts allowed per request
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Seconds to wait before retrying a server or network failure
    #[serde(rename = "retry-delay")]
    pub retry_delay: f64,

    /// Seconds to wait after a 429 that carries no Retry-After header
    #[serde(rename = "rate-limit-wait")]
    pub rate_limit_wait: f64,

    /// Request timeout in seconds
    pub timeout: u64,
}

impl HttpConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_secs_f64(self.request_delay.max(0.0))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay.max(0.0))
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_wait.max(0.0))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_delay: 2.0,
            max_retries: 3,
            retry_delay: 5.0,
            rate_limit_wait: 10.0,
            timeout: 30,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the header value: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "SubredditHarvester".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/harvester".to_string(),
            contact_email: "harvester@example.com".to_string(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_path: "./harvest.db".to_string(),
        }
    }
}

/// Periodic crawl configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(rename = "interval-minutes")]
    pub interval_minutes: u64,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

/// Listing sort order accepted by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    New,
    Hot,
    Top,
    Rising,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Hot => "hot",
            Self::Top => "top",
            Self::Rising => "rising",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "hot" => Ok(Self::Hot),
            "top" => Ok(Self::Top),
            "rising" => Ok(Self::Rising),
            other => Err(format!("unknown sort mode '{}'", other)),
        }
    }
}

/// Time window for `top` listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
            Self::All => "all",
        }
    }
}
