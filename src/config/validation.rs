use crate::config::types::{
    CommentsConfig, Config, CrawlerConfig, HttpConfig, StorageBackend, StorageConfig,
    UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// One week
const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_comments_config(&config.comments)?;
    validate_http_config(&config.http)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;

    if !(1..=MAX_INTERVAL_MINUTES).contains(&config.scheduler.interval_minutes) {
        return Err(ConfigError::Validation(format!(
            "interval_minutes must be between 1 and {}, got {}",
            MAX_INTERVAL_MINUTES, config.scheduler.interval_minutes
        )));
    }

    Ok(())
}

/// Validates listing crawl configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_subreddit_name(&config.subreddit)?;

    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;
    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            config.base_url
        )));
    }

    if config.max_posts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_posts must be >= 1, got {}",
            config.max_posts
        )));
    }

    if config.checkpoint_every < 1 {
        return Err(ConfigError::Validation(format!(
            "checkpoint_every must be >= 1, got {}",
            config.checkpoint_every
        )));
    }

    Ok(())
}

/// Validates a subreddit name: 2 to 21 characters, alphanumeric or underscore
pub(crate) fn validate_subreddit_name(name: &str) -> Result<(), ConfigError> {
    let len = name.chars().count();
    if !(2..=21).contains(&len) {
        return Err(ConfigError::Validation(format!(
            "subreddit must be 2 to 21 characters, got '{}'",
            name
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::Validation(format!(
            "subreddit must contain only alphanumeric characters and underscores, got '{}'",
            name
        )));
    }

    Ok(())
}

fn validate_comments_config(config: &CommentsConfig) -> Result<(), ConfigError> {
    if config.max_per_post < 1 || config.max_per_post > 500 {
        return Err(ConfigError::Validation(format!(
            "max_per_post must be between 1 and 500, got {}",
            config.max_per_post
        )));
    }

    if config.max_depth > 100 {
        return Err(ConfigError::Validation(format!(
            "max_depth must be <= 100, got {}",
            config.max_depth
        )));
    }

    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("request_delay", config.request_delay),
        ("retry_delay", config.retry_delay),
        ("rate_limit_wait", config.rate_limit_wait),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{} must be a non-negative number of seconds, got {}",
                name, value
            )));
        }
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(
            "max_retries must be >= 1".to_string(),
        ));
    }

    if config.timeout < 1 {
        return Err(ConfigError::Validation(
            "timeout must be >= 1 second".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.backend == StorageBackend::Sqlite && config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty for the sqlite backend".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
