//! HTTP transport for the listing API
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building HTTP clients with proper user agent strings
//! - Pacing every dispatch through the [`RateLimiter`]
//! - Retry logic for rate limiting, server errors and network failures
//! - Error classification
//!
//! Failures are never raised to the caller. A request that cannot be completed yields
//! a [`Response`] whose `error` field says why.

use crate::config::{Config, HttpConfig};
use crate::crawler::rate_limiter::RateLimiter;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Why a request did not produce a usable response
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Unexpected status: HTTP {status}")]
    Status { status: u16 },

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Outcome of a request, successful or not
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code, 0 when no response was received
    pub status: u16,

    /// Response headers with lowercased names
    pub headers: HashMap<String, String>,

    /// Decoded response body
    pub body: String,

    /// Parsed body, when it was valid JSON
    pub json: Option<Value>,

    /// Set when the request failed terminally
    pub error: Option<TransportError>,
}

impl Response {
    fn failed(error: TransportError) -> Self {
        Self {
            status: 0,
            headers: HashMap::new(),
            body: String::new(),
            json: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

/// Snapshot of transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub retries: u64,
    pub rate_limited: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    requests: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransportStats {
        TransportStats {
            requests: self.requests.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.requests,
            &self.successful,
            &self.failed,
            &self.retries,
            &self.rate_limited,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Retry budget and back-off delays
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    /// Total attempts, including the first
    max_attempts: u32,
    retry_delay: Duration,
    rate_limit_wait: Duration,
}

impl RetryPolicy {
    fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
            rate_limit_wait: config.rate_limit_wait(),
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The harvester configuration (user agent and timeout are used)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.header_value())
        .timeout(config.http.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .build()
}

/// Paced, retrying HTTP transport shared by every fetch the crawler makes
#[derive(Debug)]
pub struct Transport {
    client: Client,
    limiter: RateLimiter,
    policy: RetryPolicy,
    stats: StatsCounters,
}

impl Transport {
    /// Creates a transport with a client built from the configuration
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = build_http_client(config)?;
        Ok(Self::with_client(client, &config.http))
    }

    /// Creates a transport around an existing client
    pub fn with_client(client: Client, config: &HttpConfig) -> Self {
        Self {
            client,
            limiter: RateLimiter::new(config.request_delay()),
            policy: RetryPolicy::from_config(config),
            stats: StatsCounters::default(),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Sends a request, pacing and retrying as configured
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | HTTP 2xx | Return body, JSON parsed when possible |
    /// | HTTP 429 | Wait `Retry-After` (or `rate-limit-wait`), retry |
    /// | HTTP 5xx | Wait `retry-delay`, retry |
    /// | Timeout / connection / body error | Wait `retry-delay`, retry |
    /// | Any other status | Immediate terminal response |
    ///
    /// Attempts are bounded by `max-retries` in total. When the budget runs out the last
    /// failure is returned in [`Response::error`].
    pub async fn request(
        &self,
        url: &str,
        method: Method,
        params: &[(&str, String)],
        headers: &HeaderMap,
    ) -> Response {
        let target = match build_url(url, params) {
            Ok(target) => target,
            Err(e) => {
                StatsCounters::bump(&self.stats.failed);
                tracing::warn!("Refusing to request {}: {}", url, e);
                return Response::failed(e);
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;
            StatsCounters::bump(&self.stats.requests);
            tracing::debug!(url = %target, attempt, "Dispatching request");

            let sent = self
                .client
                .request(method.clone(), target.clone())
                .headers(headers.clone())
                .send()
                .await;

            let (failure, wait) = match sent {
                Ok(resp) => {
                    let status = resp.status();
                    let resp_headers = collect_headers(resp.headers());

                    if status.is_success() {
                        match resp.text().await {
                            Ok(body) => {
                                StatsCounters::bump(&self.stats.successful);
                                return success_response(status.as_u16(), resp_headers, body);
                            }
                            Err(e) => (
                                Response {
                                    status: status.as_u16(),
                                    headers: resp_headers,
                                    body: String::new(),
                                    json: None,
                                    error: Some(TransportError::Body(e.to_string())),
                                },
                                self.policy.retry_delay,
                            ),
                        }
                    } else if status == StatusCode::TOO_MANY_REQUESTS {
                        StatsCounters::bump(&self.stats.rate_limited);
                        let retry_after = parse_retry_after(resp.headers());
                        let wait = retry_after
                            .map(Duration::from_secs)
                            .unwrap_or(self.policy.rate_limit_wait);
                        tracing::warn!(url = %target, attempt, "Rate limited, waiting {:?}", wait);
                        let body = resp.text().await.unwrap_or_default();
                        (
                            error_response(
                                status,
                                resp_headers,
                                body,
                                TransportError::RateLimited { retry_after },
                            ),
                            wait,
                        )
                    } else if status.is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        (
                            error_response(
                                status,
                                resp_headers,
                                body,
                                TransportError::Server {
                                    status: status.as_u16(),
                                },
                            ),
                            self.policy.retry_delay,
                        )
                    } else {
                        StatsCounters::bump(&self.stats.failed);
                        tracing::warn!(url = %target, status = status.as_u16(), "Request failed");
                        let body = resp.text().await.unwrap_or_default();
                        return error_response(
                            status,
                            resp_headers,
                            body,
                            TransportError::Status {
                                status: status.as_u16(),
                            },
                        );
                    }
                }
                Err(e) => (
                    Response::failed(classify_error(&e)),
                    self.policy.retry_delay,
                ),
            };

            if attempt >= self.policy.max_attempts {
                StatsCounters::bump(&self.stats.failed);
                tracing::error!(
                    url = %target,
                    attempt,
                    "Giving up: {}",
                    failure.error.as_ref().map(ToString::to_string).unwrap_or_default()
                );
                return failure;
            }

            StatsCounters::bump(&self.stats.retries);
            tracing::info!(
                url = %target,
                attempt,
                "Retrying in {:?} after {}",
                wait,
                failure.error.as_ref().map(ToString::to_string).unwrap_or_default()
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Sends a GET request with query parameters
    pub async fn get(&self, url: &str, params: &[(&str, String)]) -> Response {
        self.request(url, Method::GET, params, &HeaderMap::new()).await
    }

    /// Sends a GET request and returns the parsed JSON body
    pub async fn get_json(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Value, TransportError> {
        let response = self.get(url, params).await;
        if let Some(error) = response.error {
            return Err(error);
        }
        response
            .json
            .ok_or_else(|| TransportError::Body("response body is not valid JSON".to_string()))
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

/// Joins query parameters onto a URL
fn build_url(url: &str, params: &[(&str, String)]) -> Result<Url, TransportError> {
    let mut target =
        Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !params.is_empty() {
        let mut query = target.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok(target)
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Reads `Retry-After` as whole seconds; HTTP-date values are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs.ceil() as u64)
}

fn classify_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Network(format!("Connection failed: {}", e))
    } else if e.is_body() || e.is_decode() {
        TransportError::Body(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

fn success_response(status: u16, headers: HashMap<String, String>, body: String) -> Response {
    let json = match serde_json::from_str::<Value>(&body) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("Response body is not JSON: {}", e);
            None
        }
    };

    Response {
        status,
        headers,
        body,
        json,
        error: None,
    }
}

fn error_response(
    status: StatusCode,
    headers: HashMap<String, String>,
    body: String,
    error: TransportError,
) -> Response {
    Response {
        status: status.as_u16(),
        headers,
        body,
        json: None,
        error: Some(error),
    }
}
