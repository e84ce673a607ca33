//! reqwest-backed fetcher with retries and a per-request courtesy delay.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::retry::{retry, RetryPolicy};
use super::{FetchError, Fetcher, RawFetch};

const USER_AGENT: &str = concat!("matchsync/", env!("CARGO_PKG_VERSION"));

/// Real browser user agents for impersonate mode.
const IMPERSONATE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
];

fn random_user_agent() -> &'static str {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as usize)
        .unwrap_or(0);
    IMPERSONATE_USER_AGENTS[nanos % IMPERSONATE_USER_AGENTS.len()]
}

/// Resolve user agent from config value.
/// - None => default matchsync user agent
/// - "impersonate" => random real browser user agent
/// - other => custom user agent string
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config {
        None => USER_AGENT.to_string(),
        Some("impersonate") => random_user_agent().to_string(),
        Some(custom) => custom.to_string(),
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    let transient = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
    let status = err.status();
    // reqwest errors embed the full URL; keep only the cause.
    let reason = err.without_url().to_string();
    if transient {
        FetchError::transient(url, reason)
    } else if let Some(status) = status {
        FetchError::from_status(url, status.as_u16())
    } else {
        FetchError::permanent(url, reason)
    }
}

/// HTTP fetcher for all source kinds.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    request_delay: Duration,
    retry: RetryPolicy,
}

impl HttpFetcher {
    /// Create a new fetcher.
    /// - `user_agent`: see [`resolve_user_agent`]
    /// - `request_delay`: pause after every request, successful or not
    pub fn new(
        timeout: Duration,
        request_delay: Duration,
        user_agent: Option<&str>,
        retry: RetryPolicy,
    ) -> Result<Self, reqwest::Error> {
        let user_agent = resolve_user_agent(user_agent);
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            request_delay,
            retry,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn get_once(&self, url: &str, attempt: u32) -> Result<RawFetch, FetchError> {
        let start = Instant::now();
        let result = self.client.get(url).send().await;
        tokio::time::sleep(self.request_delay).await;

        let response = result.map_err(|e| classify(url, e))?;
        let status = response.status();
        debug!(
            "GET {} -> {} in {:?} (attempt {})",
            super::redact(url),
            status.as_u16(),
            start.elapsed(),
            attempt
        );
        if !status.is_success() {
            return Err(FetchError::from_status(url, status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| classify(url, e))?;
        Ok(RawFetch::new(url, body.to_vec()))
    }

    async fn head_once(&self, url: &str) -> Result<bool, FetchError> {
        let result = self.client.head(url).send().await;
        tokio::time::sleep(self.request_delay).await;

        let response = result.map_err(|e| classify(url, e))?;
        let status = response.status();
        debug!("HEAD {} -> {}", super::redact(url), status.as_u16());
        if RetryPolicy::is_retryable_status(status.as_u16()) {
            return Err(FetchError::from_status(url, status.as_u16()));
        }
        Ok(status == StatusCode::OK)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<RawFetch, FetchError> {
        retry(&self.retry, |attempt| self.get_once(url, attempt)).await
    }

    async fn exists(&self, url: &str) -> Result<bool, FetchError> {
        retry(&self.retry, |_| self.head_once(url)).await
    }
}
