//! Fetching and extraction of remote payloads.
//!
//! A [`Fetcher`] turns a locator into bytes; the extractors in [`html`] and
//! [`odds`] turn those bytes into a [`RawTable`](crate::models::RawTable).

pub mod html;
mod http_client;
mod memory;
pub mod odds;
mod retry;

pub use http_client::{resolve_user_agent, HttpFetcher};
pub use memory::MemoryFetcher;
pub use retry::{retry, RetryPolicy};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Bytes fetched from a locator.
#[derive(Debug, Clone)]
pub struct RawFetch {
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    /// Locator the body came from, query string removed.
    pub locator: String,
}

impl RawFetch {
    pub fn new(locator: &str, body: Vec<u8>) -> Self {
        Self {
            body,
            fetched_at: Utc::now(),
            locator: redact(locator),
        }
    }
}

/// Fetch failure, split by whether retrying can help.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Timeouts, connection errors, 5xx and 429.
    #[error("transient fetch error for {url}: {reason}")]
    Transient { url: String, reason: String },

    /// 404, other 4xx, malformed locators.
    #[error("fetch failed for {url}: {reason}")]
    Permanent { url: String, reason: String },
}

impl FetchError {
    pub fn transient(url: &str, reason: impl Into<String>) -> Self {
        FetchError::Transient {
            url: redact(url),
            reason: reason.into(),
        }
    }

    pub fn permanent(url: &str, reason: impl Into<String>) -> Self {
        FetchError::Permanent {
            url: redact(url),
            reason: reason.into(),
        }
    }

    /// Classify an unsuccessful HTTP status.
    pub fn from_status(url: &str, status: u16) -> Self {
        let reason = format!("HTTP {}", status);
        if RetryPolicy::is_retryable_status(status) {
            FetchError::transient(url, reason)
        } else {
            FetchError::permanent(url, reason)
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Drop the query string so credentials never reach logs or reports.
pub fn redact(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => base.to_string(),
        None => url.to_string(),
    }
}

/// Source of remote payloads.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the full body of `url`.
    async fn get(&self, url: &str) -> Result<RawFetch, FetchError>;

    /// Cheap existence check. `Ok(false)` for any non-200 answer.
    async fn exists(&self, url: &str) -> Result<bool, FetchError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for &T {
    async fn get(&self, url: &str) -> Result<RawFetch, FetchError> {
        (**self).get(url).await
    }

    async fn exists(&self, url: &str) -> Result<bool, FetchError> {
        (**self).exists(url).await
    }
}
