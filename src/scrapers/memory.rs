//! Canned responses keyed by URL, for tests and offline runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{FetchError, Fetcher, RawFetch};

#[derive(Debug, Default)]
pub struct MemoryFetcher {
    responses: Mutex<HashMap<String, Result<Vec<u8>, FetchError>>>,
    gets: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`, replacing any previous response.
    pub fn insert(&self, url: &str, body: impl Into<Vec<u8>>) {
        lock(&self.responses).insert(url.to_string(), Ok(body.into()));
    }

    /// Fail every request for `url` with `error`.
    pub fn fail(&self, url: &str, error: FetchError) {
        lock(&self.responses).insert(url.to_string(), Err(error));
    }

    /// URLs passed to `get`, in call order.
    pub fn gets(&self) -> Vec<String> {
        lock(&self.gets).clone()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn get(&self, url: &str) -> Result<RawFetch, FetchError> {
        lock(&self.gets).push(url.to_string());
        match lock(&self.responses).get(url) {
            Some(Ok(body)) => Ok(RawFetch::new(url, body.clone())),
            Some(Err(e)) => Err(e.clone()),
            None => Err(FetchError::from_status(url, 404)),
        }
    }

    async fn exists(&self, url: &str) -> Result<bool, FetchError> {
        match lock(&self.responses).get(url) {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) if e.is_transient() => Err(e.clone()),
            _ => Ok(false),
        }
    }
}
