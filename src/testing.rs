//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::Url;

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::request::{CacheKey, Request};
use crate::response::Response;
use crate::storage::{CacheStorage, MemoryCacheStorage};

pub const ORIGIN: &str = "http://kinapp.test/";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Fetcher answering from a fixed table. Unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Response>>,
    unreachable: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .insert(url(path).to_string(), response);
    }

    pub fn unreachable(&self, path: &str) {
        self.unreachable.lock().unwrap().insert(url(path).to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = request.url().to_string();
        if self.offline.load(Ordering::SeqCst) || self.unreachable.lock().unwrap().contains(&url) {
            return Err(Error::Network(format!("{url}: connection refused")));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found")))
    }
}

/// Storage whose reads and writes can be made to fail.
#[derive(Default)]
pub struct FlakyStorage {
    pub inner: MemoryCacheStorage,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
}

#[async_trait]
impl CacheStorage for FlakyStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.inner.open(name).await
    }

    async fn lookup(&self, name: &str, key: &CacheKey) -> Result<Option<Response>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage("read failed".to_string()));
        }
        self.inner.lookup(name, key).await
    }

    async fn put(&self, name: &str, key: &CacheKey, response: &Response) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("quota exceeded".to_string()));
        }
        self.inner.put(name, key, response).await
    }

    async fn put_all(&self, name: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("quota exceeded".to_string()));
        }
        self.inner.put_all(name, entries).await
    }

    async fn names(&self) -> Result<Vec<String>> {
        self.inner.names().await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        self.inner.delete(name).await
    }
}
