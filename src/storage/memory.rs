//! In-process cache storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::request::CacheKey;
use crate::response::Response;

type Generations = BTreeMap<String, HashMap<CacheKey, Response>>;

/// Cache storage kept in memory. Cloning shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    generations: Arc<Mutex<Generations>>,
}

impl MemoryCacheStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a generation, or `None` if it does not exist.
    #[must_use]
    pub fn len(&self, name: &str) -> Option<usize> {
        self.lock().ok()?.get(name).map(HashMap::len)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Generations>> {
        self.generations
            .lock()
            .map_err(|_| Error::Storage("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.lock()?.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn lookup(&self, name: &str, key: &CacheKey) -> Result<Option<Response>> {
        Ok(self
            .lock()?
            .get(name)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, name: &str, key: &CacheKey, response: &Response) -> Result<()> {
        self.lock()?
            .entry(name.to_string())
            .or_default()
            .insert(key.clone(), response.clone());
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
        let mut generations = self.lock()?;
        let generation = generations.entry(name.to_string()).or_default();
        for (key, response) in entries {
            generation.insert(key.clone(), response.clone());
        }
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.remove(name).is_some())
    }
}
