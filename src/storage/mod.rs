//! Cache storage abstraction.
//!
//! A [`CacheStorage`] holds named cache generations, each mapping
//! [`CacheKey`]s to [`Response`] snapshots. Implementations must make each
//! per-key read or write atomic; concurrent writes to one key are
//! last-write-wins.

use async_trait::async_trait;

use crate::error::Result;
use crate::request::CacheKey;
use crate::response::Response;

mod disk;
mod memory;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Named, versioned request/response buckets.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the named generation, creating it if absent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Looks up `key` in the named generation. A missing generation is a miss.
    async fn lookup(&self, name: &str, key: &CacheKey) -> Result<Option<Response>>;

    /// Stores `response` under `key`, replacing any existing entry.
    async fn put(&self, name: &str, key: &CacheKey, response: &Response) -> Result<()>;

    /// Stores a batch of entries. Either every entry is visible afterwards or
    /// the call fails and none of the batch's entries are left in place.
    async fn put_all(&self, name: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

    /// Lists the names of all existing generations.
    async fn names(&self) -> Result<Vec<String>>;

    /// Deletes the named generation. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;
}
