//! kinapp-offline - An offline cache policy for the kinapp web app.
//!
//! This library decides, per request, whether to answer from a versioned
//! local cache or from the network, keeps the current cache generation
//! pre-populated, and prunes generations left behind by older versions. The
//! cache backend and the network are traits, so the policy runs the same
//! against an in-memory store in tests and a disk store behind the proxy.
//!
//! # Example
//!
//! ```no_run
//! use kinapp_offline::{
//!     CacheConfig, FetchConfig, HttpFetcher, MemoryCacheStorage, OfflineCachePolicy, Request,
//!     WorkerHost,
//! };
//!
//! # async fn example() -> kinapp_offline::Result<()> {
//! let config = CacheConfig::default().with_origin("http://127.0.0.1:8000/");
//! let fetcher = HttpFetcher::new(&FetchConfig::default())?;
//! let policy = OfflineCachePolicy::new(&config, MemoryCacheStorage::new(), fetcher)?;
//!
//! // Install pre-caches the seed list, activation prunes stale generations.
//! let host = WorkerHost::new();
//! host.register(policy).await?;
//!
//! let url = reqwest::Url::parse("http://127.0.0.1:8000/static/manifest.json").unwrap();
//! let response = host.dispatch(&Request::get(url)).await?;
//! println!("HTTP {}", response.status());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod policy;
pub mod request;
pub mod response;
pub mod routes;
#[cfg(feature = "server")]
pub mod server;
pub mod stats;
pub mod storage;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::{AppConfig, CacheConfig, FetchConfig, ServerConfig};
pub use error::{Error, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use lifecycle::{ServiceWorker, WorkerHost, WorkerState};
pub use policy::OfflineCachePolicy;
pub use request::{CacheKey, Destination, Request};
pub use response::Response;
pub use routes::{Route, RouteTable, Strategy};
pub use stats::StatsSnapshot;
pub use storage::{CacheStorage, DiskCacheStorage, MemoryCacheStorage};
