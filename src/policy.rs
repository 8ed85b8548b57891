//! The offline cache policy.
//!
//! [`OfflineCachePolicy`] decides, per request, whether to answer from the
//! current cache generation or from the network, and keeps that generation
//! populated and pruned across versions:
//!
//! - **install** pre-fetches the seed list into the current generation,
//!   all-or-nothing.
//! - **handle** classifies the request path against the route table and runs
//!   either the network-first or the cache-first strategy.
//! - **cleanup** deletes every generation other than the current one.
//!
//! Cache writes triggered by traffic run in the background and never hold up
//! or fail the response they copy.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Url;
use tokio_util::task::TaskTracker;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::lifecycle::ServiceWorker;
use crate::request::{CacheKey, Request, resolve_url};
use crate::response::Response;
use crate::routes::{RouteTable, Strategy};
use crate::stats::{PolicyStats, StatsSnapshot};
use crate::storage::CacheStorage;

/// Cache-first / network-first request policy over a versioned cache.
pub struct OfflineCachePolicy<S, F> {
    version: String,
    seeds: Vec<Url>,
    routes: RouteTable,
    offline_page: CacheKey,
    storage: Arc<S>,
    fetcher: F,
    stats: Arc<PolicyStats>,
    writes: TaskTracker,
}

impl<S, F> OfflineCachePolicy<S, F>
where
    S: CacheStorage + 'static,
    F: Fetcher,
{
    /// Creates a policy that owns its storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the version label is empty, the origin is not an
    /// absolute URL, or a seed URL cannot be resolved.
    pub fn new(config: &CacheConfig, storage: S, fetcher: F) -> Result<Self> {
        Self::with_shared_storage(config, Arc::new(storage), fetcher)
    }

    /// Creates a policy over storage shared with other owners (for example a
    /// previous policy version that is still draining requests).
    ///
    /// # Errors
    ///
    /// Same as [`OfflineCachePolicy::new`].
    pub fn with_shared_storage(config: &CacheConfig, storage: Arc<S>, fetcher: F) -> Result<Self> {
        if config.version.trim().is_empty() {
            return Err(Error::Config("cache version must not be empty".to_string()));
        }
        let origin = Url::parse(&config.origin).map_err(|e| Error::Url {
            url: config.origin.clone(),
            reason: e.to_string(),
        })?;
        let seeds = config
            .seed_urls
            .iter()
            .map(|seed| resolve_url(&origin, seed))
            .collect::<Result<Vec<_>>>()?;
        let offline_page = CacheKey::from_url(&resolve_url(&origin, "/")?);

        Ok(Self {
            version: config.version.clone(),
            seeds,
            routes: config.routes.clone(),
            offline_page,
            storage,
            fetcher,
            stats: Arc::new(PolicyStats::new()),
            writes: TaskTracker::new(),
        })
    }

    /// Name of the cache generation this policy reads and writes.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Resolved seed URLs, in install order.
    #[must_use]
    pub fn seeds(&self) -> &[Url] {
        &self.seeds
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the strategy the route table assigns to a request.
    #[must_use]
    pub fn strategy_for(&self, request: &Request) -> Strategy {
        self.routes.classify(request.url().path())
    }

    /// Opens the current generation and stores every seed resource in it.
    ///
    /// All seeds are fetched before anything is written. If any fetch fails or
    /// returns a non-ok status, nothing is stored and the install fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Install`] naming the first failing seed, or a storage
    /// error if the generation cannot be opened or written.
    pub async fn install(&self) -> Result<usize> {
        self.storage.open(&self.version).await?;
        log::info!("Opened cache {}", self.version);

        let fetches = self.seeds.iter().map(|url| async move {
            let response = self
                .fetcher
                .fetch(&Request::get(url.clone()))
                .await
                .map_err(|e| Error::Install {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            if !response.is_ok() {
                return Err(Error::Install {
                    url: url.to_string(),
                    reason: format!("HTTP status {}", response.status()),
                });
            }
            Ok((CacheKey::from_url(url), response))
        });
        let entries = try_join_all(fetches).await?;

        self.storage.put_all(&self.version, &entries).await?;
        log::info!(
            "Pre-cached {} resources in {}",
            entries.len(),
            self.version
        );
        Ok(entries.len())
    }

    /// Answers a request according to its classified strategy.
    ///
    /// # Errors
    ///
    /// - Network-first: [`Error::NoResponse`] when the network is unreachable
    ///   and nothing is cached.
    /// - Cache-first: the network error when nothing is cached and the request
    ///   is not a navigation; [`Error::NoResponse`] when it is a navigation and
    ///   the offline page is not cached either.
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        let strategy = self.strategy_for(request);
        log::debug!(
            "{} {} -> {}",
            request.method(),
            request.url(),
            strategy.label()
        );
        match strategy {
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
        }
    }

    async fn network_first(&self, request: &Request) -> Result<Response> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.stats.record_network();
                if response.is_ok() {
                    if let Some(key) = request.cache_key() {
                        self.store_in_background(key, response.clone());
                    }
                }
                Ok(response)
            }
            Err(e) => {
                log::debug!("Network unavailable, trying cache: {e}");
                let cached = match request.cache_key() {
                    Some(key) => self.cached(&key).await,
                    None => None,
                };
                if let Some(response) = cached {
                    self.stats.record_fallback();
                    Ok(response)
                } else {
                    self.stats.record_unanswered();
                    Err(Error::NoResponse {
                        url: request.url().to_string(),
                    })
                }
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response> {
        let key = request.cache_key();
        if let Some(key) = &key {
            if let Some(hit) = self.cached(key).await {
                self.stats.record_hit();
                return Ok(hit);
            }
            self.stats.record_miss();
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.stats.record_network();
                if let Some(key) = key {
                    self.store_in_background(key, response.clone());
                }
                Ok(response)
            }
            Err(e) if request.destination().is_navigation() => {
                log::debug!("Navigation failed, serving offline page: {e}");
                if let Some(page) = self.cached(&self.offline_page).await {
                    self.stats.record_fallback();
                    Ok(page)
                } else {
                    self.stats.record_unanswered();
                    Err(Error::NoResponse {
                        url: request.url().to_string(),
                    })
                }
            }
            Err(e) => {
                self.stats.record_unanswered();
                Err(e)
            }
        }
    }

    /// Looks up `key` in the current generation. Storage errors count as a miss.
    async fn cached(&self, key: &CacheKey) -> Option<Response> {
        match self.storage.lookup(&self.version, key).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Cache lookup failed for {key}: {e}");
                None
            }
        }
    }

    /// Writes a copy of `response` into the current generation without
    /// blocking the caller. Failures are logged and counted.
    fn store_in_background(&self, key: CacheKey, response: Response) {
        let storage = Arc::clone(&self.storage);
        let stats = Arc::clone(&self.stats);
        let generation = self.version.clone();
        self.writes.spawn(async move {
            match storage.put(&generation, &key, &response).await {
                Ok(()) => log::debug!("Cached {key} in {generation}"),
                Err(e) => {
                    stats.record_write_failure();
                    log::warn!("Failed to cache {key}: {e}");
                }
            }
        });
    }

    /// Waits until every background cache write started so far has finished.
    pub async fn settle(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Deletes every cache generation except the current one and returns the
    /// names removed. Running it again without a version change removes nothing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if generations cannot be listed or deleted.
    pub async fn cleanup(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.storage.names().await? {
            if name == self.version {
                continue;
            }
            log::info!("Deleting old cache: {name}");
            if self.storage.delete(&name).await? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl<S, F> ServiceWorker for OfflineCachePolicy<S, F>
where
    S: CacheStorage + 'static,
    F: Fetcher,
{
    fn version(&self) -> &str {
        &self.version
    }

    async fn on_install(&self) -> Result<()> {
        self.install().await.map(|_| ())
    }

    async fn on_activate(&self) -> Result<()> {
        self.cleanup().await.map(|_| ())
    }

    async fn on_fetch(&self, request: &Request) -> Result<Response> {
        self.handle(request).await
    }

    fn skip_waiting(&self) -> bool {
        true
    }

    fn stats(&self) -> Option<StatsSnapshot> {
        Some(self.stats.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::request::Destination;
    use crate::storage::MemoryCacheStorage;
    use crate::testing::{FlakyStorage, ORIGIN, ScriptedFetcher, url};
    use reqwest::Method;

    fn config(version: &str) -> CacheConfig {
        CacheConfig::new()
            .with_version(version)
            .with_origin(ORIGIN)
            .with_seed_urls(["/", "/static/index.html", "/static/manifest.json"])
    }

    fn seeded_fetcher() -> Arc<ScriptedFetcher> {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond("/", Response::new(200, "<html>home</html>"));
        fetcher.respond("/static/index.html", Response::new(200, "<html>index</html>"));
        fetcher.respond(
            "/static/manifest.json",
            Response::new(200, r#"{"name":"kinapp"}"#).with_header("Content-Type", "application/json"),
        );
        fetcher
    }

    fn policy(
        storage: MemoryCacheStorage,
        fetcher: &Arc<ScriptedFetcher>,
    ) -> OfflineCachePolicy<MemoryCacheStorage, Arc<ScriptedFetcher>> {
        OfflineCachePolicy::new(&config("kinapp-v1"), storage, Arc::clone(fetcher)).unwrap()
    }

    fn navigate(path: &str) -> Request {
        Request::get(url(path)).with_destination(Destination::Document)
    }

    #[test]
    fn rejects_empty_version_and_relative_origin() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        assert!(matches!(
            OfflineCachePolicy::new(&config(" "), MemoryCacheStorage::new(), Arc::clone(&fetcher)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            OfflineCachePolicy::new(
                &config("kinapp-v1").with_origin("/relative"),
                MemoryCacheStorage::new(),
                fetcher
            ),
            Err(Error::Url { .. })
        ));
    }

    #[test]
    fn seeds_resolve_against_origin() {
        let fetcher = seeded_fetcher();
        let policy = OfflineCachePolicy::new(
            &CacheConfig::new().with_origin(ORIGIN),
            MemoryCacheStorage::new(),
            fetcher,
        )
        .unwrap();
        assert_eq!(policy.seeds()[0].as_str(), "http://kinapp.test/");
        assert_eq!(policy.seeds()[7].as_str(), "https://cdn.jsdelivr.net/npm/chart.js");
    }

    #[tokio::test]
    async fn seeds_are_served_from_cache_after_install() {
        let fetcher = seeded_fetcher();
        let policy = policy(MemoryCacheStorage::new(), &fetcher);

        assert_eq!(policy.install().await.unwrap(), 3);
        let calls_after_install = fetcher.calls();
        fetcher.set_offline(true);

        for path in ["/", "/static/index.html", "/static/manifest.json"] {
            let resp = policy.handle(&Request::get(url(path))).await.unwrap();
            assert_eq!(resp.status(), 200, "{path}");
        }
        assert_eq!(fetcher.calls(), calls_after_install);
        assert_eq!(policy.stats().cache_hits, 3);
    }

    #[tokio::test]
    async fn install_is_all_or_nothing() {
        let fetcher = seeded_fetcher();
        fetcher.unreachable("/static/manifest.json");
        let storage = MemoryCacheStorage::new();
        let policy = policy(storage.clone(), &fetcher);

        let err = policy.install().await.unwrap_err();
        assert!(matches!(err, Error::Install { ref url, .. } if url.ends_with("/static/manifest.json")));
        assert_eq!(storage.len("kinapp-v1"), Some(0));
    }

    #[tokio::test]
    async fn install_rejects_non_ok_seed() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/static/index.html", Response::new(404, "gone"));
        let storage = MemoryCacheStorage::new();
        let policy = policy(storage.clone(), &fetcher);

        let err = policy.install().await.unwrap_err();
        assert!(err.to_string().contains("404"));
        assert_eq!(storage.len("kinapp-v1"), Some(0));
    }

    #[tokio::test]
    async fn dynamic_request_returns_live_response_and_updates_cache() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/meals/today", Response::new(200, r#"[{"id":1}]"#));
        let policy = policy(MemoryCacheStorage::new(), &fetcher);

        let live = policy.handle(&Request::get(url("/meals/today"))).await.unwrap();
        assert_eq!(live.body().as_ref(), br#"[{"id":1}]"#);
        policy.settle().await;

        fetcher.set_offline(true);
        let offline = policy.handle(&Request::get(url("/meals/today"))).await.unwrap();
        assert_eq!(offline, live);
        assert_eq!(policy.stats().offline_fallbacks, 1);
    }

    #[tokio::test]
    async fn dynamic_request_prefers_network_over_cache() {
        let fetcher = seeded_fetcher();
        let storage = MemoryCacheStorage::new();
        storage
            .put("kinapp-v1", &CacheKey::from_url(&url("/weights")), &Response::new(200, "stale"))
            .await
            .unwrap();
        fetcher.respond("/weights", Response::new(200, "fresh"));
        let policy = policy(storage.clone(), &fetcher);

        let resp = policy.handle(&Request::get(url("/weights"))).await.unwrap();
        assert_eq!(resp.body().as_ref(), b"fresh");
        policy.settle().await;
        let cached = storage
            .lookup("kinapp-v1", &CacheKey::from_url(&url("/weights")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.body().as_ref(), b"fresh");
    }

    #[tokio::test]
    async fn dynamic_offline_returns_stored_entry_unchanged() {
        let fetcher = seeded_fetcher();
        fetcher.set_offline(true);
        let storage = MemoryCacheStorage::new();
        let stored = Response::new(200, vec![0u8, 159, 146, 150])
            .with_header("ETag", "\"abc\"");
        storage
            .put("kinapp-v1", &CacheKey::from_url(&url("/users/me")), &stored)
            .await
            .unwrap();
        let policy = policy(storage, &fetcher);

        let resp = policy.handle(&Request::get(url("/users/me"))).await.unwrap();
        assert_eq!(resp, stored);
    }

    #[tokio::test]
    async fn dynamic_offline_without_cache_has_no_response() {
        let fetcher = seeded_fetcher();
        fetcher.set_offline(true);
        let policy = policy(MemoryCacheStorage::new(), &fetcher);

        let err = policy.handle(&Request::get(url("/friends"))).await.unwrap_err();
        assert!(matches!(err, Error::NoResponse { .. }));
        assert_eq!(policy.stats().unanswered, 1);
    }

    #[tokio::test]
    async fn dynamic_server_error_is_returned_but_not_cached() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/meals/today", Response::new(500, "boom"));
        let storage = MemoryCacheStorage::new();
        let key = CacheKey::from_url(&url("/meals/today"));
        storage
            .put("kinapp-v1", &key, &Response::new(200, "yesterday"))
            .await
            .unwrap();
        let policy = policy(storage.clone(), &fetcher);

        let resp = policy.handle(&Request::get(url("/meals/today"))).await.unwrap();
        assert_eq!(resp.status(), 500);
        policy.settle().await;

        let cached = storage.lookup("kinapp-v1", &key).await.unwrap().unwrap();
        assert_eq!(cached.body().as_ref(), b"yesterday");
        assert_eq!(policy.stats().offline_fallbacks, 0);
    }

    #[tokio::test]
    async fn dynamic_post_is_never_cached() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/memo", Response::new(201, "created"));
        let storage = MemoryCacheStorage::new();
        let policy = policy(storage.clone(), &fetcher);

        let post = Request::new(Method::POST, url("/memo")).with_body("text=hi");
        assert_eq!(policy.handle(&post).await.unwrap().status(), 201);
        policy.settle().await;
        assert_eq!(storage.len("kinapp-v1"), None);

        fetcher.set_offline(true);
        assert!(matches!(
            policy.handle(&post).await,
            Err(Error::NoResponse { .. })
        ));
    }

    #[tokio::test]
    async fn manifest_is_fetched_before_install_and_cached_after() {
        let fetcher = seeded_fetcher();
        let storage = MemoryCacheStorage::new();
        let policy = policy(storage.clone(), &fetcher);

        let resp = policy
            .handle(&Request::get(url("/static/manifest.json")))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(fetcher.calls(), 1);
        policy.settle().await;
        assert_eq!(storage.len("kinapp-v1"), Some(1));

        policy.install().await.unwrap();
        fetcher.set_offline(true);
        let resp = policy
            .handle(&Request::get(url("/static/manifest.json")))
            .await
            .unwrap();
        assert_eq!(resp.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn static_miss_stores_response_whatever_its_status() {
        let fetcher = seeded_fetcher();
        let storage = MemoryCacheStorage::new();
        let policy = policy(storage.clone(), &fetcher);

        let resp = policy.handle(&Request::get(url("/static/missing.css"))).await.unwrap();
        assert_eq!(resp.status(), 404);
        policy.settle().await;

        fetcher.set_offline(true);
        let again = policy.handle(&Request::get(url("/static/missing.css"))).await.unwrap();
        assert_eq!(again.status(), 404);
    }

    #[tokio::test]
    async fn navigation_falls_back_to_cached_root() {
        let fetcher = seeded_fetcher();
        let policy = policy(MemoryCacheStorage::new(), &fetcher);
        policy.install().await.unwrap();
        fetcher.set_offline(true);

        let resp = policy.handle(&navigate("/dashboard")).await.unwrap();
        assert_eq!(resp.body().as_ref(), b"<html>home</html>");
        assert_eq!(policy.stats().offline_fallbacks, 1);
    }

    #[tokio::test]
    async fn navigation_without_cached_root_has_no_response() {
        let fetcher = seeded_fetcher();
        fetcher.set_offline(true);
        let policy = policy(MemoryCacheStorage::new(), &fetcher);

        assert!(matches!(
            policy.handle(&navigate("/dashboard")).await,
            Err(Error::NoResponse { .. })
        ));
    }

    #[tokio::test]
    async fn static_non_navigation_failure_propagates() {
        let fetcher = seeded_fetcher();
        let policy = policy(MemoryCacheStorage::new(), &fetcher);
        policy.install().await.unwrap();
        fetcher.set_offline(true);

        let request = Request::get(url("/static/app.js")).with_destination(Destination::Script);
        let err = policy.handle(&request).await.unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn cache_write_failure_still_returns_response() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/exercises", Response::new(200, "[]"));
        let storage = FlakyStorage::default();
        storage.fail_writes.store(true, Ordering::SeqCst);
        let policy = OfflineCachePolicy::new(&config("kinapp-v1"), storage, Arc::clone(&fetcher)).unwrap();

        let resp = policy.handle(&Request::get(url("/exercises"))).await.unwrap();
        assert_eq!(resp.body().as_ref(), b"[]");
        let resp = policy.handle(&Request::get(url("/static/index.html"))).await.unwrap();
        assert_eq!(resp.status(), 200);
        policy.settle().await;
        assert_eq!(policy.stats().write_failures, 2);
    }

    #[tokio::test]
    async fn cache_read_failure_falls_through_to_network() {
        let fetcher = seeded_fetcher();
        let storage = FlakyStorage::default();
        storage.fail_reads.store(true, Ordering::SeqCst);
        let policy = OfflineCachePolicy::new(&config("kinapp-v1"), storage, Arc::clone(&fetcher)).unwrap();

        let resp = policy.handle(&Request::get(url("/static/index.html"))).await.unwrap();
        assert_eq!(resp.body().as_ref(), b"<html>index</html>");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn cleanup_deletes_only_stale_generations() {
        let fetcher = seeded_fetcher();
        let storage = MemoryCacheStorage::new();
        storage.open("kinapp-v0").await.unwrap();
        storage.open("kinapp-v1").await.unwrap();
        let policy = policy(storage.clone(), &fetcher);

        assert_eq!(policy.cleanup().await.unwrap(), vec!["kinapp-v0"]);
        assert_eq!(storage.names().await.unwrap(), vec!["kinapp-v1"]);
        assert!(policy.cleanup().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lookups_ignore_other_generations() {
        let fetcher = seeded_fetcher();
        fetcher.set_offline(true);
        let storage = MemoryCacheStorage::new();
        storage
            .put("kinapp-v0", &CacheKey::from_url(&url("/settings")), &Response::new(200, "old"))
            .await
            .unwrap();
        let policy = policy(storage, &fetcher);

        assert!(policy.handle(&Request::get(url("/settings"))).await.is_err());
    }
}
