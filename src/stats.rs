//! Cache policy counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of [`PolicyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Requests answered from the cache.
    pub cache_hits: u64,
    /// Cache-first lookups that found nothing.
    pub cache_misses: u64,
    /// Requests answered by the network.
    pub network_responses: u64,
    /// Network failures answered from the cache instead.
    pub offline_fallbacks: u64,
    /// Requests that got no response at all.
    pub unanswered: u64,
    /// Background cache writes that failed.
    pub write_failures: u64,
}

/// Lock-free counters updated while requests are handled.
#[derive(Debug, Default)]
pub struct PolicyStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    network_responses: AtomicU64,
    offline_fallbacks: AtomicU64,
    unanswered: AtomicU64,
    write_failures: AtomicU64,
}

impl PolicyStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_network(&self) {
        self.network_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.offline_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unanswered(&self) {
        self.unanswered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            network_responses: self.network_responses.load(Ordering::Relaxed),
            offline_fallbacks: self.offline_fallbacks.load(Ordering::Relaxed),
            unanswered: self.unanswered.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}
