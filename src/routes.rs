//! Declarative request classification.
//!
//! A [`RouteTable`] is an ordered list of `(prefix, strategy)` pairs checked
//! against the request path. The first matching prefix decides the strategy;
//! paths that match nothing use the table's fallback.

use serde::{Deserialize, Serialize};

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Try the network, fall back to the cache when the network is unreachable.
    /// Used for live application data.
    NetworkFirst,
    /// Serve from the cache, fetch and store on a miss.
    /// Used for fixed assets.
    CacheFirst,
}

impl Strategy {
    /// Short label used in logs and the status endpoint.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NetworkFirst => "network-first",
            Self::CacheFirst => "cache-first",
        }
    }
}

/// A single path-prefix rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Path prefix, matched with `str::starts_with`.
    pub prefix: String,
    /// Strategy applied when the prefix matches.
    pub strategy: Strategy,
}

impl Route {
    /// Creates a new route.
    #[must_use]
    pub fn new(prefix: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            prefix: prefix.into(),
            strategy,
        }
    }
}

/// Path prefixes that carry live application data.
pub const DYNAMIC_PREFIXES: &[&str] = &[
    "/api/",
    "/memo",
    "/meals",
    "/weights",
    "/exercises",
    "/friends",
    "/users",
    "/settings",
];

/// Ordered prefix table with a fallback strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    /// Strategy for paths no rule matches.
    pub fallback: Strategy,
    /// Rules checked in order.
    pub routes: Vec<Route>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            fallback: Strategy::CacheFirst,
            routes: DYNAMIC_PREFIXES
                .iter()
                .map(|prefix| Route::new(*prefix, Strategy::NetworkFirst))
                .collect(),
        }
    }
}

impl RouteTable {
    /// Creates an empty table where everything uses `fallback`.
    #[must_use]
    pub const fn new(fallback: Strategy) -> Self {
        Self {
            fallback,
            routes: Vec::new(),
        }
    }

    /// Appends a rule after the existing ones.
    #[must_use]
    pub fn with_route(mut self, prefix: impl Into<String>, strategy: Strategy) -> Self {
        self.routes.push(Route::new(prefix, strategy));
        self
    }

    /// Returns the strategy for a URL path.
    #[must_use]
    pub fn classify(&self, path: &str) -> Strategy {
        self.routes
            .iter()
            .find(|route| path.starts_with(&route.prefix))
            .map_or(self.fallback, |route| route.strategy)
    }
}
