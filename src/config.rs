//! Configuration types for the offline cache and its hosting proxy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::routes::RouteTable;

/// Default cache generation label.
pub const DEFAULT_VERSION: &str = "kinapp-v1";

/// Resources fetched into every new generation at install time.
pub const DEFAULT_SEED_URLS: &[&str] = &[
    "/",
    "/static/index.html",
    "/static/manifest.json",
    "/static/icon-192.png",
    "/static/icon-512.png",
    "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700;800;900&family=Noto+Sans+JP:wght@300;400;500;700;900&display=swap",
    "https://fonts.googleapis.com/css2?family=Material+Symbols+Outlined:opsz,wght,FILL,GRAD@20..48,100..700,0..1,-50..200",
    "https://cdn.jsdelivr.net/npm/chart.js",
];

/// Configuration for the cache policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name of the current cache generation. Bumping it invalidates every
    /// previously cached entry on the next activation.
    pub version: String,
    /// Origin that relative URLs (seeds, proxied paths) resolve against.
    pub origin: String,
    /// Resources pre-fetched at install time, in order.
    pub seed_urls: Vec<String>,
    /// Path-prefix classification table.
    pub routes: RouteTable,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            origin: "http://127.0.0.1:8000/".to_string(),
            seed_urls: DEFAULT_SEED_URLS.iter().map(ToString::to_string).collect(),
            routes: RouteTable::default(),
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache generation label.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Replaces the seed list.
    #[must_use]
    pub fn with_seed_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seed_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the route table.
    #[must_use]
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }
}

/// Network fetch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds. A timeout counts as a network failure.
    pub timeout_secs: u64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            connect_timeout_secs: 5,
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Proxy server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Directory holding cache generations. `None` keeps everything in memory.
    pub cache_dir: Option<PathBuf>,
    /// Largest request body accepted by the proxy, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9780,
            cache_dir: dirs::cache_dir().map(|d| d.join("kinapp-offline")),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kinapp-offline")
            .join("config.toml")
    }

    /// Loads the config at `path`, or defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the config to `path` atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml::to_string(self)?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
