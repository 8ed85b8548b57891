//! Error types for the kinapp-offline library.

use thiserror::Error;

/// Errors that can occur while installing, serving, or pruning the offline cache.
#[derive(Error, Debug)]
pub enum Error {
    /// Pre-population of a cache generation failed.
    #[error("Install failed for {url}: {reason}")]
    Install {
        /// Seed URL that could not be cached.
        url: String,
        /// Why the seed was rejected.
        reason: String,
    },

    /// Neither the network nor the cache produced a response.
    #[error("No response available for {url}")]
    NoResponse {
        /// URL of the unanswered request.
        url: String,
    },

    /// The network fetch itself failed (offline, timeout, DNS).
    #[error("Network error: {0}")]
    Network(String),

    /// A request was dispatched before any worker finished activating.
    #[error("No active worker")]
    NoActiveWorker,

    /// Cache storage backend failure.
    #[error("Cache storage error: {0}")]
    Storage(String),

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// URL could not be parsed or resolved.
    #[error("Invalid URL {url}: {reason}")]
    Url {
        /// The offending input.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// I/O error during cache file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Config file could not be parsed.
    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// Config or cache entry could not be serialized.
    #[error("Serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    /// Returns true if the error means the network was unreachable, as opposed
    /// to a cache or configuration problem.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http(_))
    }
}

/// A specialized `Result` type for kinapp-offline operations.
pub type Result<T> = std::result::Result<T, Error>;
