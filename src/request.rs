//! Request model and cache keys.

use std::fmt;

use bytes::Bytes;
use reqwest::{Method, Url};

use crate::error::{Error, Result};

/// What the requester intends to do with the response.
///
/// Mirrors the values browsers send in `Sec-Fetch-Dest`. Only
/// [`Destination::Document`] counts as a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// A full page load.
    Document,
    Style,
    Script,
    Image,
    Font,
    Manifest,
    /// `fetch()` / XHR calls.
    #[default]
    Empty,
    /// Anything else (`audio`, `worker`, `iframe`, ...).
    Other,
}

impl Destination {
    /// Parses a `Sec-Fetch-Dest` header value. Unknown values map to [`Destination::Other`].
    #[must_use]
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" => Self::Document,
            "style" => Self::Style,
            "script" => Self::Script,
            "image" => Self::Image,
            "font" => Self::Font,
            "manifest" => Self::Manifest,
            "empty" | "" => Self::Empty,
            _ => Self::Other,
        }
    }

    /// Returns true for full-page navigations.
    #[must_use]
    pub const fn is_navigation(self) -> bool {
        matches!(self, Self::Document)
    }
}

/// Identity of a cached entry: the request URL without its fragment.
///
/// Only `GET` requests have a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key for a URL.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    /// Returns the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves `input` against `origin`. Absolute URLs are returned unchanged.
///
/// # Errors
///
/// Returns [`Error::Url`] if the input cannot be parsed.
pub fn resolve_url(origin: &Url, input: &str) -> Result<Url> {
    origin.join(input).map_err(|e| Error::Url {
        url: input.to_string(),
        reason: e.to_string(),
    })
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    destination: Destination,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Request {
    /// Creates a request with an empty body and no headers.
    #[must_use]
    pub const fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            destination: Destination::Empty,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a `GET` request.
    #[must_use]
    pub const fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Sets the request destination.
    #[must_use]
    pub const fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Adds a header forwarded to the network.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub const fn destination(&self) -> Destination {
        self.destination
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the cache key, or `None` for methods the cache never stores.
    #[must_use]
    pub fn cache_key(&self) -> Option<CacheKey> {
        (self.method == Method::GET).then(|| CacheKey::from_url(&self.url))
    }
}
