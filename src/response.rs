//! Captured response snapshots.

use bytes::Bytes;

/// A response as stored in, or served from, a cache generation.
///
/// Cloning is cheap: the body is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Response {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces all headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the first header with the given name, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status >= 200 && self.status <= 299
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_range() {
        assert!(Response::new(200, "").is_ok());
        assert!(Response::new(204, "").is_ok());
        assert!(!Response::new(199, "").is_ok());
        assert!(!Response::new(304, "").is_ok());
        assert!(!Response::new(404, "").is_ok());
        assert!(!Response::new(500, "").is_ok());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let resp = Response::new(200, "{}").with_header("Content-Type", "application/json");
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert_eq!(resp.header("etag"), None);
    }
}
