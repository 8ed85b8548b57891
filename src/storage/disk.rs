//! File-backed cache storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<base64url(generation name)>/<sha256(key)>.toml
//! ```
//!
//! Each entry is one TOML file holding the key, status, headers, a timestamp,
//! and the base64 body. Writes go to a uniquely named temp file first and are
//! renamed into place, so readers only ever see whole entries.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CacheStorage;
use crate::error::{Error, Result};
use crate::request::CacheKey;
use crate::response::Response;

#[derive(Debug, Serialize, Deserialize)]
struct StoredHeader {
    name: String,
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    status: u16,
    stored_at: DateTime<Utc>,
    body: String,
    headers: Vec<StoredHeader>,
}

impl StoredEntry {
    fn new(key: &CacheKey, response: &Response) -> Self {
        Self {
            key: key.as_str().to_string(),
            status: response.status(),
            stored_at: Utc::now(),
            body: BASE64.encode(response.body()),
            headers: response
                .headers()
                .iter()
                .map(|(name, value)| StoredHeader {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    fn into_response(self) -> Result<Response> {
        let body = BASE64
            .decode(self.body.as_bytes())
            .map_err(|e| Error::Storage(format!("corrupt body for {}: {e}", self.key)))?;
        Ok(Response::new(self.status, body).with_headers(
            self.headers
                .into_iter()
                .map(|h| (h.name, h.value))
                .collect(),
        ))
    }
}

/// Cache storage persisted under a directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> PathBuf {
        self.root.join(URL_SAFE_NO_PAD.encode(name))
    }

    fn entry_path(&self, name: &str, key: &CacheKey) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        let file: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.generation_dir(name).join(format!("{file}.toml"))
    }

    /// Serializes an entry to a temp file next to its final path and returns
    /// the temp path.
    async fn write_tmp(&self, name: &str, key: &CacheKey, response: &Response) -> Result<PathBuf> {
        let path = self.entry_path(name, key);
        let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        let toml_str = toml::to_string(&StoredEntry::new(key, response))?;
        tokio::fs::write(&tmp_path, toml_str).await?;
        Ok(tmp_path)
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.generation_dir(name)).await?;
        Ok(())
    }

    async fn lookup(&self, name: &str, key: &CacheKey) -> Result<Option<Response>> {
        let contents = match tokio::fs::read_to_string(self.entry_path(name, key)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: StoredEntry = toml::from_str(&contents)?;
        // Digest collisions are not expected, but never serve a foreign entry.
        if entry.key != key.as_str() {
            return Ok(None);
        }
        entry.into_response().map(Some)
    }

    async fn put(&self, name: &str, key: &CacheKey, response: &Response) -> Result<()> {
        self.open(name).await?;
        let tmp_path = self.write_tmp(name, key, response).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, self.entry_path(name, key)).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
        self.open(name).await?;

        let mut staged = Vec::with_capacity(entries.len());
        for (key, response) in entries {
            match self.write_tmp(name, key, response).await {
                Ok(tmp_path) => staged.push((tmp_path, self.entry_path(name, key))),
                Err(e) => {
                    for (tmp_path, _) in &staged {
                        let _ = tokio::fs::remove_file(tmp_path).await;
                    }
                    return Err(e);
                }
            }
        }

        for (i, (tmp_path, path)) in staged.iter().enumerate() {
            if let Err(e) = tokio::fs::rename(tmp_path, path).await {
                log::warn!("Rolling back batch write to {name}: {e}");
                for (_, done) in &staged[..i] {
                    let _ = tokio::fs::remove_file(done).await;
                }
                for (pending, _) in &staged[i..] {
                    let _ = tokio::fs::remove_file(pending).await;
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name();
            let decoded = dir_name
                .to_str()
                .and_then(|s| URL_SAFE_NO_PAD.decode(s).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match decoded {
                Some(name) => names.push(name),
                None => log::debug!("Ignoring foreign directory {}", entry.path().display()),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.generation_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
