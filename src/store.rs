//! Per-origin sandboxed key/value store
//!
//! Each trusted origin gets its own directory under the configured
//! profile directory. Every key is one plain-text file:
//!
//! ```text
//! <profile_dir>/
//!   https_example.org/     # sanitize(origin)
//!     eg.printers          # sanitize(key)
//!     eg.workstation
//! ```
//!
//! Storage faults never escape: every operation logs the failure and
//! reports it as `false` or an absent value.

use crate::error::StoreError;
use crate::sanitize::sanitize_key;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

type StoreResult<T> = std::result::Result<T, StoreError>;

/// File-backed text store rooted at `<base_dir>/<sanitize(origin)>`
#[derive(Debug, Clone)]
pub struct KeyStore {
    origin: String,
    root: PathBuf,
}

impl KeyStore {
    /// Create a store for one origin; no directory is created yet
    pub fn new(base_dir: impl Into<PathBuf>, origin: &str) -> Self {
        let root = base_dir.into().join(sanitize_key(origin));
        Self {
            origin: origin.to_string(),
            root,
        }
    }

    /// The sandbox root for this origin
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The origin this store was opened for
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Replace the content stored under `key`
    pub async fn set(&self, key: &str, text: &str) -> bool {
        tracing::debug!(origin = %self.origin, key, "set");
        self.report("set", key, self.try_write(key, text, false).await)
            .is_some()
    }

    /// Append to the content stored under `key`, creating it if absent
    pub async fn append(&self, key: &str, text: &str) -> bool {
        tracing::debug!(origin = %self.origin, key, "append");
        self.report("append", key, self.try_write(key, text, true).await)
            .is_some()
    }

    /// Read the content stored under `key`, or `None` if there is none
    pub async fn get(&self, key: &str) -> Option<String> {
        tracing::debug!(origin = %self.origin, key, "get");
        self.report("get", key, self.try_get(key).await).flatten()
    }

    /// Delete `key`; a key that never existed counts as removed
    pub async fn remove(&self, key: &str) -> bool {
        tracing::debug!(origin = %self.origin, key, "remove");
        self.report("remove", key, self.try_remove(key).await)
            .is_some()
    }

    /// List stored keys, optionally restricted to those starting with `prefix`
    pub async fn keys(&self, prefix: Option<&str>) -> BTreeSet<String> {
        tracing::debug!(origin = %self.origin, prefix = ?prefix, "keys");
        self.report("keys", prefix.unwrap_or(""), self.try_keys(prefix).await)
            .unwrap_or_default()
    }

    fn report<T>(&self, op: &str, key: &str, result: StoreResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    origin = %self.origin,
                    op,
                    key,
                    error = %e,
                    "Key store operation failed"
                );
                None
            }
        }
    }

    /// Create the sandbox directory (and the profile directory above it)
    async fn ensure_root(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: self.root.clone(),
                source,
            })
    }

    /// Path for `key`; reads never create the sandbox
    fn file_for(&self, key: &str) -> StoreResult<PathBuf> {
        let name = sanitize_key(key);
        if matches!(name.as_str(), "" | "." | "..") {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(name))
    }

    async fn try_write(&self, key: &str, text: &str, append: bool) -> StoreResult<()> {
        let path = self.file_for(key)?;
        self.ensure_root().await?;
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(text.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    async fn try_get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.file_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn try_remove(&self, key: &str) -> StoreResult<()> {
        let path = self.file_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn try_keys(&self, prefix: Option<&str>) -> StoreResult<BTreeSet<String>> {
        let io_err = |source| StoreError::Io {
            key: prefix.unwrap_or("").to_string(),
            source,
        };

        let mut names = BTreeSet::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(io_err(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let is_file = entry.file_type().await.map_err(io_err)?.is_file();
            if !is_file {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if prefix.map_or(true, |p| name.starts_with(p)) {
                names.insert(name);
            }
        }

        Ok(names)
    }
}
