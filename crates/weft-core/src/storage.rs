//! Blob-storage backend abstraction (object storage, local disk, memory).
//!
//! This module defines the storage contract consumed by the orchestration
//! layer for externalized values and scratch-directory sync. The contract is
//! deliberately narrow: whole-blob put/get plus optional public URL
//! resolution. Backends interpret paths as opaque `/`-separated keys.
//!
//! A configured backend is optional at the orchestration layer — in its
//! absence, large values stay inline in the job log.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};

/// Storage backend trait for blob storage.
///
/// All storage backends (GCS, S3, local disk, memory) implement this trait.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from multiple
/// executing jobs.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Writes a blob at `path`, replacing any existing blob.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Reads the blob at `path`.
    ///
    /// Returns [`Error::NotFound`] if no blob exists at the path.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Returns a publicly resolvable URL for `path`, if the backend supports
    /// public access.
    ///
    /// Backends without a public surface (local disk, memory without a
    /// configured base URL) return `None`.
    fn public_url(&self, path: &str) -> Option<String>;
}

/// In-memory storage backend for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
    public_base_url: Option<String>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("storage lock poisoned")
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a memory backend that resolves public URLs under `base_url`.
    #[must_use]
    pub fn with_public_base_url(base_url: impl Into<String>) -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
            public_base_url: Some(base_url.into()),
        }
    }

    /// Returns the number of blobs currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn blob_count(&self) -> Result<usize> {
        let count = {
            let blobs = self.blobs.read().map_err(poison_err)?;
            blobs.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(poison_err)?;
        blobs.insert(path.to_string(), data);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let blobs = self.blobs.read().map_err(poison_err)?;
        blobs.get(path).cloned().ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })
    }

    fn public_url(&self, path: &str) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{}/{path}", base.trim_end_matches('/')))
    }
}
