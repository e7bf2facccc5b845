//! Key/value cache with metadata, pluggable backends, and expiry
//! policy.
//!
//! A [`Cache`] hosts named [`CacheBin`]s. Each stored entry carries a
//! blob, a metadata [`Config`] reproducing the response headers it was
//! written with, and a timestamp consulted by [`CachePolicy`] expiry
//! checks. URL content from the HTTP client all goes through the
//! cache's default bin so multiple logical layers share one physical
//! cache.
//!
//! Backends: [`MemoryCache`] (LRU bins), [`DiskCache`] (filesystem
//! with sidecar metadata), and the SQLite-backed bin in
//! [`crate::mbtiles`].

pub mod disk;
pub mod memory;
mod policy;

pub use disk::DiskCache;
pub use memory::MemoryCache;
pub use policy::{must_revalidate, CachePolicy, CacheUsage};

use crate::config::Config;
use bytes::Bytes;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// Cache-related errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored metadata could not be parsed
    #[error("corrupt cache metadata for key {key}: {reason}")]
    CorruptMetadata { key: String, reason: String },

    /// Backend-specific failure (e.g. SQLite)
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Presence probe result for a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Ok,
    NotFound,
    IoError,
}

/// One stored cache entry: blob, response-header metadata, and the
/// entry timestamp used for expiry.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub data: Bytes,
    pub metadata: Config,
    pub last_modified: SystemTime,
}

/// Named scope inside a cache. Operations are blocking and
/// thread-safe.
pub trait CacheBin: Send + Sync {
    /// Reads an entry. `Ok(None)` means not found; `Err` means the
    /// entry exists but could not be read.
    fn read(&self, key: &str) -> Result<Option<CacheRecord>, CacheError>;

    /// Stores a blob with its metadata, stamping the entry with the
    /// current time.
    fn write(&self, key: &str, data: &[u8], metadata: &Config) -> Result<(), CacheError>;

    /// Refreshes the entry timestamp without rewriting the payload.
    /// Called when an upstream reports not-modified. Returns false if
    /// the entry does not exist.
    fn touch(&self, key: &str) -> bool;

    /// Removes an entry, returning whether one existed.
    fn remove(&self, key: &str) -> bool;

    /// Probes an entry without reading its payload.
    fn record_status(&self, key: &str) -> RecordStatus;

    /// Reads only an entry's metadata config.
    fn read_metadata(&self, key: &str) -> Result<Option<Config>, CacheError> {
        Ok(self.read(key)?.map(|record| record.metadata))
    }
}

/// A cache: a set of named bins plus the shared default bin.
pub trait Cache: Send + Sync {
    /// Returns the bin with the given id, creating it if needed.
    fn add_bin(&self, id: &str) -> Arc<dyn CacheBin>;

    /// Returns the bin with the given id if it exists.
    fn bin(&self, id: &str) -> Option<Arc<dyn CacheBin>>;

    /// Returns the default bin used for all URL content.
    fn default_bin(&self) -> Arc<dyn CacheBin>;
}

/// Cache plus policy, threaded through requests as one unit.
#[derive(Clone)]
pub struct CacheContext {
    pub cache: Arc<dyn Cache>,
    pub policy: CachePolicy,
}

impl CacheContext {
    pub fn new(cache: Arc<dyn Cache>, policy: CachePolicy) -> Self {
        Self { cache, policy }
    }
}
