//! Filesystem cache bin: one blob file per key plus a JSON sidecar
//! holding the metadata config and the entry timestamp.

use super::{Cache, CacheBin, CacheError, CacheRecord, RecordStatus};
use crate::config::Config;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

const DEFAULT_BIN: &str = "__default";

/// Sidecar file contents: entry timestamp and response metadata.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    /// Seconds since the unix epoch.
    modified: u64,
    metadata: Config,
}

impl Sidecar {
    fn now(metadata: Config) -> Self {
        Self {
            modified: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            metadata,
        }
    }

    fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.modified)
    }
}

/// One filesystem-backed bin rooted at a directory.
pub struct DiskBin {
    dir: PathBuf,
    // serializes write/touch/remove against each other
    write_lock: Mutex<()>,
}

impl DiskBin {
    fn new(dir: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Stable on-disk name for a cache key.
    fn blob_path(&self, key: &str) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.dir
            .join(format!("{:016x}-{:04x}.bin", hasher.finish(), key.len() & 0xffff))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.blob_path(key).with_extension("meta.json")
    }

    fn read_sidecar(&self, key: &str) -> Result<Sidecar, CacheError> {
        let raw = fs::read_to_string(self.sidecar_path(key))?;
        serde_json::from_str(&raw).map_err(|e| CacheError::CorruptMetadata {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn write_sidecar(&self, key: &str, sidecar: &Sidecar) -> Result<(), CacheError> {
        let json = serde_json::to_string(sidecar).map_err(|e| CacheError::CorruptMetadata {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(self.sidecar_path(key), json)?;
        Ok(())
    }
}

impl CacheBin for DiskBin {
    fn read(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let blob_path = self.blob_path(key);
        if !blob_path.exists() {
            return Ok(None);
        }
        let data = fs::read(&blob_path)?;
        let sidecar = self.read_sidecar(key)?;
        Ok(Some(CacheRecord {
            data: Bytes::from(data),
            metadata: sidecar.metadata.clone(),
            last_modified: sidecar.timestamp(),
        }))
    }

    fn write(&self, key: &str, data: &[u8], metadata: &Config) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::write(self.blob_path(key), data)?;
        self.write_sidecar(key, &Sidecar::now(metadata.clone()))
    }

    fn touch(&self, key: &str) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        match self.read_sidecar(key) {
            Ok(sidecar) => self
                .write_sidecar(key, &Sidecar::now(sidecar.metadata))
                .is_ok(),
            Err(_) => false,
        }
    }

    fn remove(&self, key: &str) -> bool {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let existed = self.blob_path(key).exists();
        let _ = fs::remove_file(self.blob_path(key));
        let _ = fs::remove_file(self.sidecar_path(key));
        existed
    }

    fn record_status(&self, key: &str) -> RecordStatus {
        if !self.blob_path(key).exists() {
            return RecordStatus::NotFound;
        }
        match self.read_sidecar(key) {
            Ok(_) => RecordStatus::Ok,
            Err(_) => RecordStatus::IoError,
        }
    }
}

/// Disk cache hosting named bins as subdirectories of a root.
pub struct DiskCache {
    root: PathBuf,
    bins: Mutex<HashMap<String, Arc<DiskBin>>>,
}

impl DiskCache {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            bins: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bin_dir(&self, id: &str) -> PathBuf {
        // bin ids are caller-controlled; keep them filesystem-safe
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }
}

impl Cache for DiskCache {
    fn add_bin(&self, id: &str) -> Arc<dyn CacheBin> {
        let mut bins = self.bins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bin) = bins.get(id) {
            return bin.clone();
        }
        let bin = match DiskBin::new(self.bin_dir(id)) {
            Ok(bin) => Arc::new(bin),
            Err(e) => {
                warn!(bin = id, error = %e, "Failed to create disk cache bin directory");
                // fall back to a bin rooted at the cache root
                Arc::new(DiskBin {
                    dir: self.root.clone(),
                    write_lock: Mutex::new(()),
                })
            }
        };
        bins.insert(id.to_string(), bin.clone());
        bin
    }

    fn bin(&self, id: &str) -> Option<Arc<dyn CacheBin>> {
        let bins = self.bins.lock().unwrap_or_else(|e| e.into_inner());
        bins.get(id).map(|b| b.clone() as Arc<dyn CacheBin>)
    }

    fn default_bin(&self) -> Arc<dyn CacheBin> {
        self.add_bin(DEFAULT_BIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta() -> Config {
        let mut conf = Config::new("response-headers");
        conf.set("content-type", "image/png");
        conf.set("cache-control", "max-age=3600");
        conf
    }

    #[test]
    fn test_write_read_round_trip() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::new(tmp.path()).unwrap();
        let bin = cache.default_bin();

        bin.write("http://example.com/a.png", b"\x89PNG", &meta())
            .unwrap();
        let record = bin.read("http://example.com/a.png").unwrap().unwrap();
        assert_eq!(record.data.as_ref(), b"\x89PNG");
        assert_eq!(record.metadata.get("content-type"), Some("image/png"));
    }

    #[test]
    fn test_missing_key_is_none() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::new(tmp.path()).unwrap();
        let bin = cache.default_bin();
        assert!(bin.read("nope").unwrap().is_none());
        assert_eq!(bin.record_status("nope"), RecordStatus::NotFound);
    }

    #[test]
    fn test_touch_updates_timestamp_only() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::new(tmp.path()).unwrap();
        let bin = cache.default_bin();

        bin.write("key", b"payload", &meta()).unwrap();
        let before = bin.read("key").unwrap().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(bin.touch("key"));
        let after = bin.read("key").unwrap().unwrap();
        assert!(after.last_modified > before.last_modified);
        assert_eq!(after.data, before.data);
        assert_eq!(after.metadata, before.metadata);
    }

    #[test]
    fn test_corrupt_sidecar_reads_as_error() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::new(tmp.path()).unwrap();
        let bin = cache.default_bin();
        bin.write("key", b"payload", &meta()).unwrap();

        // clobber the sidecar
        let status_bin = cache.bin("__default").unwrap();
        drop(status_bin);
        for entry in fs::read_dir(tmp.path().join("__default")).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                fs::write(&path, "not json").unwrap();
            }
        }

        assert!(bin.read("key").is_err());
        assert_eq!(bin.record_status("key"), RecordStatus::IoError);
    }

    #[test]
    fn test_remove() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::new(tmp.path()).unwrap();
        let bin = cache.default_bin();
        bin.write("key", b"payload", &meta()).unwrap();
        assert!(bin.remove("key"));
        assert!(!bin.remove("key"));
        assert!(bin.read("key").unwrap().is_none());
    }
}
