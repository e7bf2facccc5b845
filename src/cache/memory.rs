//! In-memory cache with LRU bins.

use super::{Cache, CacheBin, CacheError, CacheRecord, RecordStatus};
use crate::config::Config;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

/// Default bin id shared by all URL content.
const DEFAULT_BIN: &str = "__default";

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: Bytes,
    metadata: Config,
    last_modified: SystemTime,
    last_accessed: Instant,
}

/// One in-memory LRU bin.
pub struct MemoryBin {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    max_entries: usize,
}

impl MemoryBin {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts least-recently-accessed entries until under capacity.
    fn evict_lru(entries: &mut HashMap<String, MemoryEntry>, max_entries: usize) {
        while entries.len() >= max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl CacheBin for MemoryBin {
    fn read(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get_mut(key).map(|entry| {
            entry.last_accessed = Instant::now();
            CacheRecord {
                data: entry.data.clone(),
                metadata: entry.metadata.clone(),
                last_modified: entry.last_modified,
            }
        }))
    }

    fn write(&self, key: &str, data: &[u8], metadata: &Config) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if !entries.contains_key(key) {
            Self::evict_lru(&mut entries, self.max_entries);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                data: Bytes::copy_from_slice(data),
                metadata: metadata.clone(),
                last_modified: SystemTime::now(),
                last_accessed: Instant::now(),
            },
        );
        Ok(())
    }

    fn touch(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key) {
            Some(entry) => {
                entry.last_modified = SystemTime::now();
                entry.last_accessed = Instant::now();
                true
            }
            None => false,
        }
    }

    fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    fn record_status(&self, key: &str) -> RecordStatus {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(key) {
            RecordStatus::Ok
        } else {
            RecordStatus::NotFound
        }
    }
}

/// Memory cache hosting named LRU bins.
pub struct MemoryCache {
    bins: Mutex<HashMap<String, Arc<MemoryBin>>>,
    max_bin_entries: usize,
}

impl MemoryCache {
    /// Creates a memory cache whose bins hold at most `max_bin_entries`
    /// entries each.
    pub fn new(max_bin_entries: usize) -> Self {
        Self {
            bins: Mutex::new(HashMap::new()),
            max_bin_entries: max_bin_entries.max(1),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Cache for MemoryCache {
    fn add_bin(&self, id: &str) -> Arc<dyn CacheBin> {
        let mut bins = self.bins.lock().unwrap_or_else(|e| e.into_inner());
        bins.entry(id.to_string())
            .or_insert_with(|| Arc::new(MemoryBin::new(self.max_bin_entries)))
            .clone()
    }

    fn bin(&self, id: &str) -> Option<Arc<dyn CacheBin>> {
        let bins = self.bins.lock().unwrap_or_else(|e| e.into_inner());
        bins.get(id).map(|b| b.clone() as Arc<dyn CacheBin>)
    }

    fn default_bin(&self) -> Arc<dyn CacheBin> {
        self.add_bin(DEFAULT_BIN)
    }
}
