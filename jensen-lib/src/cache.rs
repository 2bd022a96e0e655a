//! Recordings cache and storage-delta invalidation.
//!
//! A cache entry is valid iff its `device_serial` matches the connected
//! device and both `file_count` and `used_bytes` match the device's current
//! values. Neither condition alone invalidates the other: `len(recordings)`
//! is never compared against `file_count` (the device's count may include
//! hidden or partial files), so `file_count` is trusted purely as the
//! invalidation signal, not as a length assertion on the cached list.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::recording::Recording;

pub const RECORDINGS_CACHE_KEY: &str = "recordings_cache";
pub const RECORDINGS_CACHE_META_KEY: &str = "recordings_cache_meta";

/// External persistence the cache is built on top of. The core only needs
/// simple string get/set/delete; the caller owns the actual storage medium.
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String);
    async fn delete(&self, key: &str);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMeta {
    device_serial: String,
    file_count: u32,
    used_bytes: u64,
    timestamp: i64,
}

/// In-memory cache entry, mirrored to the key-value store on every update.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub recordings: Vec<Recording>,
    pub file_count: u32,
    pub used_bytes: u64,
    pub device_serial: String,
    pub timestamp: i64,
}

impl CacheEntry {
    /// True iff this entry may be returned as-is for `serial` given the
    /// device's current `(file_count, used_bytes)` storage-delta witness.
    pub fn is_valid_for(&self, serial: &str, file_count: u32, used_bytes: u64) -> bool {
        self.device_serial == serial && self.file_count == file_count && self.used_bytes == used_bytes
    }
}

/// Owns the in-memory mirror and drives persistence. Mutated only on the
/// calling task; the same dispatcher-level exclusion primitive that
/// serializes device commands prevents concurrent mutation here too, since
/// `list_recordings` is always called through that same path.
pub struct RecordingsCache<S: KeyValueStore> {
    store: S,
    entry: Mutex<Option<CacheEntry>>,
}

impl<S: KeyValueStore> RecordingsCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            entry: Mutex::new(None),
        }
    }

    /// Returns the in-memory entry if present; if absent and
    /// `allow_persisted_load` is set, attempts to load and adopt the
    /// persisted entry, treating any parse failure as a full miss (and
    /// deleting both persisted keys, per the persisted-state contract).
    pub async fn load(&self, allow_persisted_load: bool) -> Option<CacheEntry> {
        {
            let guard = self.entry.lock().await;
            if let Some(entry) = guard.as_ref() {
                return Some(entry.clone());
            }
        }

        if !allow_persisted_load {
            return None;
        }

        match self.load_persisted().await {
            Ok(Some(entry)) => {
                *self.entry.lock().await = Some(entry.clone());
                Some(entry)
            }
            Ok(None) => None,
            Err(()) => {
                warn!("recordings cache: failed to parse persisted entry, clearing both keys");
                self.store.delete(RECORDINGS_CACHE_KEY).await;
                self.store.delete(RECORDINGS_CACHE_META_KEY).await;
                None
            }
        }
    }

    async fn load_persisted(&self) -> Result<Option<CacheEntry>, ()> {
        let recordings_json = self.store.get(RECORDINGS_CACHE_KEY).await;
        let meta_json = self.store.get(RECORDINGS_CACHE_META_KEY).await;

        let (Some(recordings_json), Some(meta_json)) = (recordings_json, meta_json) else {
            return Ok(None);
        };

        let recordings: Vec<Recording> = serde_json::from_str(&recordings_json).map_err(|_| ())?;
        let meta: CacheMeta = serde_json::from_str(&meta_json).map_err(|_| ())?;

        Ok(Some(CacheEntry {
            recordings,
            file_count: meta.file_count,
            used_bytes: meta.used_bytes,
            device_serial: meta.device_serial,
            timestamp: meta.timestamp,
        }))
    }

    /// Replaces the cached counters without touching the recordings list,
    /// so the *next* validity comparison runs against fresh data even
    /// though this call still falls through to a real fetch.
    pub async fn bump_counters(&self, file_count: u32, used_bytes: u64) {
        let mut guard = self.entry.lock().await;
        if let Some(entry) = guard.as_mut() {
            entry.file_count = file_count;
            entry.used_bytes = used_bytes;
        }
    }

    /// Atomically replaces the cache with a freshly fetched listing and
    /// persists it synchronously.
    pub async fn replace(&self, entry: CacheEntry) {
        let meta = CacheMeta {
            device_serial: entry.device_serial.clone(),
            file_count: entry.file_count,
            used_bytes: entry.used_bytes,
            timestamp: entry.timestamp,
        };

        if let (Ok(recordings_json), Ok(meta_json)) =
            (serde_json::to_string(&entry.recordings), serde_json::to_string(&meta))
        {
            self.store.set(RECORDINGS_CACHE_KEY, recordings_json).await;
            self.store.set(RECORDINGS_CACHE_META_KEY, meta_json).await;
        }

        *self.entry.lock().await = Some(entry);
    }

    /// Invalidates the in-memory mirror without deleting the persisted
    /// copy, so a fast reconnect can still seed from disk.
    pub async fn invalidate_in_memory(&self) {
        *self.entry.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemoryStore(StdMutex<HashMap<String, String>>);

    impl KeyValueStore for MemoryStore {
        async fn get(&self, key: &str) -> Option<String> {
            self.0.lock().unwrap().get(key).cloned()
        }
        async fn set(&self, key: &str, value: String) {
            self.0.lock().unwrap().insert(key.to_string(), value);
        }
        async fn delete(&self, key: &str) {
            self.0.lock().unwrap().remove(key);
        }
    }

    fn sample_entry(serial: &str, file_count: u32, used_bytes: u64) -> CacheEntry {
        CacheEntry {
            recordings: vec![Recording::new("20250101120000a.hda".to_string(), 1000, 1)],
            file_count,
            used_bytes,
            device_serial: serial.to_string(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn hit_when_serial_count_and_bytes_match() {
        let entry = sample_entry("ABC123", 2, 4096);
        assert!(entry.is_valid_for("ABC123", 2, 4096));
    }

    #[tokio::test]
    async fn miss_when_file_count_differs() {
        let entry = sample_entry("ABC123", 2, 4096);
        assert!(!entry.is_valid_for("ABC123", 3, 4096));
    }

    #[tokio::test]
    async fn miss_when_used_bytes_differs() {
        let entry = sample_entry("ABC123", 2, 4096);
        assert!(!entry.is_valid_for("ABC123", 2, 5000));
    }

    #[tokio::test]
    async fn miss_when_serial_changes() {
        let entry = sample_entry("ABC123", 2, 4096);
        assert!(!entry.is_valid_for("OTHER", 2, 4096));
    }

    #[tokio::test]
    async fn replace_persists_and_load_recovers_after_in_memory_clear() {
        let cache = RecordingsCache::new(MemoryStore::default());
        cache.replace(sample_entry("ABC123", 1, 100)).await;
        cache.invalidate_in_memory().await;

        let loaded = cache.load(true).await.expect("persisted entry should load");
        assert_eq!(loaded.device_serial, "ABC123");
        assert_eq!(loaded.file_count, 1);
    }

    #[tokio::test]
    async fn corrupt_persisted_meta_clears_both_keys() {
        let store = MemoryStore::default();
        store.set(RECORDINGS_CACHE_KEY, "[]".to_string()).await;
        store.set(RECORDINGS_CACHE_META_KEY, "not json".to_string()).await;
        let cache = RecordingsCache::new(store);

        let loaded = cache.load(true).await;
        assert!(loaded.is_none());
        assert!(cache.store.get(RECORDINGS_CACHE_KEY).await.is_none());
        assert!(cache.store.get(RECORDINGS_CACHE_META_KEY).await.is_none());
    }

    #[tokio::test]
    async fn load_without_persisted_fallback_returns_none_when_empty() {
        let cache = RecordingsCache::new(MemoryStore::default());
        assert!(cache.load(false).await.is_none());
    }

    #[tokio::test]
    async fn bump_counters_only_affects_in_memory_entry_with_one_present() {
        let cache = RecordingsCache::new(MemoryStore::default());
        cache.replace(sample_entry("ABC123", 2, 4096)).await;
        cache.bump_counters(3, 5000).await;

        let loaded = cache.load(false).await.unwrap();
        assert_eq!(loaded.file_count, 3);
        assert_eq!(loaded.used_bytes, 5000);
        assert_eq!(loaded.recordings.len(), 1);
    }
}
