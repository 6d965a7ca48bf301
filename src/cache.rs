//! Keyed caches for optimal chunk sizes and translation results.
//!
//! Keys are UTF-8 strings, values opaque bytes; typed views live at the
//! call sites. The in-memory store is always present and never
//! authoritative: a miss is a correctness-safe fallback, so every error
//! path here degrades to a miss. The sled-backed result store persists
//! across restarts behind the `persist-cache` feature.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Hash prefix length for optimal-size keys: enough to fingerprint the
/// opening of a document without keying on its entire body
const SIZE_KEY_PREFIX_CHARS: usize = 200;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cached optimal chunk size for a content shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeEntry {
    pub optimal_chunk_size: usize,
    pub quality_at_size: f64,
    pub stored_at: i64,
    #[serde(default)]
    pub hits: u64,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    last_used: AtomicU64,
    uses: AtomicU64,
}

/// In-memory TTL + LRU byte store.
///
/// Reads take the shared lock only; recency is tracked through an atomic
/// tick so a get never blocks other readers. Writes are per-key atomic
/// under the exclusive lock.
pub struct MemoryCache {
    map: RwLock<HashMap<String, Entry>>,
    max_entries: usize,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a live value; expired entries are removed and count as misses
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        {
            let map = self.map.read().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = map.get(key) {
                if Instant::now() < entry.expires_at {
                    let now = self.tick.fetch_add(1, Ordering::Relaxed);
                    entry.last_used.store(now, Ordering::Relaxed);
                    entry.uses.fetch_add(1, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        // Entry exists but expired: promote to a write lock and drop it
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = map.get(key) {
            if Instant::now() < entry.expires_at {
                let now = self.tick.fetch_add(1, Ordering::Relaxed);
                entry.last_used.store(now, Ordering::Relaxed);
                entry.uses.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            map.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Times a live entry has been read
    pub fn use_count(&self, key: &str) -> u64 {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        map.get(key)
            .map(|e| e.uses.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let now = self.tick.fetch_add(1, Ordering::Relaxed);
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
                last_used: AtomicU64::new(now),
                uses: AtomicU64::new(0),
            },
        );
        if map.len() > self.max_entries {
            Self::evict(&mut map, self.max_entries);
        }
    }

    pub fn invalidate(&self, key: &str) {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
    }

    pub fn clear(&self) {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.map.read().unwrap_or_else(|e| e.into_inner()).len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size,
        }
    }

    /// Drop expired entries first, then least-recently-used down to the cap
    fn evict(map: &mut HashMap<String, Entry>, max_entries: usize) {
        let now = Instant::now();
        map.retain(|_, e| now < e.expires_at);
        if map.len() <= max_entries {
            return;
        }

        let mut by_recency: Vec<(String, u64)> = map
            .iter()
            .map(|(k, e)| (k.clone(), e.last_used.load(Ordering::Relaxed)))
            .collect();
        by_recency.sort_by_key(|(_, used)| *used);
        let excess = map.len() - max_entries;
        for (key, _) in by_recency.into_iter().take(excess) {
            map.remove(&key);
        }
    }
}

/// Key for the optimal-size cache: shape class, language pair, and a
/// fingerprint of the document opening
pub fn size_key(content_class: &str, source: &str, target: &str, text: &str) -> String {
    let prefix: String = text.chars().take(SIZE_KEY_PREFIX_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    format!(
        "{content_class}:{source}:{target}:{}",
        hex::encode(hasher.finalize())
    )
}

/// Key for the full-result cache; the caller identity token, when
/// present, partitions entries between callers
pub fn result_key(
    backend_id: &str,
    source: &str,
    target: &str,
    text: &str,
    api_token: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(backend_id.as_bytes());
    hasher.update(b":");
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(target.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    if let Some(token) = api_token {
        hasher.update(b":");
        hasher.update(token.as_bytes());
    }
    hex::encode(hasher.finalize())
}

// ============================================================================
// Persistent result store (sled), behind the persist-cache feature
// ============================================================================

#[cfg(feature = "persist-cache")]
pub use persist::PersistentCache;

#[cfg(feature = "persist-cache")]
mod persist {
    use super::*;
    use crate::error::{Result, TranslateError};
    use std::path::{Path, PathBuf};

    #[derive(Serialize, Deserialize)]
    struct PersistedEntry {
        value: Vec<u8>,
        stored_at: i64,
        ttl_s: u64,
    }

    /// On-disk byte store with per-entry TTL stamps
    pub struct PersistentCache {
        db: sled::Db,
    }

    impl PersistentCache {
        pub fn open_default() -> Result<Self> {
            Self::open_at_path(&default_path())
        }

        pub fn open_at_path(path: &Path) -> Result<Self> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TranslateError::Cache(format!("failed to create cache dir: {e}"))
                })?;
            }
            let db = sled::open(path).map_err(|e| {
                let msg = e.to_string().to_lowercase();
                if msg.contains("lock") || msg.contains("busy") {
                    TranslateError::Cache("cache locked by another process".into())
                } else {
                    TranslateError::Cache(format!("failed to open cache: {e}"))
                }
            })?;
            Ok(Self { db })
        }

        pub fn get(&self, key: &str) -> Option<Vec<u8>> {
            let bytes = self.db.get(key).ok().flatten()?;
            let entry: PersistedEntry = serde_json::from_slice(&bytes).ok()?;
            let age = chrono::Utc::now().timestamp() - entry.stored_at;
            if age < 0 || age as u64 > entry.ttl_s {
                let _ = self.db.remove(key);
                return None;
            }
            Some(entry.value)
        }

        pub fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) {
            let entry = PersistedEntry {
                value,
                stored_at: chrono::Utc::now().timestamp(),
                ttl_s: ttl.as_secs(),
            };
            if let Ok(bytes) = serde_json::to_vec(&entry) {
                let _ = self.db.insert(key, bytes);
            }
        }

        pub fn invalidate(&self, key: &str) {
            let _ = self.db.remove(key);
        }

        pub fn clear(&self) -> Result<()> {
            self.db
                .clear()
                .map_err(|e| TranslateError::Cache(format!("failed to clear cache: {e}")))?;
            let _ = self.db.flush();
            Ok(())
        }

        pub fn len(&self) -> usize {
            self.db.len()
        }

        pub fn is_empty(&self) -> bool {
            self.db.is_empty()
        }
    }

    fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("adaptive-translator")
            .join("results.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_put_round_trips() {
        let cache = MemoryCache::new(16);
        cache.put("k", b"value".to_vec(), Duration::from_secs(60));
        assert_eq!(cache.get("k").unwrap(), b"value");
        assert_eq!(cache.get("absent"), None);
    }

    #[test]
    fn expired_entries_never_returned() {
        let cache = MemoryCache::new(16);
        cache.put("k", b"v".to_vec(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
        // And the slot is gone
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn last_writer_wins() {
        let cache = MemoryCache::new(16);
        cache.put("k", b"one".to_vec(), Duration::from_secs(60));
        cache.put("k", b"two".to_vec(), Duration::from_secs(60));
        assert_eq!(cache.get("k").unwrap(), b"two");
        assert_eq!(cache.stats().size, 1);
    }

    #[test]
    fn concurrent_puts_leave_one_value() {
        use std::sync::Arc;
        let cache = Arc::new(MemoryCache::new(64));
        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    cache.put("shared", vec![i as u8; 32], Duration::from_secs(60));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let value = cache.get("shared").unwrap();
        assert_eq!(value.len(), 32);
        // No partial reads: every byte comes from the same writer
        assert!(value.iter().all(|&b| b == value[0]));
    }

    #[test]
    fn lru_eviction_keeps_recent_entries() {
        let cache = MemoryCache::new(3);
        cache.put("a", b"1".to_vec(), Duration::from_secs(60));
        cache.put("b", b"2".to_vec(), Duration::from_secs(60));
        cache.put("c", b"3".to_vec(), Duration::from_secs(60));
        // Touch a and c so b is the least recently used
        cache.get("a");
        cache.get("c");
        cache.put("d", b"4".to_vec(), Duration::from_secs(60));

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = MemoryCache::new(16);
        cache.put("k", b"v".to_vec(), Duration::from_secs(60));
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = MemoryCache::new(16);
        cache.put("k", b"v".to_vec(), Duration::from_secs(60));
        cache.get("k");
        cache.get("k");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn size_key_depends_on_class_langs_and_prefix() {
        let k1 = size_key("prose", "en", "ru", "Some long document text");
        let k2 = size_key("prose", "en", "ru", "Some long document text");
        let k3 = size_key("dialog", "en", "ru", "Some long document text");
        let k4 = size_key("prose", "en", "de", "Some long document text");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert_ne!(k1, k4);

        // Only the first 200 chars participate
        let base = "x".repeat(200);
        let a = size_key("prose", "en", "ru", &format!("{base}AAAA"));
        let b = size_key("prose", "en", "ru", &format!("{base}BBBB"));
        assert_eq!(a, b);
    }

    #[test]
    fn result_key_partitions_by_token() {
        let with = result_key("specialized", "en", "ru", "text", Some("caller-1"));
        let without = result_key("specialized", "en", "ru", "text", None);
        let other = result_key("specialized", "en", "ru", "text", Some("caller-2"));
        assert_ne!(with, without);
        assert_ne!(with, other);
        assert_eq!(with.len(), 64);
    }

    #[test]
    fn size_entry_serde_round_trip() {
        let entry = SizeEntry {
            optimal_chunk_size: 350,
            quality_at_size: 0.87,
            stored_at: 1_700_000_000,
            hits: 3,
        };
        let bytes = serde_json::to_vec(&entry).unwrap();
        let back: SizeEntry = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.optimal_chunk_size, 350);
        assert_eq!(back.hits, 3);
    }

    #[cfg(feature = "persist-cache")]
    #[test]
    fn persistent_cache_ttl() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = PersistentCache::open_at_path(&dir.path().join("t.db")).unwrap();

        cache.put("live", b"v".to_vec(), Duration::from_secs(3600));
        assert_eq!(cache.get("live").unwrap(), b"v");

        cache.put("dead", b"v".to_vec(), Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get("dead").is_none());
    }

    #[cfg(feature = "persist-cache")]
    #[test]
    fn persistent_cache_clear() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = PersistentCache::open_at_path(&dir.path().join("t.db")).unwrap();
        cache.put("a", b"1".to_vec(), Duration::from_secs(60));
        cache.put("b", b"2".to_vec(), Duration::from_secs(60));
        assert_eq!(cache.len(), 2);
        cache.clear().unwrap();
        assert!(cache.is_empty());
    }
}
