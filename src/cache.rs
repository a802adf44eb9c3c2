//! In-memory translation cache.
//!
//! Two independent structures live behind one lock:
//! - an LRU map `(language, key) -> text`, bounded by `max_entries`
//! - a pending set marking pairs whose translation is in flight
//!
//! Pending entries are never evicted; the manager clears them explicitly.
//! The LRU content can be mirrored to a [`SnapshotStore`]. Snapshot I/O
//! happens only in [`TranslationCache::load_snapshot`] and
//! [`TranslationCache::persist_snapshot`], which the pipeline calls at start
//! and from a background task, so cache mutation never performs I/O.

use crate::error::{AppError, AppResult, CacheErrorCode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Snapshots older than this are discarded wholesale on load
    pub ttl: Duration,
    /// Snapshots larger than this are not written
    pub max_snapshot_bytes: usize,
    /// Estimated memory above which the cache reports itself over budget
    pub memory_limit_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(24 * 60 * 60),
            max_snapshot_bytes: 10 * 1024 * 1024,
            memory_limit_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    language: String,
    key: String,
}

impl CacheKey {
    fn new(key: &str, language: &str) -> Self {
        Self {
            language: language.to_string(),
            key: key.to_string(),
        }
    }
}

/// Serialized form of the LRU content, least recently used first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub language: String,
    pub key: String,
    pub value: String,
}

/// Persistence port for cache snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the last snapshot, `None` if there is none.
    async fn load(&self) -> AppResult<Option<CacheSnapshot>>;

    /// Replace the stored snapshot with the given serialized bytes.
    async fn save(&self, bytes: Vec<u8>) -> AppResult<()>;

    async fn clear(&self) -> AppResult<()>;
}

/// Snapshot port for headless runs and tests.
#[derive(Debug, Default)]
pub struct NoopSnapshotStore;

#[async_trait]
impl SnapshotStore for NoopSnapshotStore {
    async fn load(&self) -> AppResult<Option<CacheSnapshot>> {
        Ok(None)
    }

    async fn save(&self, _bytes: Vec<u8>) -> AppResult<()> {
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Snapshot port backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> AppResult<Option<CacheSnapshot>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::cache(
                    CacheErrorCode::CorruptionDetected,
                    format!("Failed to read snapshot {}: {}", self.path.display(), e),
                ))
            }
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            AppError::cache(
                CacheErrorCode::CorruptionDetected,
                format!("Snapshot {} is not valid: {}", self.path.display(), e),
            )
        })
    }

    async fn save(&self, bytes: Vec<u8>) -> AppResult<()> {
        let write_failed = |e: std::io::Error| {
            AppError::cache(
                CacheErrorCode::EvictionFailed,
                format!("Failed to write snapshot {}: {}", self.path.display(), e),
            )
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(write_failed)?;
            }
        }

        let tmp = self.path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
        fs::write(&tmp, &bytes).await.map_err(write_failed)?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_failed(e));
        }
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::cache(
                CacheErrorCode::EvictionFailed,
                format!("Failed to remove snapshot {}: {}", self.path.display(), e),
            )),
        }
    }
}

/// Counts reported by [`TranslationCache::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub translation_count: usize,
    pub pending_count: usize,
    /// Estimated bytes held by keys and values (2 bytes per character)
    pub memory_usage: usize,
    pub languages: Vec<String>,
}

struct CacheInner {
    entries: LruCache<CacheKey, String>,
    pending: HashSet<CacheKey>,
    /// Running estimate of `entries`, see [`entry_size`]
    memory: usize,
}

impl CacheInner {
    fn insert(&mut self, key: CacheKey, value: String) {
        self.memory += entry_size(&key, &value);
        if let Some((old_key, old_value)) = self.entries.push(key, value) {
            self.memory = self.memory.saturating_sub(entry_size(&old_key, &old_value));
        }
    }
}

pub struct TranslationCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
    snapshots: Arc<dyn SnapshotStore>,
    dirty: AtomicBool,
}

impl TranslationCache {
    pub fn new(config: CacheConfig, snapshots: Arc<dyn SnapshotStore>) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                pending: HashSet::new(),
                memory: 0,
            }),
            config,
            snapshots,
            dirty: AtomicBool::new(false),
        }
    }

    /// Cache with default settings and no snapshot persistence.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(NoopSnapshotStore))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ==================== Translations ====================

    /// Look up a translation, promoting it to most recently used.
    pub fn get(&self, key: &str, language: &str) -> Option<String> {
        self.inner
            .lock()
            .entries
            .get(&CacheKey::new(key, language))
            .cloned()
    }

    /// Check presence without touching recency.
    pub fn contains(&self, key: &str, language: &str) -> bool {
        self.inner
            .lock()
            .entries
            .contains(&CacheKey::new(key, language))
    }

    /// Insert or overwrite a translation, evicting the least recently used
    /// entry when full.
    pub fn set(&self, key: &str, language: &str, value: &str) -> AppResult<()> {
        validate_inputs(key, language)?;

        let cache_key = CacheKey::new(key, language);
        let mut inner = self.inner.lock();
        if !inner.entries.contains(&cache_key) && inner.entries.len() == inner.entries.cap().get() {
            if let Some((old, _)) = inner.entries.peek_lru() {
                debug!("Cache evicting {}:{}", old.language, old.key);
            }
        }
        inner.insert(cache_key, value.to_string());
        drop(inner);

        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Insert every entry of a language's flat map.
    pub fn set_many(&self, language: &str, entries: &HashMap<String, String>) -> AppResult<()> {
        if language.trim().is_empty() {
            return Err(AppError::cache(
                CacheErrorCode::InvalidKey,
                "Language cannot be empty",
            ));
        }

        let mut inner = self.inner.lock();
        for (key, value) in entries {
            if key.trim().is_empty() {
                continue;
            }
            inner.insert(CacheKey::new(key, language), value.clone());
        }
        drop(inner);

        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// All cached translations of a language (recency is not changed).
    pub fn get_all(&self, language: &str) -> HashMap<String, String> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|(k, _)| k.language == language)
            .map(|(k, v)| (k.key.clone(), v.clone()))
            .collect()
    }

    pub fn has_language(&self, language: &str) -> bool {
        self.inner
            .lock()
            .entries
            .iter()
            .any(|(k, _)| k.language == language)
    }

    /// Languages with at least one cached entry, sorted.
    pub fn languages(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let set: BTreeSet<&str> = inner.entries.iter().map(|(k, _)| k.language.as_str()).collect();
        set.into_iter().map(String::from).collect()
    }

    /// Drop every entry and pending mark of one language.
    pub fn remove_language(&self, language: &str) {
        let mut inner = self.inner.lock();
        let doomed: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.language == language)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            if let Some(value) = inner.entries.pop(k) {
                inner.memory = inner.memory.saturating_sub(entry_size(k, &value));
            }
        }
        inner.pending.retain(|k| k.language != language);
        drop(inner);

        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ==================== Pending Set ====================

    pub fn is_pending(&self, key: &str, language: &str) -> bool {
        self.inner
            .lock()
            .pending
            .contains(&CacheKey::new(key, language))
    }

    /// Mark a pair as in flight.
    ///
    /// # Returns
    /// `true` if the pair was not pending before.
    pub fn set_pending(&self, key: &str, language: &str) -> bool {
        self.inner
            .lock()
            .pending
            .insert(CacheKey::new(key, language))
    }

    /// Clear the in-flight mark.
    ///
    /// # Returns
    /// `true` if the pair was pending.
    pub fn remove_pending(&self, key: &str, language: &str) -> bool {
        self.inner
            .lock()
            .pending
            .remove(&CacheKey::new(key, language))
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Pending keys of one language.
    pub fn pending_keys(&self, language: &str) -> HashSet<String> {
        self.inner
            .lock()
            .pending
            .iter()
            .filter(|k| k.language == language)
            .map(|k| k.key.clone())
            .collect()
    }

    // ==================== Maintenance ====================

    /// Drop all translations and pending marks.
    ///
    /// The stored snapshot is replaced by the next
    /// [`persist_snapshot`](Self::persist_snapshot).
    pub fn clear(&self) {
        {
            let mut inner = self.inner.lock();
            inner.entries.clear();
            inner.pending.clear();
            inner.memory = 0;
        }
        self.dirty.store(true, Ordering::Relaxed);
        info!("Translation cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let languages: BTreeSet<&str> =
            inner.entries.iter().map(|(k, _)| k.language.as_str()).collect();
        CacheStats {
            translation_count: inner.entries.len(),
            pending_count: inner.pending.len(),
            memory_usage: inner.memory,
            languages: languages.into_iter().map(String::from).collect(),
        }
    }

    pub fn memory_usage(&self) -> usize {
        self.inner.lock().memory
    }

    pub fn is_over_memory_limit(&self) -> bool {
        self.memory_usage() > self.config.memory_limit_bytes
    }

    // ==================== Snapshots ====================

    /// Restore entries from the snapshot port.
    ///
    /// A snapshot older than the TTL is discarded as a whole. An unreadable
    /// snapshot is removed and reported as `CACHE_CORRUPTION_DETECTED`; the
    /// cache is left untouched.
    ///
    /// # Returns
    /// The number of entries restored.
    pub async fn load_snapshot(&self) -> AppResult<usize> {
        let snapshot = match self.snapshots.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(0),
            Err(e) => {
                warn!("Discarding unreadable cache snapshot: {}", e);
                if let Err(e) = self.snapshots.clear().await {
                    warn!("Failed to clear cache snapshot: {}", e);
                }
                return Err(e);
            }
        };

        let age = Utc::now()
            .signed_duration_since(snapshot.saved_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > self.config.ttl {
            info!(
                "Cache snapshot expired ({}s old, ttl {}s), discarding",
                age.as_secs(),
                self.config.ttl.as_secs()
            );
            if let Err(e) = self.snapshots.clear().await {
                warn!("Failed to clear cache snapshot: {}", e);
            }
            return Ok(0);
        }

        let mut inner = self.inner.lock();
        let mut restored = 0;
        for entry in snapshot.entries {
            if entry.key.is_empty() || entry.language.is_empty() {
                continue;
            }
            inner.insert(CacheKey::new(&entry.key, &entry.language), entry.value);
            restored += 1;
        }
        debug!("Restored {} cache entries from snapshot", restored);
        Ok(restored)
    }

    /// Write the LRU content to the snapshot port if it changed since the
    /// last write.
    ///
    /// # Returns
    /// `true` if a snapshot was written.
    pub async fn persist_snapshot(&self) -> AppResult<bool> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(false);
        }

        let snapshot = {
            let inner = self.inner.lock();
            CacheSnapshot {
                saved_at: Utc::now(),
                entries: inner
                    .entries
                    .iter()
                    .rev()
                    .map(|(k, v)| SnapshotEntry {
                        language: k.language.clone(),
                        key: k.key.clone(),
                        value: v.clone(),
                    })
                    .collect(),
            }
        };

        let bytes = serde_json::to_vec(&snapshot).map_err(|e| {
            AppError::cache(
                CacheErrorCode::CorruptionDetected,
                format!("Failed to serialize snapshot: {}", e),
            )
        })?;

        if bytes.len() > self.config.max_snapshot_bytes {
            warn!(
                "Cache snapshot too large ({} bytes, limit {}), skipping",
                bytes.len(),
                self.config.max_snapshot_bytes
            );
            return Ok(false);
        }

        if let Err(e) = self.snapshots.save(bytes).await {
            self.dirty.store(true, Ordering::Relaxed);
            return Err(e);
        }
        Ok(true)
    }
}

fn validate_inputs(key: &str, language: &str) -> AppResult<()> {
    if key.trim().is_empty() || language.trim().is_empty() {
        return Err(AppError::cache(
            CacheErrorCode::InvalidKey,
            format!("Invalid cache key: '{}' / '{}'", key, language),
        ));
    }
    Ok(())
}

/// 2 bytes per character of key, language and value.
fn entry_size(key: &CacheKey, value: &str) -> usize {
    (key.key.chars().count() + key.language.chars().count() + value.chars().count()) * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_cache(capacity: usize) -> TranslationCache {
        TranslationCache::in_memory(CacheConfig {
            max_entries: capacity,
            ..CacheConfig::default()
        })
    }

    // ==================== LRU Tests ====================

    #[test]
    fn test_get_and_set() {
        let cache = small_cache(10);
        assert_eq!(cache.get("welcome", "es"), None);

        cache.set("welcome", "es", "¡Bienvenido!").unwrap();
        assert_eq!(cache.get("welcome", "es").as_deref(), Some("¡Bienvenido!"));
        assert_eq!(cache.get("welcome", "fr"), None);
    }

    #[test]
    fn test_set_rejects_empty_key_or_language() {
        let cache = small_cache(10);
        assert_eq!(cache.set("", "es", "x").unwrap_err().code(), "CACHE_INVALID_KEY");
        assert_eq!(cache.set("k", " ", "x").unwrap_err().code(), "CACHE_INVALID_KEY");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_plus_one_evicts_least_recent() {
        let cache = small_cache(3);
        cache.set("a", "en", "A").unwrap();
        cache.set("b", "en", "B").unwrap();
        cache.set("c", "en", "C").unwrap();
        cache.set("d", "en", "D").unwrap();

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("a", "en"));
        assert!(cache.contains("b", "en"));
        assert!(cache.contains("d", "en"));
    }

    #[test]
    fn test_get_protects_from_next_eviction() {
        let cache = small_cache(3);
        cache.set("a", "en", "A").unwrap();
        cache.set("b", "en", "B").unwrap();
        cache.set("c", "en", "C").unwrap();

        assert!(cache.get("a", "en").is_some());
        cache.set("d", "en", "D").unwrap();

        assert!(cache.contains("a", "en"));
        assert!(!cache.contains("b", "en"));
    }

    #[test]
    fn test_set_same_value_twice_is_idempotent() {
        let cache = small_cache(5);
        cache.set("k", "es", "v").unwrap();
        cache.set("k", "es", "v").unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_all("es").get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn test_get_all_and_languages() {
        let cache = small_cache(10);
        cache.set("a", "es", "1").unwrap();
        cache.set("b", "es", "2").unwrap();
        cache.set("a", "fr", "3").unwrap();

        let es = cache.get_all("es");
        assert_eq!(es.len(), 2);
        assert_eq!(es["b"], "2");
        assert!(cache.has_language("fr"));
        assert!(!cache.has_language("de"));
        assert_eq!(cache.languages(), vec!["es".to_string(), "fr".to_string()]);
    }

    #[test]
    fn test_remove_language() {
        let cache = small_cache(10);
        cache.set("a", "es", "1").unwrap();
        cache.set("a", "fr", "2").unwrap();
        cache.set_pending("b", "es");

        cache.remove_language("es");
        assert!(!cache.has_language("es"));
        assert!(!cache.is_pending("b", "es"));
        assert!(cache.has_language("fr"));
    }

    // ==================== Pending Tests ====================

    #[test]
    fn test_pending_lifecycle() {
        let cache = small_cache(10);
        assert!(!cache.is_pending("k", "es"));
        assert!(cache.set_pending("k", "es"));
        assert!(!cache.set_pending("k", "es"));
        assert!(cache.is_pending("k", "es"));
        assert_eq!(cache.pending_count(), 1);

        assert!(cache.remove_pending("k", "es"));
        assert!(!cache.remove_pending("k", "es"));
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn test_pending_not_subject_to_eviction() {
        let cache = small_cache(1);
        cache.set_pending("x", "es");
        cache.set("a", "es", "1").unwrap();
        cache.set("b", "es", "2").unwrap();

        assert!(cache.is_pending("x", "es"));
        assert_eq!(cache.pending_keys("es").len(), 1);
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = small_cache(10);
        cache.set("a", "es", "1").unwrap();
        cache.set_pending("b", "es");
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_memory_estimate_follows_overwrite_and_eviction() {
        let cache = small_cache(2);
        cache.set("a", "es", "1234").unwrap();
        // (1 + 2 + 4) * 2
        assert_eq!(cache.memory_usage(), 14);

        cache.set("a", "es", "1").unwrap();
        assert_eq!(cache.memory_usage(), 8);

        cache.set("b", "es", "2").unwrap();
        cache.set("c", "es", "3").unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.memory_usage(), 16);

        cache.remove_language("es");
        assert_eq!(cache.memory_usage(), 0);
    }

    // ==================== Stats Tests ====================

    #[test]
    fn test_stats_memory_estimate() {
        let cache = small_cache(10);
        cache.set("ab", "es", "xyz").unwrap();
        cache.set_pending("p", "fr");

        let stats = cache.stats();
        assert_eq!(stats.translation_count, 1);
        assert_eq!(stats.pending_count, 1);
        // (2 + 2 + 3) chars * 2 bytes
        assert_eq!(stats.memory_usage, 14);
        assert_eq!(stats.languages, vec!["es".to_string()]);
    }

    #[test]
    fn test_memory_limit() {
        let cache = TranslationCache::in_memory(CacheConfig {
            memory_limit_bytes: 10,
            ..CacheConfig::default()
        });
        assert!(!cache.is_over_memory_limit());
        cache.set("key", "es", "a long enough value").unwrap();
        assert!(cache.is_over_memory_limit());
    }

    // ==================== Snapshot Tests ====================

    #[tokio::test]
    async fn test_snapshot_round_trip_preserves_recency() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileSnapshotStore::new(dir.path().join("cache.json")));
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };

        let cache = TranslationCache::new(config.clone(), store.clone());
        cache.set("a", "es", "1").unwrap();
        cache.set("b", "es", "2").unwrap();
        // "a" becomes most recent
        cache.get("a", "es");
        assert!(cache.persist_snapshot().await.unwrap());
        assert!(!cache.persist_snapshot().await.unwrap(), "clean cache writes nothing");

        let restored = TranslationCache::new(config, store);
        assert_eq!(restored.load_snapshot().await.unwrap(), 2);
        restored.set("c", "es", "3").unwrap();
        assert!(restored.contains("a", "es"));
        assert!(!restored.contains("b", "es"));
    }

    #[tokio::test]
    async fn test_expired_snapshot_discarded_wholesale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let snapshot = CacheSnapshot {
            saved_at: Utc::now() - chrono::Duration::hours(48),
            entries: vec![SnapshotEntry {
                language: "es".to_string(),
                key: "a".to_string(),
                value: "1".to_string(),
            }],
        };
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        let cache = TranslationCache::new(CacheConfig::default(), Arc::new(FileSnapshotStore::new(&path)));
        assert_eq!(cache.load_snapshot().await.unwrap(), 0);
        assert!(cache.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_reported_and_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let cache = TranslationCache::new(CacheConfig::default(), Arc::new(FileSnapshotStore::new(&path)));
        let err = cache.load_snapshot().await.unwrap_err();
        assert_eq!(err.code(), "CACHE_CORRUPTION_DETECTED");
        assert!(cache.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_clear_replaces_snapshot_on_next_persist() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileSnapshotStore::new(dir.path().join("cache.json")));
        let cache = TranslationCache::new(CacheConfig::default(), store.clone());
        cache.set("a", "es", "1").unwrap();
        assert!(cache.persist_snapshot().await.unwrap());

        cache.clear();
        assert!(cache.persist_snapshot().await.unwrap());

        let restored = TranslationCache::new(CacheConfig::default(), store);
        assert_eq!(restored.load_snapshot().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_snapshot_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let cache = TranslationCache::new(
            CacheConfig {
                max_snapshot_bytes: 16,
                ..CacheConfig::default()
            },
            Arc::new(FileSnapshotStore::new(&path)),
        );
        cache.set("key", "es", "value long enough to exceed").unwrap();

        assert!(!cache.persist_snapshot().await.unwrap());
        assert!(!path.exists());
    }
}
