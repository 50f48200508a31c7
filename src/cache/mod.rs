// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Result cache for expensive idempotent remote calls.
//!
//! Entries are content-addressed: the key is a SHA-256 over the operation kind,
//! the normalized input text and canonical JSON parameters, so the same logical
//! request always lands on the same entry.
//!
//! The cache never enforces a TTL itself. [`ResultCache::lookup`] returns the
//! entry's age and the caller decides whether it is fresh; stale entries stay
//! on disk until [`ResultCache::purge_older_than`] sweeps them.
//!
//! # Flow
//!
//! ```text
//! Producer wants an AI score for some text
//!       │
//!       ▼
//! ┌────────────────────────────────────┐
//! │  key = sha256(kind, text, params)  │
//! │  lookup(key) → (data, age)?        │
//! └────────────────────────────────────┘
//!       │
//!       ├─→ Hit, age < TTL(kind) → use cached data
//!       │
//!       └─→ Miss or stale → call remote, store(key, data, kind)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SyncQueueConfig;
use crate::storage::traits::{Collection, RecordStore, StorageError};

pub const CACHE_COLLECTION: Collection = Collection {
    name: "cache_entries",
    key_field: "key",
    indexes: &["type", "createdAt"],
};

/// Cache entry kind, used for grouping and for picking a TTL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CacheKind {
    AiScore,
    Translation,
    Custom(String),
}

impl CacheKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AiScore => "aiScore",
            Self::Translation => "translation",
            Self::Custom(s) => s,
        }
    }

    /// Suggested freshness window for this kind.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        const HOUR: u64 = 60 * 60;
        match self {
            Self::AiScore => Duration::from_secs(24 * HOUR),
            Self::Translation => Duration::from_secs(7 * 24 * HOUR),
            Self::Custom(_) => Duration::from_secs(24 * HOUR),
        }
    }
}

impl From<String> for CacheKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "aiScore" => Self::AiScore,
            "translation" => Self::Translation,
            _ => Self::Custom(s),
        }
    }
}

impl From<CacheKind> for String {
    fn from(kind: CacheKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    #[serde(rename = "type")]
    pub kind: CacheKind,
    /// Epoch millis
    pub created_at: i64,
}

/// A cache read, with the entry's age at lookup time.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub data: Value,
    pub kind: CacheKind,
    pub age: Duration,
}

impl CacheHit {
    /// Valid only while `age < ttl`.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age < ttl
    }
}

/// Deterministic key for a logical request.
///
/// Input text is trimmed and runs of whitespace collapse to a single space.
/// `params` are hashed in canonical form, so object key order does not matter.
#[must_use]
pub fn cache_key(kind: &CacheKind, content: &str, params: &Value) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compact JSON with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub struct ResultCache {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    purge_page_size: usize,
}

impl ResultCache {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            purge_page_size: 200,
        }
    }

    /// Cache over `store` with the purge page size from `config`.
    pub fn from_config(store: Arc<dyn RecordStore>, config: &SyncQueueConfig) -> Self {
        Self::new(store).with_purge_page_size(config.cache_purge_page_size)
    }

    #[must_use]
    pub fn purge_page_size(&self) -> usize {
        self.purge_page_size
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_purge_page_size(mut self, page_size: usize) -> Self {
        self.purge_page_size = page_size.max(1);
        self
    }

    /// Fetch an entry regardless of age. An undecodable entry reads as a miss.
    pub async fn lookup(&self, key: &str) -> Result<Option<CacheHit>, StorageError> {
        let Some(record) = self.store.get(&CACHE_COLLECTION, key).await? else {
            return Ok(None);
        };
        let entry: CacheEntry = match serde_json::from_value(record) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Skipping undecodable cache entry");
                return Ok(None);
            }
        };
        let age = self.clock.elapsed_since(entry.created_at);

        Ok(Some(CacheHit {
            data: entry.data,
            kind: entry.kind,
            age,
        }))
    }

    /// Fetch an entry only if it is younger than `ttl`.
    pub async fn lookup_fresh(&self, key: &str, ttl: Duration) -> Result<Option<Value>, StorageError> {
        match self.lookup(key).await? {
            Some(hit) if hit.is_fresh(ttl) => {
                crate::metrics::record_cache_lookup(hit.kind.as_str(), "hit");
                Ok(Some(hit.data))
            }
            Some(hit) => {
                debug!(key, age = ?hit.age, ?ttl, "Cache entry stale");
                crate::metrics::record_cache_lookup(hit.kind.as_str(), "stale");
                Ok(None)
            }
            None => {
                crate::metrics::record_cache_lookup("unknown", "miss");
                Ok(None)
            }
        }
    }

    /// Insert or overwrite; the entry's age restarts at zero.
    pub async fn store(&self, key: &str, data: Value, kind: CacheKind) -> Result<(), StorageError> {
        let entry = CacheEntry {
            key: key.to_string(),
            data,
            kind,
            created_at: self.clock.now_ms(),
        };
        self.store
            .put(&CACHE_COLLECTION, &serde_json::to_value(&entry)?)
            .await
    }

    pub async fn entries_of_kind(&self, kind: &CacheKind) -> Result<Vec<CacheEntry>, StorageError> {
        let records = self
            .store
            .get_by_index(&CACHE_COLLECTION, "type", &Value::String(kind.as_str().to_string()))
            .await?;

        records
            .into_iter()
            .map(|r| serde_json::from_value(r).map_err(StorageError::from))
            .collect()
    }

    /// Remove every entry of one kind.
    pub async fn clear_kind(&self, kind: &CacheKind) -> Result<u64, StorageError> {
        let entries = self.entries_of_kind(kind).await?;
        for entry in &entries {
            self.store.delete(&CACHE_COLLECTION, &entry.key).await?;
        }
        Ok(entries.len() as u64)
    }

    /// Delete every entry older than `max_age`, across all kinds.
    ///
    /// A single linear pass over the collection in key order, one page at a
    /// time. Entries written during the pass may or may not be visited.
    pub async fn purge_older_than(&self, max_age: Duration) -> Result<u64, StorageError> {
        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(max_age.as_millis() as i64);
        let mut cursor: Option<String> = None;
        let mut removed = 0u64;
        let mut scanned = 0usize;

        loop {
            let page = self
                .store
                .scan(&CACHE_COLLECTION, cursor.as_deref(), self.purge_page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            scanned += page.len();

            for record in &page {
                let key = CACHE_COLLECTION.key_of(record)?;
                let created_at = record.get("createdAt").and_then(Value::as_i64).unwrap_or(0);
                // An entry aged exactly max_age is already stale
                if created_at <= cutoff {
                    self.store.delete(&CACHE_COLLECTION, key).await?;
                    removed += 1;
                }
            }

            let last_key = page
                .last()
                .map(|r| CACHE_COLLECTION.key_of(r).map(str::to_string))
                .transpose()?;
            cursor = last_key;

            if page.len() < self.purge_page_size {
                break;
            }
        }

        info!(scanned, removed, max_age = ?max_age, "Cache purge complete");
        crate::metrics::record_cache_purge(removed);
        Ok(removed)
    }

    pub async fn len(&self) -> Result<u64, StorageError> {
        self.store.count(&CACHE_COLLECTION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn cache_with_clock() -> (ResultCache, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let cache = ResultCache::new(Arc::new(MemoryStore::new()))
            .with_clock(Arc::new(clock.clone()))
            .with_purge_page_size(2);
        (cache, clock)
    }

    #[test]
    fn test_cache_key_normalizes_content() {
        let kind = CacheKind::AiScore;
        let a = cache_key(&kind, "  Solar   powered\nbenches ", &json!({}));
        let b = cache_key(&kind, "Solar powered benches", &json!({}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_cache_key_param_order_irrelevant() {
        let kind = CacheKind::Translation;
        let a = cache_key(&kind, "hello", &json!({"from": "en", "to": "fi"}));
        let b = cache_key(&kind, "hello", &json!({"to": "fi", "from": "en"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_distinguishes_inputs() {
        let params = json!({"to": "fi"});
        let base = cache_key(&CacheKind::Translation, "hello", &params);
        assert_ne!(base, cache_key(&CacheKind::AiScore, "hello", &params));
        assert_ne!(base, cache_key(&CacheKind::Translation, "hello!", &params));
        assert_ne!(base, cache_key(&CacheKind::Translation, "hello", &json!({"to": "sv"})));
    }

    #[test]
    fn test_default_ttls() {
        assert_eq!(CacheKind::AiScore.default_ttl(), Duration::from_secs(86_400));
        assert_eq!(CacheKind::Translation.default_ttl(), Duration::from_secs(604_800));
        assert_eq!(CacheKind::from("summary".to_string()), CacheKind::Custom("summary".into()));
    }

    #[tokio::test]
    async fn test_store_then_lookup_has_zero_age() {
        let (cache, _clock) = cache_with_clock();
        cache.store("k1", json!({"score": 82}), CacheKind::AiScore).await.unwrap();

        let hit = cache.lookup("k1").await.unwrap().unwrap();
        assert_eq!(hit.data["score"], 82);
        assert_eq!(hit.kind, CacheKind::AiScore);
        assert_eq!(hit.age, Duration::ZERO);
        assert!(cache.lookup("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_entry_is_a_miss_but_not_deleted() {
        let (cache, clock) = cache_with_clock();
        let ttl = CacheKind::AiScore.default_ttl();
        cache.store("k1", json!(1), CacheKind::AiScore).await.unwrap();

        clock.advance(ttl - Duration::from_millis(1));
        assert_eq!(cache.lookup_fresh("k1", ttl).await.unwrap(), Some(json!(1)));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.lookup_fresh("k1", ttl).await.unwrap(), None);

        // Lazy expiry: still physically present
        let hit = cache.lookup("k1").await.unwrap().unwrap();
        assert_eq!(hit.age, ttl);
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_overwrite_restarts_age() {
        let (cache, clock) = cache_with_clock();
        cache.store("k", json!("old"), CacheKind::Translation).await.unwrap();
        clock.advance(Duration::from_secs(60));
        cache.store("k", json!("new"), CacheKind::Translation).await.unwrap();

        let hit = cache.lookup("k").await.unwrap().unwrap();
        assert_eq!(hit.data, json!("new"));
        assert_eq!(hit.age, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_purge_older_than_spans_pages_and_kinds() {
        let (cache, clock) = cache_with_clock();
        for i in 0..5 {
            cache.store(&format!("old-{i}"), json!(i), CacheKind::AiScore).await.unwrap();
        }
        cache.store("old-t", json!("x"), CacheKind::Translation).await.unwrap();

        clock.advance(Duration::from_secs(3_600));
        for i in 0..3 {
            cache.store(&format!("new-{i}"), json!(i), CacheKind::AiScore).await.unwrap();
        }

        let removed = cache.purge_older_than(Duration::from_secs(1_800)).await.unwrap();
        assert_eq!(removed, 6);
        assert_eq!(cache.len().await.unwrap(), 3);
        assert!(cache.lookup("new-0").await.unwrap().is_some());
        assert!(cache.lookup("old-t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_on_empty_cache() {
        let (cache, _clock) = cache_with_clock();
        assert_eq!(cache.purge_older_than(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entries_and_clear_by_kind() {
        let (cache, _clock) = cache_with_clock();
        cache.store("a", json!(1), CacheKind::AiScore).await.unwrap();
        cache.store("b", json!(2), CacheKind::Translation).await.unwrap();
        cache.store("c", json!(3), CacheKind::AiScore).await.unwrap();

        let scores = cache.entries_of_kind(&CacheKind::AiScore).await.unwrap();
        assert_eq!(scores.len(), 2);

        assert_eq!(cache.clear_kind(&CacheKind::AiScore).await.unwrap(), 2);
        assert_eq!(cache.len().await.unwrap(), 1);
        assert!(cache.lookup("b").await.unwrap().is_some());
    }

    #[test]
    fn test_canonical_params_sort_keys_at_every_depth() {
        let mut out = String::new();
        write_canonical(&json!({"b": {"y": 1, "x": [{"d": 2, "c": "é"}]}, "a": null}), &mut out);
        assert_eq!(out, r#"{"a":null,"b":{"x":[{"c":"é","d":2}],"y":1}}"#);

        let nested_a = json!({"opts": {"model": "m1", "lang": "fi"}, "n": 1});
        let nested_b = json!({"n": 1, "opts": {"lang": "fi", "model": "m1"}});
        assert_eq!(
            cache_key(&CacheKind::AiScore, "x", &nested_a),
            cache_key(&CacheKind::AiScore, "x", &nested_b)
        );
    }

    #[tokio::test]
    async fn test_undecodable_entry_reads_as_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(&CACHE_COLLECTION, &json!({"key": "broken", "createdAt": "yesterday"}))
            .await
            .unwrap();
        let cache = ResultCache::new(store);

        assert!(cache.lookup("broken").await.unwrap().is_none());
        assert_eq!(cache.lookup_fresh("broken", Duration::from_secs(60)).await.unwrap(), None);
    }

    /// Records the page size of every scan.
    struct ScanSpy {
        inner: MemoryStore,
        limits: parking_lot::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl RecordStore for ScanSpy {
        fn durability(&self) -> crate::storage::Durability {
            self.inner.durability()
        }
        async fn get(&self, c: &Collection, key: &str) -> Result<Option<Value>, StorageError> {
            self.inner.get(c, key).await
        }
        async fn get_all(&self, c: &Collection) -> Result<Vec<Value>, StorageError> {
            self.inner.get_all(c).await
        }
        async fn get_by_index(&self, c: &Collection, index: &str, value: &Value) -> Result<Vec<Value>, StorageError> {
            self.inner.get_by_index(c, index, value).await
        }
        async fn put(&self, c: &Collection, record: &Value) -> Result<(), StorageError> {
            self.inner.put(c, record).await
        }
        async fn delete(&self, c: &Collection, key: &str) -> Result<(), StorageError> {
            self.inner.delete(c, key).await
        }
        async fn clear(&self, c: &Collection) -> Result<u64, StorageError> {
            self.inner.clear(c).await
        }
        async fn scan(&self, c: &Collection, after: Option<&str>, limit: usize) -> Result<Vec<Value>, StorageError> {
            self.limits.lock().push(limit);
            self.inner.scan(c, after, limit).await
        }
        async fn count(&self, c: &Collection) -> Result<u64, StorageError> {
            self.inner.count(c).await
        }
    }

    #[tokio::test]
    async fn test_purge_pages_by_configured_size() {
        let spy = Arc::new(ScanSpy {
            inner: MemoryStore::new(),
            limits: parking_lot::Mutex::new(Vec::new()),
        });
        let config = SyncQueueConfig {
            cache_purge_page_size: 3,
            ..Default::default()
        };
        let clock = ManualClock::new(1_000_000);
        let cache = ResultCache::from_config(spy.clone(), &config).with_clock(Arc::new(clock.clone()));
        assert_eq!(cache.purge_page_size(), 3);

        for i in 0..7 {
            cache.store(&format!("k{i}"), json!(i), CacheKind::AiScore).await.unwrap();
        }
        clock.advance(Duration::from_secs(10));

        assert_eq!(cache.purge_older_than(Duration::from_secs(5)).await.unwrap(), 7);
        let limits = spy.limits.lock().clone();
        assert!(!limits.is_empty());
        assert!(limits.iter().all(|&l| l == 3), "{limits:?}");
        assert_eq!(cache.len().await.unwrap(), 0);
    }
}
