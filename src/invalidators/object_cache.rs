//! Local object cache and its invalidator.
//!
//! The object cache is an in-process LRU shared with host code. It is always
//! available and runs first in every cascade.

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::cascade::{Invalidator, InvalidatorError, rw_read, rw_write};

const SOURCE: &str = "invalidators::object_cache";
const DEFAULT_CAPACITY: usize = 1024;

pub const OBJECT_CACHE_SLUG: &str = "object_cache";

const METRIC_HIT: &str = "object_cache_hit_total";
const METRIC_MISS: &str = "object_cache_miss_total";
const METRIC_FLUSH: &str = "object_cache_flush_total";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObjectCacheConfig {
    /// Maximum entries kept before LRU eviction.
    pub capacity: usize,
}

impl Default for ObjectCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ObjectCacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

/// In-process key/value cache with LRU eviction.
pub struct ObjectCache {
    entries: RwLock<LruCache<String, Value>>,
}

impl ObjectCache {
    pub fn new(config: &ObjectCacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity_non_zero())),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        // `LruCache::get` updates recency, so it needs the write lock.
        let value = rw_write(&self.entries, SOURCE, "get").get(key).cloned();
        if value.is_some() {
            counter!(METRIC_HIT).increment(1);
        } else {
            counter!(METRIC_MISS).increment(1);
        }
        value
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        rw_write(&self.entries, SOURCE, "set").put(key.into(), value);
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        rw_write(&self.entries, SOURCE, "delete").pop(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains(key)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Returns how many were evicted.
    pub fn flush(&self) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "flush");
        let evicted = entries.len();
        entries.clear();
        counter!(METRIC_FLUSH).increment(1);
        debug!(evicted, "Object cache flushed");
        evicted
    }
}

/// Flushes the local [`ObjectCache`]. Priority 0, 10s delay.
pub struct ObjectCacheInvalidator {
    cache: Arc<ObjectCache>,
}

impl ObjectCacheInvalidator {
    pub fn new(cache: Arc<ObjectCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Invalidator for ObjectCacheInvalidator {
    fn slug(&self) -> &str {
        OBJECT_CACHE_SLUG
    }

    fn is_available(&self) -> bool {
        true
    }

    fn priority(&self) -> i32 {
        0
    }

    fn delay(&self) -> i64 {
        10
    }

    async fn flush(&self) -> Result<(), InvalidatorError> {
        self.cache.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lru_evicts_oldest_entry() {
        let cache = ObjectCache::new(&ObjectCacheConfig { capacity: 2 });
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        cache.get("a");
        cache.set("c", json!(3));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let config = ObjectCacheConfig { capacity: 0 };
        assert_eq!(config.capacity_non_zero().get(), 1);
    }

    #[tokio::test]
    async fn invalidator_flushes_every_entry() {
        let cache = Arc::new(ObjectCache::new(&ObjectCacheConfig::default()));
        cache.set("post:1", json!({ "title": "Hello" }));
        cache.set("menu", json!(["home"]));

        let invalidator = ObjectCacheInvalidator::new(cache.clone());
        invalidator.flush().await.expect("object cache flush");

        assert!(cache.is_empty());
        assert!(cache.get("post:1").is_none());
    }

    #[test]
    fn metadata_matches_cascade_position() {
        let invalidator =
            ObjectCacheInvalidator::new(Arc::new(ObjectCache::new(&ObjectCacheConfig::default())));
        assert_eq!(invalidator.slug(), "object_cache");
        assert!(invalidator.is_available());
        assert_eq!(invalidator.priority(), 0);
        assert_eq!(invalidator.delay(), 10);
    }
}
