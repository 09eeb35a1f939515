//! Time-based read cache
//!
//! Templates and components change rarely compared to how often they are
//! expanded, so the service layer keeps resolved reads behind a TTL cache.
//! Correctness never depends on it: the expansion contract is the same
//! whether inputs come from cache or fresh store reads.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A cache entry with its insertion time
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Simple TTL cache keyed by `K`
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache with the given time-to-live
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get a value if present and not expired
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().expect("cache lock poisoned");
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Insert a value, resetting its TTL
    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove one key (event-driven invalidation on CRUD writes)
    pub fn invalidate(&self, key: &K) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.remove(key);
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.clear();
    }

    /// Number of entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".into(), 1);

        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_expired_entries_are_invisible() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::ZERO);
        cache.insert("a".into(), 1);

        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get(&"a".to_string()), None);
        // Entry still occupies a slot until overwritten
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);

        cache.invalidate(&"a".to_string());
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(2));

        cache.clear();
        assert!(cache.is_empty());
    }
}
