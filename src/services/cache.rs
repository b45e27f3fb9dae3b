//! Generic associative cache with per-entry TTL expiry.
//!
//! Expiry is lazy: expired entries are treated as absent and evicted on
//! access. There is no size-based eviction — entries churn out naturally
//! as locations and traffic observations go stale.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe TTL cache. `Clone` shares the underlying map, so handles
/// can be handed to multiple tasks without external locking.
pub struct TtlCache<K, V> {
    entries: Arc<Mutex<HashMap<K, CacheEntry<V>>>>,
    default_ttl: Duration,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            default_ttl: self.default_ttl,
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            default_ttl,
        }
    }

    /// Get a value; expired-but-present entries count as absent and are
    /// evicted on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert with the cache's default TTL, overwriting any existing entry
    /// and resetting its expiry.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().unwrap().insert(key, entry);
    }

    pub fn delete(&self, key: &K) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Keys of all live entries. Expired entries are swept out first.
    pub fn keys(&self) -> Vec<K> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.keys().cloned().collect()
    }

    /// Snapshot of all live entries. Used by the batch flush, which wants
    /// the full current contents rather than a per-update queue.
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));
        cache.set("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_overwrite_resets_value() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));
        cache.set("a".to_string(), 1);
        cache.set("a".to_string(), 2);
        assert_eq!(cache.get(&"a".to_string()), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));
        cache.set_with_ttl("a".to_string(), 1, Duration::ZERO);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(!cache.has(&"a".to_string()));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_keys_and_entries_skip_expired() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));
        cache.set("live".to_string(), 1);
        cache.set_with_ttl("dead".to_string(), 2, Duration::ZERO);

        assert_eq!(cache.keys(), vec!["live".to_string()]);
        assert_eq!(cache.entries(), vec![("live".to_string(), 1)]);
    }

    #[test]
    fn test_delete() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));
        cache.set("a".to_string(), 1);
        assert!(cache.delete(&"a".to_string()));
        assert!(!cache.delete(&"a".to_string()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clone_shares_entries() {
        let cache: TtlCache<String, i32> = TtlCache::new(Duration::from_secs(60));
        let handle = cache.clone();
        handle.set("a".to_string(), 7);
        assert_eq!(cache.get(&"a".to_string()), Some(7));
    }

    #[test]
    fn test_concurrent_access() {
        let cache: TtlCache<i32, i32> = TtlCache::new(Duration::from_secs(60));
        let mut handles = Vec::new();
        for t in 0..4 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    cache.set(t * 100 + i, i);
                    let _ = cache.get(&(t * 100 + i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 400);
    }
}
