use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// In-process TTL cache with per-entry deadlines.
///
/// Stale entries are evicted on access; `invalidate`/`clear` evict eagerly.
/// Explicitly constructed and injected wherever it is shared, never a hidden
/// singleton.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // The entry was stale under the read lock; re-check under the write
        // lock before dropping it, another writer may have refreshed it.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
            entries.remove(key);
        }
        None
    }

    pub async fn insert(&self, key: K, value: V) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hit_within_ttl() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 7).await;
        assert_eq!(cache.get(&"k").await, Some(7));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::ZERO);
        cache.insert("k", 7).await;
        assert_eq!(cache.get(&"k").await, None);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("k", 7).await;
        cache.invalidate(&"k").await;
        assert_eq!(cache.get(&"k").await, None);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1).await;
        cache.insert("b", 2).await;
        cache.clear().await;
        assert_eq!(cache.get(&"a").await, None);
        assert_eq!(cache.get(&"b").await, None);
    }
}
