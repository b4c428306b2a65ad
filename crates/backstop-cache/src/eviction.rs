//! Cache eviction strategies.
//!
//! Each strategy keeps its own bookkeeping for victim choice; the entry
//! metadata (`access_count`, `created_at`) breaks ties and drives the
//! LFU/FIFO decisions. Victim selection is a synchronous computation so
//! it can run inside the cache's critical section.

use std::collections::VecDeque;
use std::hash::Hash;
use std::num::NonZeroUsize;

use hashbrown::HashMap;

use crate::entry::CacheEntry;

/// Eviction strategy for the cache.
///
/// Determines which entry to evict when the cache reaches capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionStrategy {
    /// Least Recently Used: evicts the entry accessed longest ago.
    #[default]
    Lru,
    /// Least Frequently Used: evicts the entry with the lowest access
    /// count; ties go to the oldest entry.
    Lfu,
    /// First In, First Out: evicts the oldest entry regardless of access.
    Fifo,
}

/// Storage with a pluggable victim choice.
///
/// `get` records a policy-relevant access (recency for LRU); `peek` never
/// does. `insert` evicts and returns at most one victim when at capacity.
pub(crate) trait EvictionStore<K, V>: Send {
    fn get(&mut self, key: &K) -> Option<&mut CacheEntry<V>>;
    fn peek(&self, key: &K) -> Option<&CacheEntry<V>>;
    fn insert(&mut self, key: K, entry: CacheEntry<V>) -> Option<(K, CacheEntry<V>)>;
    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>>;
    fn len(&self) -> usize;
    fn clear(&mut self);
    fn keys(&self) -> Vec<K>;
}

pub(crate) fn new_store<K, V>(
    strategy: EvictionStrategy,
    capacity: usize,
) -> Box<dyn EvictionStore<K, V>>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    match strategy {
        EvictionStrategy::Lru => Box::new(LruStore::new(capacity)),
        EvictionStrategy::Lfu => Box::new(LfuStore::new(capacity)),
        EvictionStrategy::Fifo => Box::new(FifoStore::new(capacity)),
    }
}

/// LRU storage backed by `lru::LruCache`.
pub(crate) struct LruStore<K: Hash + Eq, V> {
    cache: lru::LruCache<K, CacheEntry<V>>,
}

impl<K: Hash + Eq, V> LruStore<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: lru::LruCache::new(cap),
        }
    }
}

impl<K: Hash + Eq + Clone + Send, V: Send> EvictionStore<K, V> for LruStore<K, V> {
    fn get(&mut self, key: &K) -> Option<&mut CacheEntry<V>> {
        self.cache.get_mut(key)
    }

    fn peek(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.cache.peek(key)
    }

    fn insert(&mut self, key: K, entry: CacheEntry<V>) -> Option<(K, CacheEntry<V>)> {
        // Callers remove an existing key first, so anything returned here
        // is a capacity victim, not a replacement.
        self.cache.push(key, entry)
    }

    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        self.cache.pop(key)
    }

    fn len(&self) -> usize {
        self.cache.len()
    }

    fn clear(&mut self) {
        self.cache.clear();
    }

    fn keys(&self) -> Vec<K> {
        self.cache.iter().map(|(k, _)| k.clone()).collect()
    }
}

/// LFU storage; victim has the minimum access count, oldest first on ties.
pub(crate) struct LfuStore<K, V> {
    data: HashMap<K, CacheEntry<V>>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LfuStore<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            data: HashMap::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn victim_key(&self) -> Option<K> {
        self.data
            .iter()
            .min_by_key(|(_, entry)| (entry.access_count, entry.created_at))
            .map(|(k, _)| k.clone())
    }
}

impl<K: Hash + Eq + Clone + Send, V: Send> EvictionStore<K, V> for LfuStore<K, V> {
    fn get(&mut self, key: &K) -> Option<&mut CacheEntry<V>> {
        self.data.get_mut(key)
    }

    fn peek(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.data.get(key)
    }

    fn insert(&mut self, key: K, entry: CacheEntry<V>) -> Option<(K, CacheEntry<V>)> {
        let evicted = if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.victim_key().and_then(|victim| {
                let entry = self.data.remove(&victim)?;
                Some((victim, entry))
            })
        } else {
            None
        };

        self.data.insert(key, entry);
        evicted
    }

    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        self.data.remove(key)
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn clear(&mut self) {
        self.data.clear();
    }

    fn keys(&self) -> Vec<K> {
        self.data.keys().cloned().collect()
    }
}

/// FIFO storage; the insertion-order queue picks the victim.
pub(crate) struct FifoStore<K, V> {
    data: HashMap<K, CacheEntry<V>>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> FifoStore<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            data: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }
}

impl<K: Hash + Eq + Clone + Send, V: Send> EvictionStore<K, V> for FifoStore<K, V> {
    fn get(&mut self, key: &K) -> Option<&mut CacheEntry<V>> {
        self.data.get_mut(key)
    }

    fn peek(&self, key: &K) -> Option<&CacheEntry<V>> {
        self.data.get(key)
    }

    fn insert(&mut self, key: K, entry: CacheEntry<V>) -> Option<(K, CacheEntry<V>)> {
        if self.data.contains_key(&key) {
            // Replacement resets the entry's age, so it moves to the back
            // of the queue.
            self.data.insert(key.clone(), entry);
            self.order.retain(|k| k != &key);
            self.order.push_back(key);
            return None;
        }

        let evicted = if self.data.len() >= self.capacity {
            self.order.pop_front().and_then(|oldest| {
                let entry = self.data.remove(&oldest)?;
                Some((oldest, entry))
            })
        } else {
            None
        };

        self.data.insert(key.clone(), entry);
        self.order.push_back(key);
        evicted
    }

    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        self.order.retain(|k| k != key);
        self.data.remove(key)
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn clear(&mut self) {
        self.data.clear();
        self.order.clear();
    }

    fn keys(&self) -> Vec<K> {
        self.data.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn entry(value: i32) -> CacheEntry<i32> {
        CacheEntry::new(value, Instant::now())
    }

    #[tokio::test]
    async fn lru_evicts_the_least_recently_used() {
        let mut store = LruStore::new(2);

        store.insert("a", entry(1));
        store.insert("b", entry(2));

        // Touch "a" so "b" becomes the victim.
        assert!(store.get(&"a").is_some());

        let evicted = store.insert("c", entry(3));
        assert_eq!(evicted.map(|(k, _)| k), Some("b"));
        assert!(store.peek(&"a").is_some());
        assert!(store.peek(&"c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn lfu_evicts_the_least_frequently_used() {
        let mut store = LfuStore::new(2);

        store.insert("a", entry(1));
        store.insert("b", entry(2));

        for _ in 0..3 {
            let now = Instant::now();
            if let Some(e) = store.get(&"a") {
                e.touch(now);
            }
        }
        let now = Instant::now();
        if let Some(e) = store.get(&"b") {
            e.touch(now);
        }

        let evicted = store.insert("c", entry(3));
        assert_eq!(evicted.map(|(k, _)| k), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn lfu_ties_break_toward_the_oldest() {
        let mut store = LfuStore::new(2);

        store.insert("old", entry(1));
        tokio::time::advance(std::time::Duration::from_millis(10)).await;
        store.insert("new", entry(2));

        // Equal access counts; "old" must go first.
        let evicted = store.insert("next", entry(3));
        assert_eq!(evicted.map(|(k, _)| k), Some("old"));
    }

    #[tokio::test]
    async fn fifo_ignores_access_patterns() {
        let mut store = FifoStore::new(2);

        store.insert("a", entry(1));
        store.insert("b", entry(2));

        for _ in 0..5 {
            let _ = store.get(&"a");
        }

        let evicted = store.insert("c", entry(3));
        assert_eq!(evicted.map(|(k, _)| k), Some("a"));
    }

    #[tokio::test]
    async fn fifo_replacement_moves_to_the_back() {
        let mut store = FifoStore::new(2);

        store.insert("a", entry(1));
        store.insert("b", entry(2));
        assert!(store.insert("a", entry(10)).is_none());

        let evicted = store.insert("c", entry(3));
        assert_eq!(evicted.map(|(k, _)| k), Some("b"));
    }

    #[test]
    fn default_strategy_is_lru() {
        assert_eq!(EvictionStrategy::default(), EvictionStrategy::Lru);
    }
}
