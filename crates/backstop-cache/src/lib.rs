//! Bounded, TTL-scoped cache with single-flight loading.
//!
//! A [`Cache`] stores up to `max_size` entries, optionally expiring them
//! after a TTL, and evicts per a configurable [`EvictionStrategy`] (LRU,
//! LFU, or FIFO). Lookup, access-order maintenance, and hit/miss
//! accounting happen inside one critical section; listeners observe puts,
//! removals, and evictions from outside it.
//!
//! [`Cache::get_or_load`] and [`LoadingCache`] add single-flight loading:
//! when several tasks miss on the same key at once, exactly one runs the
//! loader while the rest await its result.
//!
//! # Example
//!
//! ```
//! use backstop_cache::{Cache, EvictionStrategy};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let cache: Cache<String, String> = Cache::builder()
//!     .max_size(10_000)
//!     .ttl(Duration::from_secs(300))
//!     .eviction_strategy(EvictionStrategy::Lru)
//!     .name("user-profiles")
//!     .build();
//!
//! cache.put("u1".to_string(), "Ada".to_string());
//! assert_eq!(cache.get(&"u1".to_string()), Some("Ada".to_string()));
//! # }
//! ```

mod config;
mod entry;
mod events;
mod eviction;
mod loading;

pub use config::CacheBuilder;
pub use events::{CacheEvent, EvictionReason};
pub use eviction::EvictionStrategy;
pub use loading::LoadingCache;

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant as WallInstant;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use backstop_core::{EventListener, ListenerHandle, ResilienceError};

use config::CacheConfig;
use entry::CacheEntry;
use eviction::EvictionStore;

/// Point-in-time snapshot of a cache's counters.
///
/// Counters are monotone between explicit resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatistics {
    /// Lookups that returned a live value.
    pub hits: u64,
    /// Lookups that found nothing, or only an expired entry.
    pub misses: u64,
    /// Entries evicted by TTL or capacity.
    pub evictions: u64,
}

impl CacheStatistics {
    /// Hits as a fraction of all lookups; zero when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState<K, V> {
    store: Box<dyn EvictionStore<K, V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// The cache primitive. Cheap to clone; clones share state.
pub struct Cache<K, V> {
    config: Arc<CacheConfig<K, V>>,
    state: Arc<Mutex<CacheState<K, V>>>,
    inflight: Arc<Mutex<HashMap<K, broadcast::Sender<Option<V>>>>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            inflight: Arc::clone(&self.inflight),
        }
    }
}

/// Removes a leader's inflight entry if it never completed, closing the
/// channel so waiting followers fall back to their own load.
struct FlightGuard<K: Hash + Eq, V> {
    inflight: Arc<Mutex<HashMap<K, broadcast::Sender<Option<V>>>>>,
    key: Option<K>,
}

impl<K: Hash + Eq, V> FlightGuard<K, V> {
    fn complete(&mut self, payload: Option<V>) {
        if let Some(key) = self.key.take() {
            if let Some(tx) = self.inflight.lock().remove(&key) {
                let _ = tx.send(payload);
            }
        }
    }
}

impl<K: Hash + Eq, V> Drop for FlightGuard<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inflight.lock().remove(&key);
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new configuration builder.
    pub fn builder() -> CacheBuilder<K, V> {
        CacheBuilder::new()
    }

    pub(crate) fn from_parts(config: CacheConfig<K, V>, strategy: EvictionStrategy) -> Self {
        let store = eviction::new_store(strategy, config.max_size);
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CacheState {
                store,
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Looks up `key`, refreshing its access metadata on a hit.
    ///
    /// An expired entry is evicted on the spot and counts as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let config = &self.config;
        let now = config.clock.now();
        let mut events = Vec::new();

        enum Lookup {
            Absent,
            Expired,
            Live,
        }

        let value = {
            let mut state = self.state.lock();

            let lookup = match state.store.peek(key) {
                None => Lookup::Absent,
                Some(entry) if entry.is_expired(config.ttl, now) => Lookup::Expired,
                Some(_) => Lookup::Live,
            };

            match lookup {
                Lookup::Absent => {
                    state.misses += 1;
                    None
                }
                Lookup::Expired => {
                    if let Some(entry) = state.store.remove(key) {
                        state.evictions += 1;
                        events.push(CacheEvent::Evicted {
                            pattern_name: config.name.clone(),
                            timestamp: WallInstant::now(),
                            key: key.clone(),
                            value: entry.value,
                            reason: EvictionReason::Expired,
                        });
                    }
                    state.misses += 1;
                    None
                }
                Lookup::Live => {
                    let value = state.store.get(key).map(|entry| {
                        entry.touch(now);
                        entry.value.clone()
                    });
                    state.hits += 1;
                    value
                }
            }
        };

        self.emit(events);

        #[cfg(feature = "metrics")]
        {
            let outcome = if value.is_some() { "hit" } else { "miss" };
            metrics::counter!("backstop_cache_lookups_total", "cache" => config.name.clone(), "outcome" => outcome).increment(1);
        }

        value
    }

    /// Inserts `value` under `key`, evicting one entry per the strategy
    /// when the cache is full and the key is new.
    pub fn put(&self, key: K, value: V) {
        let config = &self.config;
        let now = config.clock.now();
        let mut events = Vec::new();

        {
            let mut state = self.state.lock();
            let evicted = state.store.insert(key.clone(), CacheEntry::new(value, now));
            if let Some((victim_key, victim_entry)) = evicted {
                // The LRU store reports a same-key replacement the same
                // way as a capacity victim; only the latter is an eviction.
                if victim_key != key {
                    state.evictions += 1;

                    #[cfg(feature = "metrics")]
                    metrics::counter!("backstop_cache_evictions_total", "cache" => config.name.clone(), "reason" => "size").increment(1);

                    events.push(CacheEvent::Evicted {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        key: victim_key,
                        value: victim_entry.value,
                        reason: EvictionReason::Size,
                    });
                }
            }
        }

        if !config.event_listeners.is_empty() {
            events.push(CacheEvent::Put {
                pattern_name: config.name.clone(),
                timestamp: WallInstant::now(),
                key,
            });
        }
        self.emit(events);
    }

    /// Removes `key`, returning its live value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let config = &self.config;
        let removed = self.state.lock().store.remove(key);

        match removed {
            Some(entry) => {
                if !config.event_listeners.is_empty() {
                    config.event_listeners.emit(&CacheEvent::Removed {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        key: key.clone(),
                    });
                }
                Some(entry.value)
            }
            None => None,
        }
    }

    /// Removes every entry. Statistics are unaffected.
    pub fn clear(&self) {
        self.state.lock().store.clear();
    }

    /// Purges every expired entry, returning how many were removed.
    pub fn clean_up(&self) -> usize {
        let config = &self.config;
        let now = config.clock.now();
        let mut events = Vec::new();

        let removed = {
            let mut state = self.state.lock();
            let keys = state.store.keys();
            let mut removed = 0;
            for key in keys {
                let expired = state
                    .store
                    .peek(&key)
                    .is_some_and(|entry| entry.is_expired(config.ttl, now));
                if expired {
                    if let Some(entry) = state.store.remove(&key) {
                        state.evictions += 1;
                        removed += 1;
                        events.push(CacheEvent::Evicted {
                            pattern_name: config.name.clone(),
                            timestamp: WallInstant::now(),
                            key,
                            value: entry.value,
                            reason: EvictionReason::Expired,
                        });
                    }
                }
            }
            removed
        };

        #[cfg(feature = "tracing")]
        if removed > 0 {
            tracing::debug!(cache = %config.name, removed, "purged expired entries");
        }

        self.emit(events);
        removed
    }

    /// Returns `key`'s live-and-present status without promoting it.
    pub fn contains_key(&self, key: &K) -> bool {
        let now = self.config.clock.now();
        self.state
            .lock()
            .store
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(self.config.ttl, now))
    }

    /// Every stored key, expired entries included.
    pub fn keys(&self) -> Vec<K> {
        self.state.lock().store.keys()
    }

    /// Keys whose entries have not expired.
    pub fn valid_keys(&self) -> Vec<K> {
        let now = self.config.clock.now();
        let state = self.state.lock();
        state
            .store
            .keys()
            .into_iter()
            .filter(|key| {
                state
                    .store
                    .peek(key)
                    .is_some_and(|entry| !entry.is_expired(self.config.ttl, now))
            })
            .collect()
    }

    /// Number of stored entries, expired entries included.
    pub fn size(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Number of entries that have not expired.
    pub fn valid_size(&self) -> usize {
        self.valid_keys().len()
    }

    /// Loads `key` through the cache with single-flight semantics.
    ///
    /// On a miss, exactly one concurrent caller runs `loader`; the others
    /// await its result and receive the same value. A failed or cancelled
    /// leader makes each waiting follower retry with its own loader,
    /// independently.
    pub async fn get_or_load<E, F, Fut>(&self, key: K, loader: F) -> Result<V, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ResilienceError<E>>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        // Join an existing flight or become the leader.
        let follower_rx = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    inflight.insert(key.clone(), tx);
                    None
                }
            }
        };

        if let Some(mut rx) = follower_rx {
            match rx.recv().await {
                Ok(Some(value)) => return Ok(value),
                // Leader failed or was dropped: retry independently.
                Ok(None) | Err(_) => {
                    let value = loader().await?;
                    self.put(key, value.clone());
                    return Ok(value);
                }
            }
        }

        let mut guard = FlightGuard {
            inflight: Arc::clone(&self.inflight),
            key: Some(key.clone()),
        };

        match loader().await {
            Ok(value) => {
                self.put(key, value.clone());
                guard.complete(Some(value.clone()));
                Ok(value)
            }
            Err(error) => {
                guard.complete(None);
                Err(error)
            }
        }
    }

    /// Returns a snapshot of the counters.
    pub fn statistics(&self) -> CacheStatistics {
        let state = self.state.lock();
        CacheStatistics {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    /// Resets all counters to zero.
    pub fn reset_statistics(&self) {
        let mut state = self.state.lock();
        state.hits = 0;
        state.misses = 0;
        state.evictions = 0;
    }

    /// Registers a listener at runtime; returns a handle for removal.
    pub fn add_listener<L>(&self, listener: L) -> ListenerHandle
    where
        L: EventListener<CacheEvent<K, V>> + 'static,
    {
        self.config.event_listeners.add(listener)
    }

    /// Removes a previously registered listener. Idempotent.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.config.event_listeners.remove(handle)
    }

    /// The instance name used in events and logs.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn emit(&self, events: Vec<CacheEvent<K, V>>) {
        for event in &events {
            self.config.event_listeners.emit(event);
        }
    }
}
