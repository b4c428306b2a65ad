//! Cache configuration.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use backstop_core::clock::{default_clock, Clock};
use backstop_core::{EventListeners, FnListener};

use crate::events::{CacheEvent, EvictionReason};
use crate::eviction::EvictionStrategy;
use crate::Cache;

pub(crate) struct CacheConfig<K, V> {
    pub(crate) max_size: usize,
    pub(crate) ttl: Option<Duration>,
    pub(crate) event_listeners: EventListeners<CacheEvent<K, V>>,
    pub(crate) name: String,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Builder for [`Cache`].
pub struct CacheBuilder<K, V> {
    max_size: usize,
    ttl: Option<Duration>,
    strategy: EvictionStrategy,
    event_listeners: EventListeners<CacheEvent<K, V>>,
    name: String,
    clock: Arc<dyn Clock>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            max_size: 1000,
            ttl: None,
            strategy: EvictionStrategy::default(),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
            clock: default_clock(),
        }
    }

    /// Maximum number of entries.
    ///
    /// Default: 1000
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Time-to-live for entries. Unset means entries never expire.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Victim choice when the cache is full.
    ///
    /// Default: LRU
    pub fn eviction_strategy(mut self, strategy: EvictionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Give this cache a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the clock. Intended for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a callback for inserts.
    pub fn on_put<F>(self, f: F) -> Self
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CacheEvent<K, V>| {
                if let CacheEvent::Put { key, .. } = event {
                    f(key);
                }
            }));
        self
    }

    /// Register a callback for caller-driven removals.
    pub fn on_remove<F>(self, f: F) -> Self
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CacheEvent<K, V>| {
                if let CacheEvent::Removed { key, .. } = event {
                    f(key);
                }
            }));
        self
    }

    /// Register a callback for evictions, both TTL and capacity.
    pub fn on_eviction<F>(self, f: F) -> Self
    where
        F: Fn(&K, &V, EvictionReason) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CacheEvent<K, V>| {
                if let CacheEvent::Evicted {
                    key, value, reason, ..
                } = event
                {
                    f(key, value, *reason);
                }
            }));
        self
    }

    /// Builds the cache.
    ///
    /// # Panics
    ///
    /// Panics when `max_size` is zero or `ttl` is set to zero.
    pub fn build(self) -> Cache<K, V> {
        assert!(self.max_size > 0, "max_size must be > 0");
        if let Some(ttl) = self.ttl {
            assert!(!ttl.is_zero(), "ttl must be > 0");
        }

        Cache::from_parts(
            CacheConfig {
                max_size: self.max_size,
                ttl: self.ttl,
                event_listeners: self.event_listeners,
                name: self.name,
                clock: self.clock,
            },
            self.strategy,
        )
    }
}

impl<K, V> Default for CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
