//! Events emitted by the cache.

use std::fmt;
use std::time::Instant;

use backstop_core::ResilienceEvent;

/// Why an entry was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The entry's TTL elapsed.
    Expired,
    /// The cache was at capacity and the strategy chose this entry.
    Size,
}

/// Events emitted by a cache instance.
///
/// Evicted values are handed to listeners by clone; listeners must not
/// try to keep entries alive inside the cache, and must not call back
/// into the same cache synchronously.
#[derive(Clone)]
pub enum CacheEvent<K, V> {
    /// A value was inserted or replaced.
    Put {
        /// Name of the cache instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The inserted key.
        key: K,
    },
    /// A value was removed by the caller.
    Removed {
        /// Name of the cache instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The removed key.
        key: K,
    },
    /// The cache evicted an entry.
    Evicted {
        /// Name of the cache instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The evicted key.
        key: K,
        /// The evicted value.
        value: V,
        /// Why the entry was evicted.
        reason: EvictionReason,
    },
}

// Key and value types need no Debug bound for the event to be loggable.
impl<K, V> fmt::Debug for CacheEvent<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Put { pattern_name, .. } => f
                .debug_struct("Put")
                .field("pattern_name", pattern_name)
                .finish_non_exhaustive(),
            CacheEvent::Removed { pattern_name, .. } => f
                .debug_struct("Removed")
                .field("pattern_name", pattern_name)
                .finish_non_exhaustive(),
            CacheEvent::Evicted {
                pattern_name,
                reason,
                ..
            } => f
                .debug_struct("Evicted")
                .field("pattern_name", pattern_name)
                .field("reason", reason)
                .finish_non_exhaustive(),
        }
    }
}

impl<K, V> ResilienceEvent for CacheEvent<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Put { .. } => "put",
            CacheEvent::Removed { .. } => "removed",
            CacheEvent::Evicted { .. } => "evicted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CacheEvent::Put { timestamp, .. }
            | CacheEvent::Removed { timestamp, .. }
            | CacheEvent::Evicted { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            CacheEvent::Put { pattern_name, .. }
            | CacheEvent::Removed { pattern_name, .. }
            | CacheEvent::Evicted { pattern_name, .. } => pattern_name,
        }
    }
}
