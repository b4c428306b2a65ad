//! Cache entries and their access metadata.

use std::time::Duration;

use tokio::time::Instant;

/// A stored value plus the metadata eviction strategies consult.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub(crate) value: V,
    pub(crate) created_at: Instant,
    pub(crate) last_access: Instant,
    pub(crate) access_count: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            last_access: now,
            access_count: 0,
        }
    }

    pub(crate) fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        match ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) >= ttl,
            None => false,
        }
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_access = now;
        self.access_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_without_ttl_never_expire() {
        let entry = CacheEntry::new("v", Instant::now());
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(!entry.is_expired(None, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_is_inclusive_at_the_bound() {
        let entry = CacheEntry::new("v", Instant::now());
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(entry.is_expired(Some(Duration::from_millis(100)), Instant::now()));
        assert!(!entry.is_expired(Some(Duration::from_millis(101)), Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn touch_updates_access_metadata() {
        let created = Instant::now();
        let mut entry = CacheEntry::new("v", created);
        tokio::time::advance(Duration::from_millis(10)).await;

        entry.touch(Instant::now());
        assert_eq!(entry.access_count, 1);
        assert!(entry.last_access > created);
        assert_eq!(entry.created_at, created);
    }
}
