//! Property tests for the cache.
//!
//! Invariants tested:
//! - size() never exceeds max_size, whatever the strategy
//! - LRU evicts the least recently accessed present key
//! - hit/miss counters are monotone

use std::sync::Arc;

use backstop_cache::{Cache, EvictionStrategy};
use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::runtime::Runtime;

fn strategy() -> impl Strategy<Value = EvictionStrategy> {
    prop_oneof![
        Just(EvictionStrategy::Lru),
        Just(EvictionStrategy::Lfu),
        Just(EvictionStrategy::Fifo),
    ]
}

/// An operation against a small key space.
#[derive(Debug, Clone)]
enum Op {
    Put(u8),
    Get(u8),
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(
        prop_oneof![(0u8..12).prop_map(Op::Put), (0u8..12).prop_map(Op::Get)],
        1..80,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: the entry count never exceeds the capacity.
    #[test]
    fn size_is_bounded(
        max_size in 1usize..6,
        strategy in strategy(),
        ops in ops(),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let cache: Cache<u8, u64> = Cache::builder()
                .max_size(max_size)
                .eviction_strategy(strategy)
                .build();

            for op in ops {
                match op {
                    Op::Put(key) => cache.put(key, key as u64),
                    Op::Get(key) => {
                        let _ = cache.get(&key);
                    }
                }
                prop_assert!(cache.size() <= max_size);
            }
            Ok(())
        })?;
    }

    /// Property: under LRU, every size eviction removes the key that a
    /// reference recency model calls least recently used.
    #[test]
    fn lru_evicts_per_the_reference_model(
        max_size in 1usize..5,
        ops in ops(),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let evicted: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&evicted);

            let cache: Cache<u8, u64> = Cache::builder()
                .max_size(max_size)
                .eviction_strategy(EvictionStrategy::Lru)
                .on_eviction(move |key, _, _| sink.lock().push(*key))
                .build();

            // Reference model: most recent at the back.
            let mut recency: Vec<u8> = Vec::new();

            for op in ops {
                match op {
                    Op::Put(key) => {
                        let expected_victim = if recency.len() == max_size
                            && !recency.contains(&key)
                        {
                            recency.first().copied()
                        } else {
                            None
                        };

                        cache.put(key, key as u64);

                        recency.retain(|k| *k != key);
                        recency.push(key);
                        if let Some(victim) = expected_victim {
                            recency.retain(|k| *k != victim);
                            prop_assert_eq!(evicted.lock().last().copied(), Some(victim));
                        }
                    }
                    Op::Get(key) => {
                        let hit = cache.get(&key).is_some();
                        prop_assert_eq!(hit, recency.contains(&key));
                        if hit {
                            recency.retain(|k| *k != key);
                            recency.push(key);
                        }
                    }
                }
            }
            Ok(())
        })?;
    }

    /// Property: hit and miss counters are monotone.
    #[test]
    fn counters_are_monotone(ops in ops()) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let cache: Cache<u8, u64> = Cache::builder().max_size(4).build();
            let mut last = cache.statistics();

            for op in ops {
                match op {
                    Op::Put(key) => cache.put(key, 0),
                    Op::Get(key) => {
                        let _ = cache.get(&key);
                    }
                }
                let now = cache.statistics();
                prop_assert!(now.hits >= last.hits);
                prop_assert!(now.misses >= last.misses);
                prop_assert!(now.evictions >= last.evictions);
                last = now;
            }
            Ok(())
        })?;
    }
}
