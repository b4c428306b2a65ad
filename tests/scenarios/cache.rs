use std::sync::Arc;

use backstop_cache::{Cache, EvictionReason, EvictionStrategy};
use parking_lot::Mutex;

/// LRU with capacity three: touching k1 protects it, so adding k4
/// evicts k2 for size.
#[tokio::test]
async fn lru_evicts_the_untouched_key() {
    let evicted: Arc<Mutex<Vec<(&'static str, EvictionReason)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&evicted);

    let cache: Cache<&str, u32> = Cache::builder()
        .max_size(3)
        .eviction_strategy(EvictionStrategy::Lru)
        .on_eviction(move |key, _value, reason| e.lock().push((*key, reason)))
        .name("sessions")
        .build();

    cache.put("k1", 1);
    cache.put("k2", 2);
    cache.put("k3", 3);

    assert_eq!(cache.get(&"k1"), Some(1));
    cache.put("k4", 4);

    let mut present = cache.keys();
    present.sort();
    assert_eq!(present, vec!["k1", "k3", "k4"]);
    assert_eq!(*evicted.lock(), vec![("k2", EvictionReason::Size)]);
}

/// LFU keeps hot keys; FIFO ignores heat entirely.
#[tokio::test]
async fn lfu_and_fifo_choose_different_victims() {
    let lfu: Cache<&str, u32> = Cache::builder()
        .max_size(2)
        .eviction_strategy(EvictionStrategy::Lfu)
        .build();
    lfu.put("hot", 1);
    lfu.put("cold", 2);
    for _ in 0..5 {
        let _ = lfu.get(&"hot");
    }
    lfu.put("new", 3);
    assert!(lfu.contains_key(&"hot"));
    assert!(!lfu.contains_key(&"cold"));

    let fifo: Cache<&str, u32> = Cache::builder()
        .max_size(2)
        .eviction_strategy(EvictionStrategy::Fifo)
        .build();
    fifo.put("first", 1);
    fifo.put("second", 2);
    for _ in 0..5 {
        let _ = fifo.get(&"first");
    }
    fifo.put("third", 3);
    assert!(!fifo.contains_key(&"first"));
    assert!(fifo.contains_key(&"second"));
}
