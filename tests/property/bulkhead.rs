//! Property tests for the bulkhead.
//!
//! Invariants tested:
//! - Active calls never exceed max_concurrent_calls
//! - total_calls = successful + failed + rejected across any run
//! - Counters never decrease between resets

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backstop_bulkhead::Bulkhead;
use backstop_core::ResilienceError;
use proptest::prelude::*;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
struct TestError;

/// Tracks the highest concurrency a batch of ops observed.
struct ConcurrencyTracker {
    current: AtomicUsize,
    max_seen: AtomicUsize,
}

impl ConcurrencyTracker {
    fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        }
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: no interleaving of admissions pushes active calls past
    /// the configured cap.
    #[test]
    fn concurrency_never_exceeds_the_cap(
        max_concurrent in 1usize..4,
        max_waiting in 0usize..6,
        tasks in 1usize..16,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bulkhead = Arc::new(
                Bulkhead::builder()
                    .max_concurrent_calls(max_concurrent)
                    .max_waiting_calls(max_waiting)
                    .build(),
            );
            let tracker = Arc::new(ConcurrencyTracker::new());

            let handles: Vec<_> = (0..tasks)
                .map(|_| {
                    let bulkhead = Arc::clone(&bulkhead);
                    let tracker = Arc::clone(&tracker);
                    tokio::spawn(async move {
                        let _: Result<(), ResilienceError<TestError>> = bulkhead
                            .execute(|| async {
                                tracker.enter();
                                tokio::time::sleep(Duration::from_millis(2)).await;
                                tracker.exit();
                                Ok(())
                            })
                            .await;
                    })
                })
                .collect();

            for handle in handles {
                handle.await.unwrap();
            }

            prop_assert!(tracker.max_seen.load(Ordering::SeqCst) <= max_concurrent);
            prop_assert_eq!(bulkhead.active_calls(), 0);
            prop_assert_eq!(bulkhead.waiting_calls(), 0);
            Ok(())
        })?;
    }

    /// Property: the accounting identity holds after any mix of
    /// successes, failures, and rejections.
    #[test]
    fn accounting_identity_holds(
        outcomes in proptest::collection::vec(any::<bool>(), 1..40),
        max_waiting in 0usize..3,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bulkhead = Bulkhead::builder()
                .max_concurrent_calls(1)
                .max_waiting_calls(max_waiting)
                .build();

            for succeed in &outcomes {
                let succeed = *succeed;
                let _: Result<(), _> = bulkhead
                    .execute(|| async move {
                        if succeed {
                            Ok(())
                        } else {
                            Err(ResilienceError::Application(TestError))
                        }
                    })
                    .await;
            }

            let stats = bulkhead.statistics();
            prop_assert_eq!(
                stats.total_calls,
                stats.successful_calls + stats.failed_calls + stats.rejected_calls
            );
            prop_assert_eq!(stats.total_calls, outcomes.len() as u64);
            Ok(())
        })?;
    }

    /// Property: counters are monotone between resets.
    #[test]
    fn statistics_are_monotone(rounds in 1usize..12) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bulkhead = Bulkhead::builder().max_concurrent_calls(2).build();
            let mut last = bulkhead.statistics();

            for round in 0..rounds {
                let fail = round % 3 == 0;
                let _: Result<(), _> = bulkhead
                    .execute(|| async move {
                        if fail {
                            Err(ResilienceError::Application(TestError))
                        } else {
                            Ok(())
                        }
                    })
                    .await;

                let now = bulkhead.statistics();
                prop_assert!(now.total_calls >= last.total_calls);
                prop_assert!(now.successful_calls >= last.successful_calls);
                prop_assert!(now.failed_calls >= last.failed_calls);
                prop_assert!(now.rejected_calls >= last.rejected_calls);
                last = now;
            }
            Ok(())
        })?;
    }
}
