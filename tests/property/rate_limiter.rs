//! Property tests for the rate limiters.
//!
//! Invariants tested:
//! - Token count grows monotonically between admissions, capped at burst
//! - The sliding window never records more than max_requests timestamps

use std::time::Duration;

use backstop_core::ResilienceError;
use backstop_ratelimiter::{SlidingWindow, TokenBucket};
use proptest::prelude::*;
use tokio::runtime::Builder;

#[derive(Debug, Clone)]
struct TestError;

fn paused_runtime() -> tokio::runtime::Runtime {
    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: with no admissions in between, tokens only grow, and
    /// never past the burst capacity.
    #[test]
    fn tokens_grow_monotonically_up_to_burst(
        rate in 1.0f64..200.0,
        burst in 1u32..20,
        spent in 0u32..20,
        advances_ms in proptest::collection::vec(1u64..500, 1..8),
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let limiter = TokenBucket::builder()
                .permits_per_second(rate)
                .burst_capacity(burst)
                .build();

            // Drain some of the initial burst.
            for _ in 0..spent.min(burst) {
                let _ = limiter.try_acquire::<TestError>(1);
            }

            let mut last = limiter.available_tokens();
            for advance in advances_ms {
                tokio::time::advance(Duration::from_millis(advance)).await;
                let now = limiter.available_tokens();
                prop_assert!(now + 1e-9 >= last, "tokens shrank: {last} -> {now}");
                prop_assert!(now <= burst as f64 + 1e-9, "tokens exceeded burst: {now}");
                last = now;
            }
            Ok(())
        })?;
    }

    /// Property: after any admission pattern, the window never holds
    /// more than max_requests timestamps.
    #[test]
    fn window_count_is_bounded(
        max_requests in 1usize..8,
        window_ms in 10u64..200,
        gaps_ms in proptest::collection::vec(0u64..100, 1..40),
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let limiter = SlidingWindow::builder()
                .max_requests(max_requests)
                .window_duration(Duration::from_millis(window_ms))
                .build();

            for gap in gaps_ms {
                tokio::time::advance(Duration::from_millis(gap)).await;
                let _: Result<(), _> = limiter
                    .try_execute(|| async { Ok::<_, ResilienceError<TestError>>(()) })
                    .await;
                prop_assert!(limiter.current_window_count() <= max_requests);
            }
            Ok(())
        })?;
    }
}
