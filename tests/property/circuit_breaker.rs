//! Property tests for the circuit breaker.
//!
//! Invariants tested:
//! - The state sequence is a pure function of the outcome sequence
//! - The closed state never holds threshold-many consecutive failures

use backstop_circuitbreaker::{CircuitBreaker, CircuitState};
use backstop_core::ResilienceError;
use proptest::prelude::*;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
struct TestError;

async fn drive(breaker: &CircuitBreaker, outcomes: &[bool]) -> Vec<CircuitState> {
    let mut states = Vec::with_capacity(outcomes.len());
    for succeed in outcomes {
        let succeed = *succeed;
        let _: Result<(), _> = breaker
            .execute(|| async move {
                if succeed {
                    Ok(())
                } else {
                    Err(ResilienceError::Application(TestError))
                }
            })
            .await;
        states.push(breaker.current_state());
    }
    states
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: replaying the same outcomes through two identically
    /// configured breakers yields the same state sequence.
    #[test]
    fn state_sequence_is_replayable(
        threshold in 1u32..6,
        outcomes in proptest::collection::vec(any::<bool>(), 1..60),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let build = || {
                CircuitBreaker::builder()
                    .failure_threshold(threshold)
                    .reset_timeout(std::time::Duration::from_secs(3600))
                    .build()
            };

            let first = drive(&build(), &outcomes).await;
            let second = drive(&build(), &outcomes).await;

            prop_assert_eq!(first, second);
            Ok(())
        })?;
    }

    /// Property: while closed, the consecutive-failure count stays
    /// strictly below the threshold.
    #[test]
    fn closed_state_respects_the_threshold(
        threshold in 1u32..6,
        outcomes in proptest::collection::vec(any::<bool>(), 1..60),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let breaker = CircuitBreaker::builder()
                .failure_threshold(threshold)
                .reset_timeout(std::time::Duration::from_secs(3600))
                .build();

            for succeed in &outcomes {
                let succeed = *succeed;
                let _: Result<(), _> = breaker
                    .execute(|| async move {
                        if succeed {
                            Ok(())
                        } else {
                            Err(ResilienceError::Application(TestError))
                        }
                    })
                    .await;

                let snapshot = breaker.snapshot();
                if snapshot.state == CircuitState::Closed {
                    prop_assert!(snapshot.failure_count < threshold);
                }
            }
            Ok(())
        })?;
    }
}
