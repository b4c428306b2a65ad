//! Property tests for the saga engine.
//!
//! Invariants tested:
//! - Compensated steps are exactly the reverse of the executed prefix
//! - Steps after the failing one never run

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use backstop_core::ResilienceError;
use backstop_saga::{Saga, SagaBuilder, SagaResult};
use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
struct StepError;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: failing at step k compensates steps k-1..0, in that
    /// order, and runs nothing past k.
    #[test]
    fn compensation_is_a_strict_reverse_prefix(
        total_steps in 1usize..8,
        fail_at in 0usize..8,
    ) {
        let fail_at = fail_at % total_steps;

        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let forward: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
            let compensated: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

            let mut builder: SagaBuilder<usize, StepError> = Saga::builder();
            for index in 0..total_steps {
                let forward = Arc::clone(&forward);
                let compensated = Arc::clone(&compensated);
                builder = builder.step(
                    &format!("step-{index}"),
                    move || {
                        let forward = Arc::clone(&forward);
                        async move {
                            if index == fail_at {
                                Err(ResilienceError::Application(StepError))
                            } else {
                                forward.lock().push(index);
                                Ok(index)
                            }
                        }
                    },
                    move |undone_index| {
                        let compensated = Arc::clone(&compensated);
                        async move {
                            compensated.lock().push(undone_index);
                            Ok(())
                        }
                    },
                );
            }

            let outcome = builder.build().execute().await;

            let executed: Vec<usize> = (0..fail_at).collect();
            let expected_compensations: Vec<usize> = executed.iter().rev().copied().collect();

            prop_assert_eq!(&*forward.lock(), &executed);
            prop_assert_eq!(&*compensated.lock(), &expected_compensations);

            match outcome {
                SagaResult::Failure {
                    compensated_steps,
                    compensation_errors,
                    executed_steps,
                    ..
                } => {
                    prop_assert_eq!(compensated_steps, fail_at);
                    prop_assert!(compensation_errors.is_empty());
                    prop_assert_eq!(executed_steps.len(), fail_at);
                }
                SagaResult::Success { .. } => {
                    prop_assert!(false, "saga should have failed");
                }
            }
            Ok(())
        })?;
    }

    /// Property: a saga that never fails runs every step exactly once
    /// and compensates nothing.
    #[test]
    fn successful_runs_compensate_nothing(total_steps in 1usize..8) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let compensations = Arc::new(AtomicUsize::new(0));
            let runs = Arc::new(AtomicUsize::new(0));

            let mut builder: SagaBuilder<usize, StepError> = Saga::builder();
            for index in 0..total_steps {
                let compensations = Arc::clone(&compensations);
                let runs = Arc::clone(&runs);
                builder = builder.step(
                    &format!("step-{index}"),
                    move || {
                        let runs = Arc::clone(&runs);
                        async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            Ok(index)
                        }
                    },
                    move |_| {
                        let compensations = Arc::clone(&compensations);
                        async move {
                            compensations.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    },
                );
            }

            let outcome = builder.build().execute().await;
            prop_assert!(outcome.is_success());
            prop_assert_eq!(runs.load(Ordering::SeqCst), total_steps);
            prop_assert_eq!(compensations.load(Ordering::SeqCst), 0);
            Ok(())
        })?;
    }
}
