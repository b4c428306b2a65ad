use std::sync::Arc;

use backstop_core::ResilienceError;
use backstop_saga::{Saga, SagaResult};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
struct OrderError(&'static str);

fn fail(err: &'static str) -> ResilienceError<OrderError> {
    ResilienceError::Application(OrderError(err))
}

/// Three successful steps then a failure: compensations run in exact
/// reverse order, and the original cause stays on top.
#[tokio::test]
async fn compensations_run_in_reverse_order() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (l1, l2, l3) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));

    let saga: Saga<(), OrderError> = Saga::builder()
        .name("fulfil-order")
        .step(
            "s1",
            || async { Ok("reservation-1") },
            move |_| {
                let log = Arc::clone(&l1);
                async move {
                    log.lock().push("S1");
                    Ok(())
                }
            },
        )
        .step(
            "s2",
            || async { Ok("payment-hold") },
            move |_| {
                let log = Arc::clone(&l2);
                async move {
                    log.lock().push("S2");
                    Ok(())
                }
            },
        )
        .step(
            "s3",
            || async { Ok("shipment-draft") },
            move |_| {
                let log = Arc::clone(&l3);
                async move {
                    log.lock().push("S3");
                    Ok(())
                }
            },
        )
        .step_uncompensated("s4", || async { Err::<(), _>(fail("carrier rejected")) })
        .build();

    let outcome = saga.execute().await;
    match outcome {
        SagaResult::Failure {
            error,
            compensated_steps,
            compensation_errors,
            executed_steps,
            ..
        } => {
            assert!(matches!(
                error,
                ResilienceError::SagaStepFailed { ref step, .. } if step == "s4"
            ));
            assert_eq!(compensated_steps, 3);
            assert!(compensation_errors.is_empty());
            assert_eq!(executed_steps.len(), 3);
        }
        SagaResult::Success { .. } => panic!("saga should have failed"),
    }

    assert_eq!(*log.lock(), vec!["S3", "S2", "S1"]);
}

/// A batch of sagas runs concurrently with per-saga isolation.
#[tokio::test]
async fn parallel_sagas_report_aggregate_stats() {
    let good: Saga<u32, OrderError> = Saga::builder()
        .step_uncompensated("work", || async { Ok(1_u32) })
        .build();
    let bad: Saga<u32, OrderError> = Saga::builder()
        .step_uncompensated("work", || async { Err::<u32, _>(fail("no stock")) })
        .build();

    let sagas = vec![good.clone(), bad, good];
    let report = backstop_saga::run_all(&sagas).await;

    assert_eq!(report.success_count, 2);
    assert_eq!(report.failure_count, 1);
    assert!((report.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.results.len(), 3);
}
