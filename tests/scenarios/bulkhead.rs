use std::sync::Arc;
use std::time::Duration;

use backstop_bulkhead::Bulkhead;
use backstop_core::ResilienceError;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
struct WorkError(&'static str);

async fn spin_until_waiting(bulkhead: &Bulkhead, waiting: usize) {
    while bulkhead.waiting_calls() < waiting {
        tokio::task::yield_now().await;
    }
}

/// One slot, two queue positions: a fourth caller is rejected, and the
/// queued callers complete in arrival order after the holder.
#[tokio::test(start_paused = true)]
async fn waiters_are_admitted_fifo() {
    let bulkhead = Arc::new(
        Bulkhead::builder()
            .max_concurrent_calls(1)
            .max_waiting_calls(2)
            .name("worker-pool")
            .build(),
    );
    let completion_order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let spawn_call = |label: &'static str, work: Duration| {
        let bulkhead = Arc::clone(&bulkhead);
        let order = Arc::clone(&completion_order);
        tokio::spawn(async move {
            bulkhead
                .execute(|| async move {
                    tokio::time::sleep(work).await;
                    order.lock().push(label);
                    Ok::<_, ResilienceError<WorkError>>(())
                })
                .await
        })
    };

    let a = spawn_call("A", Duration::from_millis(50));
    while bulkhead.active_calls() == 0 {
        tokio::task::yield_now().await;
    }

    let b = spawn_call("B", Duration::ZERO);
    spin_until_waiting(&bulkhead, 1).await;
    let c = spawn_call("C", Duration::ZERO);
    spin_until_waiting(&bulkhead, 2).await;

    // The queue is full; D fails fast.
    let d: Result<(), ResilienceError<WorkError>> =
        bulkhead.execute(|| async { Ok(()) }).await;
    match d.unwrap_err() {
        ResilienceError::BulkheadFull {
            max_concurrent_calls,
        } => assert_eq!(max_concurrent_calls, 1),
        other => panic!("unexpected: {other:?}"),
    }

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();
    c.await.unwrap().unwrap();

    assert_eq!(*completion_order.lock(), vec!["A", "B", "C"]);
    let stats = bulkhead.statistics();
    assert_eq!(stats.successful_calls, 3);
    assert_eq!(stats.rejected_calls, 1);
    assert_eq!(
        stats.total_calls,
        stats.successful_calls + stats.failed_calls + stats.rejected_calls
    );
}

/// With a zero-length queue, any caller that cannot be admitted
/// immediately is rejected.
#[tokio::test(start_paused = true)]
async fn zero_waiting_rejects_immediately() {
    let bulkhead = Arc::new(
        Bulkhead::builder()
            .max_concurrent_calls(1)
            .max_waiting_calls(0)
            .build(),
    );

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let holder = {
        let bulkhead = Arc::clone(&bulkhead);
        tokio::spawn(async move {
            bulkhead
                .execute(|| async {
                    let _ = rx.await;
                    Ok::<_, ResilienceError<WorkError>>(())
                })
                .await
        })
    };

    // The idle bulkhead admits the holder without queueing it.
    while bulkhead.active_calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(bulkhead.waiting_calls(), 0);

    // With the permit held and no queue room, overflow fails fast.
    let result: Result<(), ResilienceError<WorkError>> =
        bulkhead.execute(|| async { Ok(()) }).await;
    assert!(matches!(
        result.unwrap_err(),
        ResilienceError::BulkheadFull { .. }
    ));

    let _ = tx.send(());
    holder.await.unwrap().unwrap();

    let stats = bulkhead.statistics();
    assert_eq!(stats.successful_calls, 1);
    assert_eq!(stats.rejected_calls, 1);
}
