use std::time::Duration;

use backstop_core::ResilienceError;
use backstop_timelimiter::TimeLimiter;

#[derive(Debug, Clone, PartialEq)]
struct QueryError(&'static str);

/// An op that outlives its deadline is cancelled and counted.
#[tokio::test(start_paused = true)]
async fn timeouts_are_counted() {
    let limiter = TimeLimiter::builder()
        .timeout(Duration::from_millis(50))
        .name("report-query")
        .build();

    let result: Result<(), ResilienceError<QueryError>> = limiter
        .execute(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

    assert!(result.unwrap_err().is_timeout());
    let stats = limiter.statistics();
    assert_eq!(stats.timed_out_calls, 1);
    assert_eq!(stats.successful_calls, 0);
    assert_eq!(stats.total_calls, 1);
}

/// A fired deadline stops the op's side effects at the next await point.
#[tokio::test(start_paused = true)]
async fn cancellation_is_cooperative() {
    let progressed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let p = std::sync::Arc::clone(&progressed);

    let limiter = TimeLimiter::builder()
        .timeout(Duration::from_millis(10))
        .build();

    let _: Result<(), _> = limiter
        .execute(|| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            p.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, ResilienceError<QueryError>>(())
        })
        .await;

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(!progressed.load(std::sync::atomic::Ordering::SeqCst));
}

/// Parallel per-op deadlines: slow and failing ops become `None`, the
/// rest keep their slots.
#[tokio::test(start_paused = true)]
async fn execute_all_is_positionally_aligned() {
    let limiter = TimeLimiter::builder()
        .timeout(Duration::from_millis(100))
        .build();

    type Op = Box<
        dyn FnOnce() -> futures::future::BoxFuture<
                'static,
                Result<u32, ResilienceError<QueryError>>,
            > + Send,
    >;

    let ops: Vec<Op> = vec![
        Box::new(|| Box::pin(async { Ok(10) })),
        Box::new(|| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(20)
            })
        }),
        Box::new(|| {
            Box::pin(async { Err(ResilienceError::Application(QueryError("shard down"))) })
        }),
        Box::new(|| Box::pin(async { Ok(40) })),
    ];

    let results = limiter.execute_all(ops).await;
    assert_eq!(results, vec![Some(10), None, None, Some(40)]);
}
