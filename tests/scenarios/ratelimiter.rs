use std::time::Duration;

use backstop_core::ResilienceError;
use backstop_ratelimiter::{SlidingWindow, TokenBucket};

#[derive(Debug, Clone, PartialEq)]
struct CallError(&'static str);

/// Burst of two, then refill at 10 permits/second: 100ms buys one more
/// admission.
#[tokio::test(start_paused = true)]
async fn token_bucket_refills_at_the_configured_rate() {
    let limiter = TokenBucket::builder()
        .permits_per_second(10.0)
        .burst_capacity(2)
        .name("api-calls")
        .build();

    for _ in 0..2 {
        let admitted = limiter
            .try_execute(|| async { Ok::<_, ResilienceError<CallError>>(()) })
            .await;
        assert!(admitted.is_ok());
    }

    let third: Result<(), ResilienceError<CallError>> =
        limiter.try_execute(|| async { Ok(()) }).await;
    assert!(third.unwrap_err().is_rate_limited());

    tokio::time::advance(Duration::from_millis(100)).await;

    let fourth = limiter
        .try_execute(|| async { Ok::<_, ResilienceError<CallError>>("admitted") })
        .await;
    assert_eq!(fourth.unwrap(), "admitted");
}

/// With burst capacity one, back-to-back blocking admissions are spaced
/// by at least one refill interval of virtual time.
#[tokio::test(start_paused = true)]
async fn unit_burst_spaces_admissions_by_the_refill_interval() {
    let limiter = TokenBucket::builder()
        .permits_per_second(4.0)
        .burst_capacity(1)
        .build();

    let mut admission_times = Vec::new();
    for _ in 0..3 {
        limiter
            .execute(|| async { Ok::<_, ResilienceError<CallError>>(()) })
            .await
            .unwrap();
        admission_times.push(tokio::time::Instant::now());
    }

    for pair in admission_times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(250));
    }
}

/// The sliding window admits `max_requests` per trailing window and
/// frees capacity as old admissions age out.
#[tokio::test(start_paused = true)]
async fn sliding_window_tracks_the_trailing_interval() {
    let limiter = SlidingWindow::builder()
        .max_requests(3)
        .window_duration(Duration::from_secs(1))
        .name("webhooks")
        .build();

    for _ in 0..3 {
        let admitted = limiter
            .execute(|| async { Ok::<_, ResilienceError<CallError>>(()) })
            .await;
        assert!(admitted.is_ok());
    }

    let rejected: Result<(), ResilienceError<CallError>> =
        limiter.execute(|| async { Ok(()) }).await;
    match rejected.unwrap_err() {
        ResilienceError::RateLimitExceeded { retry_after } => {
            assert!(retry_after.is_some());
        }
        other => panic!("unexpected: {other:?}"),
    }

    // Half the window later, everything is still inside it.
    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(limiter.available_permits(), 0);

    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(limiter.available_permits(), 3);
}
