use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backstop_circuitbreaker::{CircuitBreaker, CircuitState};
use backstop_core::ResilienceError;

#[derive(Debug, Clone, PartialEq)]
struct BackendError(&'static str);

fn backend_down() -> ResilienceError<BackendError> {
    ResilienceError::Application(BackendError("backend down"))
}

/// Three consecutive failures open the breaker; the fourth call is
/// rejected without running.
#[tokio::test(start_paused = true)]
async fn breaker_opens_after_threshold() {
    let breaker = CircuitBreaker::builder()
        .failure_threshold(3)
        .reset_timeout(Duration::from_secs(1))
        .name("orders")
        .build();

    for _ in 0..2 {
        let result: Result<(), _> = breaker.execute(|| async { Err(backend_down()) }).await;
        assert!(result.unwrap_err().is_application());
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    // The third failure still surfaces the backend error, not a breaker
    // error, and trips the circuit.
    let third: Result<(), _> = breaker.execute(|| async { Err(backend_down()) }).await;
    assert_eq!(
        third.unwrap_err().into_application(),
        Some(BackendError("backend down"))
    );
    assert_eq!(breaker.current_state(), CircuitState::Open);
    assert_eq!(breaker.snapshot().failure_count, 3);

    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let fourth: Result<(), ResilienceError<BackendError>> = breaker
        .execute(|| {
            let r = Arc::clone(&r);
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert!(fourth.unwrap_err().is_circuit_open());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

/// After the reset timeout, two successful probes close the circuit
/// again with a clean failure count.
#[tokio::test(start_paused = true)]
async fn breaker_recovers_through_half_open() {
    let breaker = CircuitBreaker::builder()
        .failure_threshold(3)
        .reset_timeout(Duration::from_secs(1))
        .half_open_success_threshold(2)
        .name("orders")
        .build();

    for _ in 0..3 {
        let _: Result<(), _> = breaker.execute(|| async { Err(backend_down()) }).await;
    }
    assert_eq!(breaker.current_state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(1001)).await;

    let first = breaker
        .execute(|| async { Ok::<_, ResilienceError<BackendError>>("ok") })
        .await;
    assert_eq!(first.unwrap(), "ok");
    assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

    let second = breaker
        .execute(|| async { Ok::<_, ResilienceError<BackendError>>("ok") })
        .await;
    assert_eq!(second.unwrap(), "ok");
    assert_eq!(breaker.current_state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().failure_count, 0);
}

/// State transitions are observable in order through a listener.
#[tokio::test(start_paused = true)]
async fn transitions_are_emitted_in_order() {
    let transitions: Arc<parking_lot::Mutex<Vec<(CircuitState, CircuitState)>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let t = Arc::clone(&transitions);

    let breaker = CircuitBreaker::builder()
        .failure_threshold(1)
        .reset_timeout(Duration::from_millis(100))
        .on_state_transition(move |from, to| t.lock().push((from, to)))
        .build();

    let _: Result<(), _> = breaker.execute(|| async { Err(backend_down()) }).await;
    tokio::time::advance(Duration::from_millis(150)).await;
    let _ = breaker
        .execute(|| async { Ok::<_, ResilienceError<BackendError>>(()) })
        .await;

    let transitions = transitions.lock();
    assert_eq!(
        *transitions,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}
