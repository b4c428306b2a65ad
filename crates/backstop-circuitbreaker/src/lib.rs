//! Failure-isolating circuit breaker.
//!
//! A [`CircuitBreaker`] guards an async operation with a three-state gate:
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls are rejected immediately with
//!   [`ResilienceError::CircuitOpen`] until the reset timeout elapses.
//! - **Half-open**: a bounded number of probe calls are admitted; enough
//!   successes close the circuit, any failure reopens it.
//!
//! Admission and state transitions are transactional: the state is read and
//! updated atomically, the protected operation always runs outside the
//! lock, and listeners observe committed transitions only.
//!
//! # Example
//!
//! ```
//! use backstop_circuitbreaker::{CircuitBreaker, CircuitState};
//! use backstop_core::ResilienceError;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::builder()
//!     .failure_threshold(3)
//!     .reset_timeout(Duration::from_secs(30))
//!     .name("payments")
//!     .build();
//!
//! let result = breaker
//!     .execute(|| async { Ok::<_, ResilienceError<&str>>("charged") })
//!     .await;
//! assert_eq!(result.unwrap(), "charged");
//! assert_eq!(breaker.current_state(), CircuitState::Closed);
//! # }
//! ```

mod circuit;
mod config;
mod events;

pub use circuit::{CircuitSnapshot, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use events::CircuitBreakerEvent;

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use backstop_core::{EventListener, ListenerHandle, ResilienceError};

use circuit::{Admission, Circuit};

/// Point-in-time snapshot of a breaker's call counters.
///
/// Counters are monotone between explicit resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitBreakerStatistics {
    /// Calls that were admitted and succeeded.
    pub successful_calls: u64,
    /// Calls that were admitted and failed.
    pub failed_calls: u64,
    /// Calls rejected at admission.
    pub rejected_calls: u64,
}

#[derive(Default)]
struct StatsCell {
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

/// The circuit breaker primitive. Cheap to clone; clones share state.
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    circuit: Arc<Mutex<Circuit>>,
    state_atomic: Arc<AtomicU8>,
    stats: Arc<StatsCell>,
}

impl Clone for CircuitBreaker {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            circuit: Arc::clone(&self.circuit),
            state_atomic: Arc::clone(&self.state_atomic),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Returns a half-open probe slot if the call never reports an outcome,
/// which happens when the caller's future is dropped mid-flight.
struct ProbeGuard {
    circuit: Arc<Mutex<Circuit>>,
    armed: bool,
}

impl ProbeGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.circuit.lock().abandon(true);
        }
    }
}

impl CircuitBreaker {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub(crate) fn from_config(config: CircuitBreakerConfig) -> Self {
        let state_atomic = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
        Self {
            config: Arc::new(config),
            circuit: Arc::new(Mutex::new(Circuit::new_with_atomic(Arc::clone(
                &state_atomic,
            )))),
            state_atomic,
            stats: Arc::new(StatsCell::default()),
        }
    }

    /// Runs `op` if the breaker admits it.
    ///
    /// Rejection fails with [`ResilienceError::CircuitOpen`]. The
    /// operation's own errors propagate unchanged and count as failures;
    /// [`ResilienceError::Cancelled`] counts as neither success nor
    /// failure.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let mut events = Vec::new();
        let admission = {
            let mut circuit = self.circuit.lock();
            circuit.try_acquire(&self.config, self.config.clock.now(), &mut events)
        };
        self.emit(&events);

        let probe = match admission {
            Admission::Rejected => {
                self.stats.rejected_calls.fetch_add(1, Ordering::Relaxed);

                #[cfg(feature = "metrics")]
                metrics::counter!("backstop_circuitbreaker_calls_total", "circuitbreaker" => self.config.name.clone(), "outcome" => "rejected").increment(1);

                return Err(ResilienceError::CircuitOpen {
                    name: self.config.name.clone(),
                });
            }
            Admission::Permitted { probe } => probe,
        };

        let mut guard = ProbeGuard {
            circuit: Arc::clone(&self.circuit),
            armed: probe,
        };

        let result = op().await;
        guard.disarm();

        let mut events = Vec::new();
        match &result {
            Ok(_) => {
                let mut circuit = self.circuit.lock();
                circuit.record_success(&self.config, probe, &mut events);
                self.stats.successful_calls.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) if error.is_cancelled() => {
                self.circuit.lock().abandon(probe);
            }
            Err(_) => {
                let mut circuit = self.circuit.lock();
                circuit.record_failure(&self.config, self.config.clock.now(), probe, &mut events);
                self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.emit(&events);

        #[cfg(feature = "metrics")]
        {
            let outcome = match &result {
                Ok(_) => "success",
                Err(e) if e.is_cancelled() => "cancelled",
                Err(_) => "failure",
            };
            metrics::counter!("backstop_circuitbreaker_calls_total", "circuitbreaker" => self.config.name.clone(), "outcome" => outcome).increment(1);
        }

        result
    }

    /// Runs `op`, falling back to `fallback` only when the breaker itself
    /// rejects admission. Operation errors propagate.
    pub async fn execute_or_fallback<T, E, F, Fut, FB, FbFut>(
        &self,
        fallback: FB,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        match self.execute(op).await {
            Err(ResilienceError::CircuitOpen { .. }) => fallback().await,
            other => other,
        }
    }

    /// Forces the breaker closed and clears all counters.
    pub fn reset(&self) {
        let mut events = Vec::new();
        self.circuit.lock().reset(&self.config, &mut events);
        self.emit(&events);
    }

    /// Forces the breaker open, as if the failure threshold had been hit.
    pub fn trip(&self) {
        let mut events = Vec::new();
        self.circuit
            .lock()
            .force_open(&self.config, self.config.clock.now(), &mut events);
        self.emit(&events);
    }

    /// Returns the current state without taking the state lock.
    pub fn current_state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_atomic.load(Ordering::Acquire))
    }

    /// Returns the state attributes (consecutive failures, probe counts).
    pub fn snapshot(&self) -> CircuitSnapshot {
        self.circuit.lock().snapshot()
    }

    /// Returns a snapshot of the call counters.
    pub fn statistics(&self) -> CircuitBreakerStatistics {
        CircuitBreakerStatistics {
            successful_calls: self.stats.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.stats.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.stats.rejected_calls.load(Ordering::Relaxed),
        }
    }

    /// Resets all call counters to zero.
    pub fn reset_statistics(&self) {
        self.stats.successful_calls.store(0, Ordering::Relaxed);
        self.stats.failed_calls.store(0, Ordering::Relaxed);
        self.stats.rejected_calls.store(0, Ordering::Relaxed);
    }

    /// Registers a listener at runtime; returns a handle for removal.
    pub fn add_listener<L>(&self, listener: L) -> ListenerHandle
    where
        L: EventListener<CircuitBreakerEvent> + 'static,
    {
        self.config.event_listeners.add(listener)
    }

    /// Removes a previously registered listener. Idempotent.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.config.event_listeners.remove(handle)
    }

    /// The instance name used in events and logs.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn emit(&self, events: &[CircuitBreakerEvent]) {
        for event in events {
            self.config.event_listeners.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(&'static str);

    fn app(err: &'static str) -> ResilienceError<TestError> {
        ResilienceError::Application(TestError(err))
    }

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::builder()
            .failure_threshold(threshold)
            .reset_timeout(reset)
            .name("test")
            .build()
    }

    #[tokio::test]
    async fn passes_through_while_closed() {
        let breaker = breaker(3, Duration::from_secs(1));

        let value = breaker
            .execute(|| async { Ok::<_, ResilienceError<TestError>>(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.statistics().successful_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects() {
        let breaker = breaker(3, Duration::from_secs(1));

        for _ in 0..3 {
            let result: Result<(), _> = breaker.execute(|| async { Err(app("down")) }).await;
            assert!(result.unwrap_err().is_application());
        }

        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert_eq!(breaker.snapshot().failure_count, 3);

        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let result: Result<(), ResilienceError<TestError>> = breaker
            .execute(|| {
                let r = Arc::clone(&r);
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(ran.load(Ordering::SeqCst), 0, "op must not run while open");
        assert_eq!(breaker.statistics().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_through_half_open() {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(3)
            .reset_timeout(Duration::from_secs(1))
            .half_open_success_threshold(2)
            .name("recovery")
            .build();

        for _ in 0..3 {
            let _: Result<(), _> = breaker.execute(|| async { Err(app("down")) }).await;
        }
        assert_eq!(breaker.current_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1001)).await;

        let ok = breaker
            .execute(|| async { Ok::<_, ResilienceError<TestError>>("ok") })
            .await
            .unwrap();
        assert_eq!(ok, "ok");
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        let ok = breaker
            .execute(|| async { Ok::<_, ResilienceError<TestError>>("ok") })
            .await
            .unwrap();
        assert_eq!(ok, "ok");
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens() {
        let breaker = breaker(1, Duration::from_secs(1));

        let _: Result<(), _> = breaker.execute(|| async { Err(app("down")) }).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(2)).await;

        let _: Result<(), _> = breaker.execute(|| async { Err(app("still down")) }).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn fallback_catches_only_open_rejections() {
        let breaker = breaker(1, Duration::from_secs(60));

        // Operation error is not caught by the fallback.
        let result: Result<&str, _> = breaker
            .execute_or_fallback(
                || async { Ok("fallback") },
                || async { Err(app("op failed")) },
            )
            .await;
        assert!(result.unwrap_err().is_application());

        // Now open; fallback takes over.
        assert_eq!(breaker.current_state(), CircuitState::Open);
        let result = breaker
            .execute_or_fallback(
                || async { Ok::<_, ResilienceError<TestError>>("fallback") },
                || async { Ok("primary") },
            )
            .await;
        assert_eq!(result.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn reset_after_trip_restores_initial_state() {
        let breaker = breaker(5, Duration::from_secs(1));

        breaker.trip();
        assert_eq!(breaker.current_state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.half_open_successes, 0);
    }

    #[tokio::test]
    async fn cancellation_counts_as_neither() {
        let breaker = breaker(1, Duration::from_secs(1));

        let result: Result<(), _> = breaker
            .execute(|| async { Err(ResilienceError::<TestError>::Cancelled) })
            .await;
        assert!(result.unwrap_err().is_cancelled());

        // One more real failure is still needed to open.
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
        let stats = breaker.statistics();
        assert_eq!(stats.successful_calls, 0);
        assert_eq!(stats.failed_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_returns_its_slot() {
        let breaker = breaker(1, Duration::from_millis(100));

        let _: Result<(), _> = breaker.execute(|| async { Err(app("down")) }).await;
        tokio::time::advance(Duration::from_millis(200)).await;

        // Start a probe and drop it mid-flight.
        {
            let fut = breaker.execute(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ResilienceError<TestError>>(())
            });
            futures::pin_mut!(fut);
            let _ = futures::poll!(fut.as_mut());
            // dropped here
        }

        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        assert_eq!(breaker.snapshot().half_open_in_flight, 0);

        // The freed slot admits the next probe.
        let ok = breaker
            .execute(|| async { Ok::<_, ResilienceError<TestError>>(1) })
            .await;
        assert!(ok.is_ok());
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn listener_errors_do_not_affect_the_breaker() {
        let breaker = CircuitBreaker::builder()
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(1))
            .on_success(|_| panic!("listener bug"))
            .build();

        let result = breaker
            .execute(|| async { Ok::<_, ResilienceError<TestError>>(7) })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.statistics().successful_calls, 1);
    }
}
