//! Composable resilience primitives for async call chains.
//!
//! `backstop` guards a protected async operation against overload,
//! failure, and latency. Each primitive is an independently usable value
//! exposing an `execute(op)` combinator over a thunk returning
//! `Result<T, ResilienceError<E>>`:
//!
//! | Primitive | Guards against | Rejection error |
//! |---|---|---|
//! | [`Retry`] / [`Repeat`] | transient failures | last error, unchanged |
//! | [`CircuitBreaker`] | cascading failures | [`ResilienceError::CircuitOpen`] |
//! | [`Bulkhead`] | concurrency overload | [`ResilienceError::BulkheadFull`] |
//! | [`TokenBucket`] / [`SlidingWindow`] | request floods | [`ResilienceError::RateLimitExceeded`] |
//! | [`TimeLimiter`] | latency | [`ResilienceError::Timeout`] |
//! | [`Cache`] / [`LoadingCache`] | repeated work | none |
//! | [`Saga`] | partial multi-step work | [`ResilienceError::SagaStepFailed`] |
//!
//! # Composing primitives
//!
//! Primitives nest by wrapping one `execute` in another; the shared
//! error type means no conversion glue:
//!
//! ```
//! use backstop::{Bulkhead, CircuitBreaker, ResilienceError, Retry};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let retry: Retry<std::io::Error> = Retry::builder()
//!     .retries(3)
//!     .exponential_backoff(Duration::from_millis(50))
//!     .jitter(0.1)
//!     .build();
//! let breaker = CircuitBreaker::builder().failure_threshold(5).build();
//! let bulkhead = Bulkhead::builder().max_concurrent_calls(16).build();
//!
//! let result = retry
//!     .execute(|| {
//!         let breaker = breaker.clone();
//!         let bulkhead = bulkhead.clone();
//!         async move {
//!             breaker
//!                 .execute(|| bulkhead.execute(|| async { Ok("payload") }))
//!                 .await
//!         }
//!     })
//!     .await;
//! # let _ = result;
//! # }
//! ```
//!
//! # Named instances
//!
//! [`Registry`] collections map names to shared instances, so separately
//! wired call sites agree on one breaker per dependency:
//!
//! ```
//! use backstop::{registries, CircuitBreaker};
//!
//! let breakers = registries::CircuitBreakerRegistry::new();
//! let payments = breakers.get_or_create("payments", || {
//!     CircuitBreaker::builder().failure_threshold(3).name("payments").build()
//! });
//! # let _ = payments;
//! ```
//!
//! # Observability
//!
//! Every primitive emits typed events to registered listeners, outside
//! its critical sections. The optional `tracing` and `metrics` cargo
//! features add structured logs and counters throughout.

pub use backstop_core::clock::{self, Clock, TokioClock};
pub use backstop_core::{
    EventListener, EventListeners, FnListener, ListenerHandle, Registry, ResilienceError,
    ResilienceEvent,
};

pub use backstop_bulkhead::{Bulkhead, BulkheadConfigBuilder, BulkheadEvent, BulkheadStatistics};
pub use backstop_cache::{
    Cache, CacheBuilder, CacheEvent, CacheStatistics, EvictionReason, EvictionStrategy,
    LoadingCache,
};
pub use backstop_circuitbreaker::{
    CircuitBreaker, CircuitBreakerConfigBuilder, CircuitBreakerEvent, CircuitBreakerStatistics,
    CircuitSnapshot, CircuitState,
};
pub use backstop_ratelimiter::{
    RateLimiterEvent, RateLimiterStatistics, SlidingWindow, SlidingWindowBuilder, TokenBucket,
    TokenBucketBuilder,
};
pub use backstop_retry::{
    AttemptRecord, Decision, Repeat, RepeatBuilder, Retry, RetryBuilder, RetryEvent, RetryOutcome,
    RetryStatistics, Schedule, DEFAULT_JITTER_FACTOR,
};
pub use backstop_saga::{
    run_all, CompensationError, CompensationErrorKind, ExecutedStep, Saga, SagaBatchReport,
    SagaBuilder, SagaEvent, SagaResult, SagaStatistics,
};
pub use backstop_timelimiter::{
    TimeLimiter, TimeLimiterConfigBuilder, TimeLimiterEvent, TimeLimiterStatistics,
};

/// Named-instance registries, one alias per primitive.
pub mod registries {
    use backstop_core::Registry;

    /// Registry of named circuit breakers.
    pub type CircuitBreakerRegistry = Registry<crate::CircuitBreaker>;
    /// Registry of named bulkheads.
    pub type BulkheadRegistry = Registry<crate::Bulkhead>;
    /// Registry of named token buckets.
    pub type TokenBucketRegistry = Registry<crate::TokenBucket>;
    /// Registry of named sliding windows.
    pub type SlidingWindowRegistry = Registry<crate::SlidingWindow>;
    /// Registry of named time limiters.
    pub type TimeLimiterRegistry = Registry<crate::TimeLimiter>;
    /// Registry of named retry engines over error type `E`.
    pub type RetryRegistry<E> = Registry<crate::Retry<E>>;
    /// Registry of named caches.
    pub type CacheRegistry<K, V> = Registry<crate::Cache<K, V>>;
    /// Registry of named sagas.
    pub type SagaRegistry<T, E> = Registry<crate::Saga<T, E>>;
}
