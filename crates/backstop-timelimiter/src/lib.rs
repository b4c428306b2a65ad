//! Deadline enforcement with cancellation.
//!
//! A [`TimeLimiter`] races a protected operation against a deadline. If
//! the deadline fires first, the operation's future is dropped (the
//! cooperative cancellation of the async runtime) and the call fails
//! with [`ResilienceError::Timeout`]. Fallback variants substitute
//! `None`, a fixed value, or a fallback computation for the timeout;
//! they never catch the operation's own errors.
//!
//! # Example
//!
//! ```
//! use backstop_timelimiter::TimeLimiter;
//! use backstop_core::ResilienceError;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let limiter = TimeLimiter::builder()
//!     .timeout(Duration::from_millis(250))
//!     .name("profile-lookup")
//!     .build();
//!
//! let result = limiter
//!     .execute(|| async { Ok::<_, ResilienceError<&str>>("profile") })
//!     .await;
//! assert_eq!(result.unwrap(), "profile");
//! # }
//! ```

mod config;
mod events;

pub use config::{TimeLimiterConfig, TimeLimiterConfigBuilder};
pub use events::TimeLimiterEvent;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant as WallInstant};

use futures::stream::{FuturesUnordered, StreamExt};

use backstop_core::{EventListener, ListenerHandle, ResilienceError};

/// Point-in-time snapshot of a time limiter's counters.
///
/// Counters are monotone between explicit resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeLimiterStatistics {
    /// Calls started.
    pub total_calls: u64,
    /// Calls that completed before their deadline.
    pub successful_calls: u64,
    /// Calls that failed before their deadline.
    pub failed_calls: u64,
    /// Calls cancelled by their deadline.
    pub timed_out_calls: u64,
    /// Accumulated deadline time spent on timed-out calls.
    pub total_timeout_duration: Duration,
}

#[derive(Default)]
struct StatsCell {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    timed_out_calls: AtomicU64,
    timeout_micros: AtomicU64,
}

/// The time limiter primitive. Cheap to clone; clones share state.
pub struct TimeLimiter {
    config: Arc<TimeLimiterConfig>,
    stats: Arc<StatsCell>,
}

impl Clone for TimeLimiter {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl TimeLimiter {
    /// Creates a new configuration builder.
    pub fn builder() -> TimeLimiterConfigBuilder {
        TimeLimiterConfigBuilder::new()
    }

    pub(crate) fn from_config(config: TimeLimiterConfig) -> Self {
        Self {
            config: Arc::new(config),
            stats: Arc::new(StatsCell::default()),
        }
    }

    /// Races `op` against the configured deadline.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        self.race(self.config.timeout, op()).await
    }

    /// Races `op` against a per-call deadline override.
    pub async fn execute_with_timeout<T, E, F, Fut>(
        &self,
        timeout: Duration,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        self.race(timeout, op()).await
    }

    /// Like [`TimeLimiter::execute`], but a timeout yields `Ok(None)`
    /// instead of an error. Operation errors still propagate.
    pub async fn execute_or_none<T, E, F, Fut>(
        &self,
        op: F,
    ) -> Result<Option<T>, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        match self.execute(op).await {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.is_timeout() => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Like [`TimeLimiter::execute`], but a timeout runs `fallback` and
    /// returns its result. Operation errors still propagate.
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
            Err(error) if error.is_timeout() => fallback().await,
            other => other,
        }
    }

    /// Like [`TimeLimiter::execute`], but a timeout yields `default`.
    /// Operation errors still propagate.
    pub async fn execute_or_default<T, E, F, Fut>(
        &self,
        default: T,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        match self.execute(op).await {
            Err(error) if error.is_timeout() => Ok(default),
            other => other,
        }
    }

    /// Re-races `op` up to `retries` additional times, but only when the
    /// previous race was lost to the deadline. Success and operation
    /// errors return immediately; if every attempt times out, the last
    /// timeout error is returned.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        retries: usize,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let mut last_timeout = None;
        for _ in 0..=retries {
            match self.race(self.config.timeout, op()).await {
                Err(error) if error.is_timeout() => last_timeout = Some(error),
                other => return other,
            }
        }
        Err(last_timeout.unwrap_or(ResilienceError::Timeout {
            timeout: self.config.timeout,
        }))
    }

    /// Runs every op in parallel, each against its own independent
    /// deadline. The results align positionally with the input; failures
    /// and timeouts appear as `None`.
    pub async fn execute_all<T, E, F, Fut>(&self, ops: Vec<F>) -> Vec<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let races = ops
            .into_iter()
            .map(|op| async move { self.execute(op).await.ok() });
        futures::future::join_all(races).await
    }

    /// Races every op against one shared deadline; the first success
    /// wins and the rest are cancelled.
    ///
    /// When all ops finish without a success before the deadline, the
    /// last error is returned; when the deadline fires first, the call
    /// fails with [`ResilienceError::Timeout`].
    pub async fn execute_race<T, E, F, Fut>(&self, ops: Vec<F>) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let config = &self.config;
        let timeout = config.timeout;
        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
        let start = config.clock.now();

        let mut contenders: FuturesUnordered<Fut> =
            ops.into_iter().map(|op| op()).collect();

        let deadline = config.clock.sleep(timeout);
        futures::pin_mut!(deadline);

        let mut last_error = None;
        loop {
            tokio::select! {
                biased;
                next = contenders.next() => match next {
                    Some(Ok(value)) => {
                        // Remaining contenders are dropped here.
                        self.record_success(start);
                        return Ok(value);
                    }
                    Some(Err(error)) => last_error = Some(error),
                    None => {
                        self.record_failure(start);
                        return Err(last_error.unwrap_or(ResilienceError::Timeout { timeout }));
                    }
                },
                _ = &mut deadline => {
                    self.record_timeout(timeout);
                    return Err(ResilienceError::Timeout { timeout });
                }
            }
        }
    }

    async fn race<T, E, Fut>(&self, timeout: Duration, fut: Fut) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let config = &self.config;
        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
        let start = config.clock.now();

        let sleep = config.clock.sleep(timeout);
        futures::pin_mut!(sleep);
        futures::pin_mut!(fut);

        tokio::select! {
            result = &mut fut => match result {
                Ok(value) => {
                    self.record_success(start);
                    Ok(value)
                }
                Err(error) if error.is_cancelled() => Err(error),
                Err(error) => {
                    self.record_failure(start);
                    Err(error)
                }
            },
            _ = &mut sleep => {
                // The op future is dropped when this arm wins.
                self.record_timeout(timeout);
                Err(ResilienceError::Timeout { timeout })
            }
        }
    }

    fn record_success(&self, start: tokio::time::Instant) {
        let config = &self.config;
        let duration = config.clock.now() - start;
        self.stats.successful_calls.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("backstop_timelimiter_calls_total", "timelimiter" => config.name.clone(), "outcome" => "success").increment(1);
            metrics::histogram!("backstop_timelimiter_call_duration_seconds", "timelimiter" => config.name.clone()).record(duration.as_secs_f64());
        }

        config.event_listeners.emit(&TimeLimiterEvent::Success {
            pattern_name: config.name.clone(),
            timestamp: WallInstant::now(),
            duration,
        });
    }

    fn record_failure(&self, start: tokio::time::Instant) {
        let config = &self.config;
        let duration = config.clock.now() - start;
        self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::counter!("backstop_timelimiter_calls_total", "timelimiter" => config.name.clone(), "outcome" => "failure").increment(1);

        config.event_listeners.emit(&TimeLimiterEvent::Failure {
            pattern_name: config.name.clone(),
            timestamp: WallInstant::now(),
            duration,
        });
    }

    fn record_timeout(&self, timeout: Duration) {
        let config = &self.config;
        self.stats.timed_out_calls.fetch_add(1, Ordering::Relaxed);
        self.stats
            .timeout_micros
            .fetch_add(timeout.as_micros() as u64, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::counter!("backstop_timelimiter_calls_total", "timelimiter" => config.name.clone(), "outcome" => "timeout").increment(1);

        #[cfg(feature = "tracing")]
        tracing::warn!(timelimiter = %config.name, timeout_ms = timeout.as_millis() as u64, "deadline fired, cancelling operation");

        config.event_listeners.emit(&TimeLimiterEvent::Timeout {
            pattern_name: config.name.clone(),
            timestamp: WallInstant::now(),
            timeout_duration: timeout,
        });
    }

    /// Returns a snapshot of the counters.
    pub fn statistics(&self) -> TimeLimiterStatistics {
        TimeLimiterStatistics {
            total_calls: self.stats.total_calls.load(Ordering::Relaxed),
            successful_calls: self.stats.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.stats.failed_calls.load(Ordering::Relaxed),
            timed_out_calls: self.stats.timed_out_calls.load(Ordering::Relaxed),
            total_timeout_duration: Duration::from_micros(
                self.stats.timeout_micros.load(Ordering::Relaxed),
            ),
        }
    }

    /// Resets all counters to zero.
    pub fn reset_statistics(&self) {
        self.stats.total_calls.store(0, Ordering::Relaxed);
        self.stats.successful_calls.store(0, Ordering::Relaxed);
        self.stats.failed_calls.store(0, Ordering::Relaxed);
        self.stats.timed_out_calls.store(0, Ordering::Relaxed);
        self.stats.timeout_micros.store(0, Ordering::Relaxed);
    }

    /// Registers a listener at runtime; returns a handle for removal.
    pub fn add_listener<L>(&self, listener: L) -> ListenerHandle
    where
        L: EventListener<TimeLimiterEvent> + 'static,
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
}
