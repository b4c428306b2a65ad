//! Error-driven retry engine.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backstop_core::clock::{default_clock, Clock};
use backstop_core::{EventListeners, FnListener, ListenerHandle, ResilienceError};

use crate::events::RetryEvent;
use crate::schedule::{Decision, Schedule};
use crate::stats::{RetryStatistics, StatsCell};

type ErrorPredicate<E> = Arc<dyn Fn(&ResilienceError<E>) -> bool + Send + Sync>;

/// One attempt within a retried call, as recorded by
/// [`Retry::execute_with_history`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: usize,
    /// Whether the attempt succeeded.
    pub succeeded: bool,
    /// Delay that was scheduled after this attempt, if the loop continued.
    pub delay_before_next: Option<Duration>,
}

/// The full outcome of a retried call: result, per-attempt records, and
/// the wall-clock duration of the whole loop including backoff sleeps.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final result of the loop.
    pub result: Result<T, ResilienceError<E>>,
    /// One record per attempt, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Total loop duration.
    pub total_duration: Duration,
}

struct RetryConfig<E> {
    schedule: Schedule<ResilienceError<E>>,
    predicate: Option<ErrorPredicate<E>>,
    event_listeners: EventListeners<RetryEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

/// Schedule-driven retry engine.
///
/// Re-invokes an async operation per its [`Schedule`] while the operation
/// keeps failing. Cancellation aborts the loop immediately; errors rejected
/// by the retry predicate propagate unchanged.
///
/// # Examples
///
/// ```
/// use backstop_retry::{Retry, Schedule};
/// use backstop_core::ResilienceError;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), ResilienceError<&'static str>> {
/// let retry: Retry<&str> = Retry::builder()
///     .retries(3)
///     .exponential_backoff(Duration::from_millis(100))
///     .jitter(0.1)
///     .name("fetch-profile")
///     .build();
///
/// let value = retry
///     .execute(|| async { Ok::<_, ResilienceError<&str>>("profile") })
///     .await?;
/// assert_eq!(value, "profile");
/// # Ok(())
/// # }
/// ```
pub struct Retry<E> {
    config: Arc<RetryConfig<E>>,
    stats: Arc<StatsCell>,
}

impl<E> Clone for Retry<E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
        }
    }
}

enum FailureKind {
    Exhausted,
    Rejected,
    Cancelled,
}

impl<E> Retry<E> {
    /// Creates a new configuration builder.
    pub fn builder() -> RetryBuilder<E> {
        RetryBuilder::new()
    }

    /// Runs `op`, re-invoking it per the schedule while it fails.
    ///
    /// The last error is returned unchanged once the schedule stops.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let predicate = self.config.predicate.clone();
        self.run(op, predicate, false).await.0
    }

    /// Like [`Retry::execute`], but only errors accepted by `predicate`
    /// are retried; everything else propagates unchanged without
    /// consuming a schedule decision.
    pub async fn execute_if<T, F, Fut, P>(
        &self,
        predicate: P,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        P: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        self.run(op, Some(Arc::new(predicate) as ErrorPredicate<E>), false)
            .await
            .0
    }

    /// Like [`Retry::execute`], but returns `default` once the schedule is
    /// exhausted. Cancellation and predicate-rejected errors still
    /// propagate.
    pub async fn execute_or_default<T, F, Fut>(
        &self,
        default: T,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let predicate = self.config.predicate.clone();
        let (result, kind) = self.run(op, predicate, false).await;
        match (result, kind) {
            (Ok(v), _) => Ok(v),
            (Err(_), Some(FailureKind::Exhausted)) => Ok(default),
            (Err(e), _) => Err(e),
        }
    }

    /// Runs `op` and returns the result together with per-attempt records
    /// and the total duration of the loop.
    pub async fn execute_with_history<T, F, Fut>(&self, op: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let predicate = self.config.predicate.clone();
        let start = self.config.clock.now();
        let (result, history, _) = self.run_collect(op, predicate, true).await;
        RetryOutcome {
            result,
            attempts: history,
            total_duration: self.config.clock.now() - start,
        }
    }

    async fn run<T, F, Fut>(
        &self,
        op: F,
        predicate: Option<ErrorPredicate<E>>,
        collect: bool,
    ) -> (Result<T, ResilienceError<E>>, Option<FailureKind>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let (result, _, kind) = self.run_collect(op, predicate, collect).await;
        (result, kind)
    }

    async fn run_collect<T, F, Fut>(
        &self,
        mut op: F,
        predicate: Option<ErrorPredicate<E>>,
        collect: bool,
    ) -> (
        Result<T, ResilienceError<E>>,
        Vec<AttemptRecord>,
        Option<FailureKind>,
    )
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let config = &self.config;
        self.stats.record_call_started();

        let mut history = Vec::new();
        let mut attempt: usize = 0;

        loop {
            self.stats.record_attempt();
            let result = op().await;

            match result {
                Ok(value) => {
                    if collect {
                        history.push(AttemptRecord {
                            attempt: attempt + 1,
                            succeeded: true,
                            delay_before_next: None,
                        });
                    }
                    self.stats.record_success();

                    #[cfg(feature = "metrics")]
                    metrics::counter!("backstop_retry_calls_total", "retry" => config.name.clone(), "result" => "success").increment(1);

                    #[cfg(feature = "tracing")]
                    if attempt > 0 {
                        tracing::info!(retry = %config.name, attempts = attempt + 1, "succeeded after retries");
                    }

                    config.event_listeners.emit(&RetryEvent::Success {
                        pattern_name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempts: attempt + 1,
                    });
                    return (Ok(value), history, None);
                }
                Err(error) => {
                    if error.is_cancelled() {
                        // Abort immediately; the partial attempt is already
                        // counted above.
                        if collect {
                            history.push(AttemptRecord {
                                attempt: attempt + 1,
                                succeeded: false,
                                delay_before_next: None,
                            });
                        }
                        self.stats.record_failure();
                        return (Err(error), history, Some(FailureKind::Cancelled));
                    }

                    if let Some(pred) = &predicate {
                        if !pred(&error) {
                            if collect {
                                history.push(AttemptRecord {
                                    attempt: attempt + 1,
                                    succeeded: false,
                                    delay_before_next: None,
                                });
                            }
                            self.stats.record_failure();

                            #[cfg(feature = "tracing")]
                            tracing::debug!(retry = %config.name, "error not retryable, failing immediately");

                            config.event_listeners.emit(&RetryEvent::IgnoredError {
                                pattern_name: config.name.clone(),
                                timestamp: Instant::now(),
                            });
                            return (Err(error), history, Some(FailureKind::Rejected));
                        }
                    }

                    match config.schedule.decide(attempt, &error) {
                        Decision::Done => {
                            if collect {
                                history.push(AttemptRecord {
                                    attempt: attempt + 1,
                                    succeeded: false,
                                    delay_before_next: None,
                                });
                            }
                            self.stats.record_failure();

                            #[cfg(feature = "metrics")]
                            metrics::counter!("backstop_retry_calls_total", "retry" => config.name.clone(), "result" => "exhausted").increment(1);

                            #[cfg(feature = "tracing")]
                            tracing::warn!(retry = %config.name, attempts = attempt + 1, "retry attempts exhausted");

                            config.event_listeners.emit(&RetryEvent::Exhausted {
                                pattern_name: config.name.clone(),
                                timestamp: Instant::now(),
                                attempts: attempt + 1,
                            });
                            return (Err(error), history, Some(FailureKind::Exhausted));
                        }
                        Decision::Continue { delay } => {
                            if collect {
                                history.push(AttemptRecord {
                                    attempt: attempt + 1,
                                    succeeded: false,
                                    delay_before_next: Some(delay),
                                });
                            }
                            self.stats.record_retry();

                            #[cfg(feature = "tracing")]
                            tracing::debug!(retry = %config.name, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "retrying after delay");

                            config.event_listeners.emit(&RetryEvent::RetryScheduled {
                                pattern_name: config.name.clone(),
                                timestamp: Instant::now(),
                                attempt: attempt + 1,
                                delay,
                            });

                            config.clock.sleep(delay).await;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }

    /// Returns a snapshot of the engine's counters.
    pub fn statistics(&self) -> RetryStatistics {
        self.stats.snapshot()
    }

    /// Resets all counters to zero.
    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Registers a listener at runtime; returns a handle for removal.
    pub fn add_listener<L>(&self, listener: L) -> ListenerHandle
    where
        L: backstop_core::EventListener<RetryEvent> + 'static,
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

enum BackoffChoice {
    Exponential { base: Duration, factor: f64 },
    Fibonacci { base: Duration },
    Fixed { delay: Duration },
}

/// Builder for [`Retry`].
pub struct RetryBuilder<E> {
    retries: usize,
    backoff: BackoffChoice,
    max_delay: Option<Duration>,
    jitter: Option<f64>,
    schedule: Option<Schedule<ResilienceError<E>>>,
    predicate: Option<ErrorPredicate<E>>,
    event_listeners: EventListeners<RetryEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

impl<E> RetryBuilder<E> {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - retries: 2 (three attempts total)
    /// - backoff: exponential from 100ms, factor 2.0
    /// - jitter: none
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            retries: 2,
            backoff: BackoffChoice::Exponential {
                base: Duration::from_millis(100),
                factor: 2.0,
            },
            max_delay: None,
            jitter: None,
            schedule: None,
            predicate: None,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
            clock: default_clock(),
        }
    }

    /// Number of re-attempts after the first. `retries(0)` means exactly
    /// one attempt.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Exponential backoff from `base`, doubling per attempt.
    pub fn exponential_backoff(mut self, base: Duration) -> Self {
        self.backoff = BackoffChoice::Exponential { base, factor: 2.0 };
        self
    }

    /// Exponential backoff with a custom factor.
    pub fn exponential_backoff_with_factor(mut self, base: Duration, factor: f64) -> Self {
        self.backoff = BackoffChoice::Exponential { base, factor };
        self
    }

    /// Fibonacci backoff from `base`.
    pub fn fibonacci_backoff(mut self, base: Duration) -> Self {
        self.backoff = BackoffChoice::Fibonacci { base };
        self
    }

    /// Constant delay between attempts.
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.backoff = BackoffChoice::Fixed { delay };
        self
    }

    /// Caps the computed backoff delay. Applied before jitter.
    pub fn max_delay(mut self, cap: Duration) -> Self {
        self.max_delay = Some(cap);
        self
    }

    /// Applies jitter with the given factor to every delay.
    pub fn jitter(mut self, factor: f64) -> Self {
        self.jitter = Some(factor);
        self
    }

    /// Replaces the composed backoff/retries settings with an explicit
    /// schedule. Jitter and caps set on the builder still apply on top.
    pub fn schedule(mut self, schedule: Schedule<ResilienceError<E>>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Default retry predicate: errors it rejects propagate unchanged.
    pub fn retry_on<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Give this engine a human-readable name for observability.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the clock. Intended for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a callback for scheduled retries.
    pub fn on_retry<F>(self, f: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RetryEvent| {
                if let RetryEvent::RetryScheduled { attempt, delay, .. } = event {
                    f(*attempt, *delay);
                }
            }));
        self
    }

    /// Register a callback for successful completion.
    pub fn on_success<F>(self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RetryEvent| {
                if let RetryEvent::Success { attempts, .. } = event {
                    f(*attempts);
                }
            }));
        self
    }

    /// Register a callback for schedule exhaustion.
    pub fn on_exhausted<F>(self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RetryEvent| {
                if let RetryEvent::Exhausted { attempts, .. } = event {
                    f(*attempts);
                }
            }));
        self
    }

    /// Builds the engine.
    pub fn build(self) -> Retry<E> {
        let delay_schedule = match self.backoff {
            BackoffChoice::Exponential { base, factor } => {
                Schedule::exponential_with_factor(base, factor)
            }
            BackoffChoice::Fibonacci { base } => Schedule::fibonacci(base),
            BackoffChoice::Fixed { delay } => Schedule::spaced(delay),
        };

        let mut schedule = match self.schedule {
            Some(explicit) => explicit,
            None => delay_schedule.and(Schedule::recurs(self.retries)),
        };
        if let Some(cap) = self.max_delay {
            schedule = schedule.max_delay(cap);
        }
        if let Some(factor) = self.jitter {
            schedule = schedule.jittered(factor);
        }

        Retry {
            config: Arc::new(RetryConfig {
                schedule,
                predicate: self.predicate,
                event_listeners: self.event_listeners,
                name: self.name,
                clock: self.clock,
            }),
            stats: Arc::new(StatsCell::default()),
        }
    }
}

impl<E> Default for RetryBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
