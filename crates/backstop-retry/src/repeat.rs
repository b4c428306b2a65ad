//! Value-driven repeat engine.
//!
//! Where [`crate::Retry`] re-invokes an operation while it *fails*, a
//! [`Repeat`] re-invokes it while it *succeeds*, driving its schedule with
//! the successful values. Errors abort the loop immediately and propagate
//! unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backstop_core::clock::{default_clock, Clock};
use backstop_core::{EventListeners, ListenerHandle, ResilienceError};

use crate::events::RetryEvent;
use crate::schedule::{Decision, Schedule};
use crate::stats::{RetryStatistics, StatsCell};

struct RepeatConfig<T> {
    schedule: Schedule<T>,
    overall_timeout: Option<Duration>,
    event_listeners: EventListeners<RetryEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

/// Schedule-driven repeat engine over values of type `T`.
///
/// # Examples
///
/// ```
/// use backstop_retry::{Repeat, Schedule};
/// use backstop_core::ResilienceError;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), ResilienceError<&'static str>> {
/// // Poll five times, 100ms apart, collecting each reading.
/// let repeat: Repeat<u64> = Repeat::builder()
///     .schedule(Schedule::spaced(Duration::from_millis(100)).and(Schedule::recurs(4)))
///     .name("poll-queue-depth")
///     .build();
///
/// let depths = repeat
///     .execute_collect(|| async { Ok::<_, ResilienceError<&str>>(7) })
///     .await?;
/// assert_eq!(depths.len(), 5);
/// # Ok(())
/// # }
/// ```
pub struct Repeat<T> {
    config: Arc<RepeatConfig<T>>,
    stats: Arc<StatsCell>,
}

impl<T> Clone for Repeat<T> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> Repeat<T> {
    /// Creates a new configuration builder.
    pub fn builder() -> RepeatBuilder<T> {
        RepeatBuilder::new()
    }

    /// Runs `op` repeatedly per the schedule and returns the last value.
    pub async fn execute<E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        self.drive(op, None).await
    }

    /// Runs `op` repeatedly, collecting every value the schedule admits.
    pub async fn execute_collect<E, F, Fut>(&self, op: F) -> Result<Vec<T>, ResilienceError<E>>
    where
        T: Clone,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let mut collected = Vec::new();
        self.drive(op, Some(&mut |value: &T| collected.push(value.clone())))
            .await?;
        Ok(collected)
    }

    /// Runs `op` up to `max_attempts` times, returning the first value that
    /// satisfies `predicate`.
    ///
    /// Fails with [`ResilienceError::ConditionNotMet`] when no attempt
    /// produced a satisfying value. Delays between attempts come from the
    /// configured schedule; its continue/stop decisions are overridden by
    /// the attempt cap.
    pub async fn execute_until<E, F, Fut, P>(
        &self,
        max_attempts: usize,
        predicate: P,
        mut op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        P: Fn(&T) -> bool,
    {
        assert!(max_attempts > 0, "max_attempts must be > 0");
        let config = &self.config;
        self.stats.record_call_started();

        for attempt in 0..max_attempts {
            self.stats.record_attempt();
            let value = match op().await {
                Ok(value) => value,
                Err(error) => {
                    self.stats.record_failure();
                    return Err(error);
                }
            };

            if predicate(&value) {
                self.stats.record_success();
                config.event_listeners.emit(&RetryEvent::Success {
                    pattern_name: config.name.clone(),
                    timestamp: Instant::now(),
                    attempts: attempt + 1,
                });
                return Ok(value);
            }

            if attempt + 1 < max_attempts {
                let delay = config
                    .schedule
                    .decide(attempt, &value)
                    .delay()
                    .unwrap_or(Duration::ZERO);
                self.stats.record_retry();
                config.event_listeners.emit(&RetryEvent::RetryScheduled {
                    pattern_name: config.name.clone(),
                    timestamp: Instant::now(),
                    attempt: attempt + 1,
                    delay,
                });
                config.clock.sleep(delay).await;
            }
        }

        self.stats.record_failure();
        config.event_listeners.emit(&RetryEvent::Exhausted {
            pattern_name: config.name.clone(),
            timestamp: Instant::now(),
            attempts: max_attempts,
        });
        Err(ResilienceError::ConditionNotMet {
            attempts: max_attempts,
        })
    }

    /// Runs `op` up to `max_attempts` times, collecting values while
    /// `predicate` accepts them.
    ///
    /// The first value the predicate rejects is not included and stops the
    /// loop, so the collection is empty only when the first value is
    /// rejected.
    pub async fn execute_while<E, F, Fut, P>(
        &self,
        max_attempts: usize,
        predicate: P,
        mut op: F,
    ) -> Result<Vec<T>, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
        P: Fn(&T) -> bool,
    {
        assert!(max_attempts > 0, "max_attempts must be > 0");
        let config = &self.config;
        self.stats.record_call_started();
        let mut collected = Vec::new();

        for attempt in 0..max_attempts {
            self.stats.record_attempt();
            let value = match op().await {
                Ok(value) => value,
                Err(error) => {
                    self.stats.record_failure();
                    return Err(error);
                }
            };

            if !predicate(&value) {
                break;
            }

            let delay = (attempt + 1 < max_attempts).then(|| {
                config
                    .schedule
                    .decide(attempt, &value)
                    .delay()
                    .unwrap_or(Duration::ZERO)
            });
            collected.push(value);

            if let Some(delay) = delay {
                self.stats.record_retry();
                config.clock.sleep(delay).await;
            }
        }

        self.stats.record_success();
        config.event_listeners.emit(&RetryEvent::Success {
            pattern_name: config.name.clone(),
            timestamp: Instant::now(),
            attempts: collected.len().max(1),
        });
        Ok(collected)
    }

    async fn drive<E, F, Fut>(
        &self,
        mut op: F,
        mut sink: Option<&mut dyn FnMut(&T)>,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let config = &self.config;
        self.stats.record_call_started();

        let deadline = config
            .overall_timeout
            .map(|timeout| (config.clock.now() + timeout, timeout));
        let mut attempt: usize = 0;

        loop {
            if let Some((deadline, timeout)) = deadline {
                if config.clock.now() >= deadline {
                    self.stats.record_failure();
                    return Err(ResilienceError::Timeout { timeout });
                }
            }

            self.stats.record_attempt();
            let value = match op().await {
                Ok(value) => value,
                Err(error) => {
                    self.stats.record_failure();
                    if !error.is_cancelled() {
                        config.event_listeners.emit(&RetryEvent::Exhausted {
                            pattern_name: config.name.clone(),
                            timestamp: Instant::now(),
                            attempts: attempt + 1,
                        });
                    }
                    return Err(error);
                }
            };

            if let Some(sink) = sink.as_deref_mut() {
                sink(&value);
            }

            match config.schedule.decide(attempt, &value) {
                Decision::Done => {
                    self.stats.record_success();
                    config.event_listeners.emit(&RetryEvent::Success {
                        pattern_name: config.name.clone(),
                        timestamp: Instant::now(),
                        attempts: attempt + 1,
                    });
                    return Ok(value);
                }
                Decision::Continue { delay } => {
                    self.stats.record_retry();
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
}

/// Builder for [`Repeat`].
pub struct RepeatBuilder<T> {
    schedule: Option<Schedule<T>>,
    overall_timeout: Option<Duration>,
    event_listeners: EventListeners<RetryEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

impl<T> RepeatBuilder<T> {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - schedule: one repetition, immediately (`recurs(1)`)
    /// - overall timeout: none
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            schedule: None,
            overall_timeout: None,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
            clock: default_clock(),
        }
    }

    /// Sets the repeat schedule.
    pub fn schedule(mut self, schedule: Schedule<T>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Repeat `n` further times with a fixed delay between runs.
    pub fn fixed(mut self, n: usize, delay: Duration) -> Self {
        self.schedule = Some(Schedule::spaced(delay).and(Schedule::recurs(n)));
        self
    }

    /// Repeat `n` further times with exponential spacing from `base`.
    pub fn exponential(mut self, n: usize, base: Duration) -> Self {
        self.schedule = Some(Schedule::exponential(base).and(Schedule::recurs(n)));
        self
    }

    /// Bounds the whole repeat loop; when exceeded the loop fails with a
    /// timeout error before starting another attempt.
    pub fn overall_timeout(mut self, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "overall_timeout must be > 0");
        self.overall_timeout = Some(timeout);
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

    /// Builds the engine.
    pub fn build(self) -> Repeat<T> {
        Repeat {
            config: Arc::new(RepeatConfig {
                schedule: self.schedule.unwrap_or_else(|| Schedule::recurs(1)),
                overall_timeout: self.overall_timeout,
                event_listeners: self.event_listeners,
                name: self.name,
                clock: self.clock,
            }),
            stats: Arc::new(StatsCell::default()),
        }
    }
}

impl<T> Default for RepeatBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct TestError(&'static str);

    #[tokio::test(start_paused = true)]
    async fn execute_returns_the_last_value() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let repeat: Repeat<usize> = Repeat::builder()
            .fixed(3, Duration::from_millis(5))
            .build();

        let last = repeat
            .execute(|| {
                let c = Arc::clone(&c);
                async move { Ok::<_, ResilienceError<TestError>>(c.fetch_add(1, Ordering::SeqCst)) }
            })
            .await
            .unwrap();

        // Four runs total (initial + three repeats); values 0..=3.
        assert_eq!(last, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_gathers_every_value() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let repeat: Repeat<usize> = Repeat::builder()
            .fixed(2, Duration::from_millis(1))
            .build();

        let values = repeat
            .execute_collect(|| {
                let c = Arc::clone(&c);
                async move { Ok::<_, ResilienceError<TestError>>(c.fetch_add(1, Ordering::SeqCst)) }
            })
            .await
            .unwrap();

        assert_eq!(values, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn until_returns_first_satisfying_value() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let repeat: Repeat<usize> = Repeat::builder().build();

        let value = repeat
            .execute_until(10, |v| *v >= 3, || {
                let c = Arc::clone(&c);
                async move { Ok::<_, ResilienceError<TestError>>(c.fetch_add(1, Ordering::SeqCst)) }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn until_fails_with_condition_not_met() {
        let repeat: Repeat<usize> = Repeat::builder().build();

        let result = repeat
            .execute_until(3, |v| *v > 100, || async {
                Ok::<_, ResilienceError<TestError>>(1)
            })
            .await;

        match result {
            Err(ResilienceError::ConditionNotMet { attempts }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn while_collects_until_rejection() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let repeat: Repeat<usize> = Repeat::builder().build();

        let values = repeat
            .execute_while(10, |v| *v < 3, || {
                let c = Arc::clone(&c);
                async move { Ok::<_, ResilienceError<TestError>>(c.fetch_add(1, Ordering::SeqCst)) }
            })
            .await
            .unwrap();

        // 3 is produced, rejected, and not included.
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn while_may_return_empty_only_on_first_rejection() {
        let repeat: Repeat<usize> = Repeat::builder().build();

        let values = repeat
            .execute_while(5, |_| false, || async {
                Ok::<_, ResilienceError<TestError>>(42)
            })
            .await
            .unwrap();

        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn errors_abort_the_loop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let repeat: Repeat<usize> = Repeat::builder().fixed(5, Duration::ZERO).build();

        let result = repeat
            .execute(|| {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 2 {
                        Err(ResilienceError::Application(TestError("boom")))
                    } else {
                        Ok(0)
                    }
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn overall_timeout_bounds_the_loop() {
        let repeat: Repeat<usize> = Repeat::builder()
            .fixed(1_000, Duration::from_millis(10))
            .overall_timeout(Duration::from_millis(95))
            .build();

        let result = repeat
            .execute(|| async { Ok::<_, ResilienceError<TestError>>(0) })
            .await;

        assert!(result.unwrap_err().is_timeout());
    }
}
