//! The saga engine: forward execution, reverse compensation.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant as WallInstant};

use futures::future::BoxFuture;

use backstop_core::clock::{default_clock, Clock};
use backstop_core::{EventListener, EventListeners, ListenerHandle, ResilienceError};
use backstop_retry::Retry;
use backstop_timelimiter::TimeLimiter;

use crate::events::SagaEvent;

type ErasedResult = Box<dyn Any + Send>;
type CompThunk<E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ResilienceError<E>>> + Send>;
type CompFn<R, E> = Arc<dyn Fn(R) -> BoxFuture<'static, Result<(), ResilienceError<E>>> + Send + Sync>;

struct StepOutcome<E> {
    result: ErasedResult,
    compensation: Option<CompThunk<E>>,
}

type RunFn<E> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<StepOutcome<E>, ResilienceError<E>>> + Send + Sync>;

struct SagaStep<E> {
    name: String,
    run: RunFn<E>,
}

/// A forward step that completed, as recorded in a [`SagaResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStep {
    /// Forward index of the step.
    pub index: usize,
    /// Step name.
    pub name: String,
    /// How long the forward action ran.
    pub duration: Duration,
}

/// Why a recorded compensation did not complete.
#[derive(Debug)]
pub enum CompensationErrorKind<E> {
    /// The compensation ran and failed.
    Failed(ResilienceError<E>),
    /// The compensation was abandoned because the compensation deadline
    /// expired before it could complete.
    Abandoned,
}

/// A compensation that failed or was abandoned.
#[derive(Debug)]
pub struct CompensationError<E> {
    /// Name of the step whose compensation did not complete.
    pub step: String,
    /// What happened.
    pub kind: CompensationErrorKind<E>,
}

impl<E> CompensationError<E> {
    /// True when this compensation was abandoned by the deadline.
    pub fn is_abandoned(&self) -> bool {
        matches!(self.kind, CompensationErrorKind::Abandoned)
    }
}

/// The outcome of a saga run.
#[derive(Debug)]
pub enum SagaResult<T, E> {
    /// Every step completed; `result` is the final step's value.
    Success {
        /// The final step's value.
        result: T,
        /// The steps that ran, in forward order.
        executed_steps: Vec<ExecutedStep>,
        /// Total run duration.
        duration: Duration,
    },
    /// A step failed and the executed prefix was compensated in reverse.
    Failure {
        /// The step failure, wrapped as
        /// [`ResilienceError::SagaStepFailed`].
        error: ResilienceError<E>,
        /// The steps that completed before the failure, in forward order.
        executed_steps: Vec<ExecutedStep>,
        /// How many compensations ran successfully.
        compensated_steps: usize,
        /// Compensations that failed or were abandoned; never raised.
        compensation_errors: Vec<CompensationError<E>>,
        /// Total run duration, compensation included.
        duration: Duration,
    },
}

impl<T, E> SagaResult<T, E> {
    /// True for [`SagaResult::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, SagaResult::Success { .. })
    }

    /// Consumes the result, returning the success value if there is one.
    pub fn success(self) -> Option<T> {
        match self {
            SagaResult::Success { result, .. } => Some(result),
            SagaResult::Failure { .. } => None,
        }
    }
}

/// Point-in-time snapshot of a saga's counters.
///
/// Counters are monotone between explicit resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SagaStatistics {
    /// Saga runs started.
    pub total_executions: u64,
    /// Runs that completed every step.
    pub successful: u64,
    /// Runs that failed and compensated.
    pub failed: u64,
    /// Compensations that ran successfully, across all runs.
    pub steps_compensated: u64,
    /// Compensations that failed or were abandoned, across all runs.
    pub compensation_failures: u64,
}

#[derive(Default)]
struct StatsCell {
    total_executions: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    steps_compensated: AtomicU64,
    compensation_failures: AtomicU64,
}

struct SagaConfig {
    continue_on_compensation_failure: bool,
    compensation_timeout: Option<Duration>,
    event_listeners: EventListeners<SagaEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

/// A forward/compensate transactional sequencer.
///
/// Steps execute in declaration order. When one fails, the successful
/// prefix is compensated in exact reverse order, each compensation
/// receiving the value its forward action produced. `T` is the success
/// type of the final step.
///
/// Cheap to clone; clones share statistics and listeners, and a saga can
/// be executed any number of times.
///
/// # Example
///
/// ```
/// use backstop_saga::Saga;
/// use backstop_core::ResilienceError;
///
/// # async fn example() {
/// let saga: Saga<String, &str> = Saga::builder()
///     .name("place-order")
///     .step(
///         "reserve-stock",
///         || async { Ok::<_, ResilienceError<&str>>(3_u32) },
///         |units| async move {
///             // release the reservation
///             let _ = units;
///             Ok(())
///         },
///     )
///     .step_uncompensated("confirm", || async {
///         Ok::<_, ResilienceError<&str>>("order-42".to_string())
///     })
///     .build();
///
/// let outcome = saga.execute().await;
/// assert!(outcome.is_success());
/// # }
/// ```
pub struct Saga<T, E> {
    config: Arc<SagaConfig>,
    steps: Arc<Vec<SagaStep<E>>>,
    stats: Arc<StatsCell>,
    _result: std::marker::PhantomData<fn() -> T>,
}

impl<T, E> Clone for Saga<T, E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            steps: Arc::clone(&self.steps),
            stats: Arc::clone(&self.stats),
            _result: std::marker::PhantomData,
        }
    }
}

impl<T, E> Saga<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates a new saga builder.
    pub fn builder() -> SagaBuilder<T, E> {
        SagaBuilder::new()
    }

    /// Runs the saga forward, compensating on failure.
    pub async fn execute(&self) -> SagaResult<T, E> {
        let config = &self.config;
        self.stats.total_executions.fetch_add(1, Ordering::Relaxed);
        let start = config.clock.now();

        let mut executed_steps = Vec::new();
        let mut compensations: Vec<(String, CompThunk<E>)> = Vec::new();
        let mut final_result: Option<ErasedResult> = None;

        for (index, step) in self.steps.iter().enumerate() {
            let step_start = config.clock.now();
            match (step.run)().await {
                Ok(outcome) => {
                    executed_steps.push(ExecutedStep {
                        index,
                        name: step.name.clone(),
                        duration: config.clock.now() - step_start,
                    });
                    if let Some(thunk) = outcome.compensation {
                        compensations.push((step.name.clone(), thunk));
                    }
                    final_result = Some(outcome.result);

                    config.event_listeners.emit(&SagaEvent::StepCompleted {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        step: step.name.clone(),
                        index,
                    });
                }
                Err(cause) => {
                    config.event_listeners.emit(&SagaEvent::StepFailed {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        step: step.name.clone(),
                        index,
                    });

                    #[cfg(feature = "tracing")]
                    tracing::warn!(saga = %config.name, step = %step.name, "step failed, compensating executed steps");

                    let error = ResilienceError::SagaStepFailed {
                        step: step.name.clone(),
                        source: Box::new(cause),
                    };

                    let (compensated_steps, compensation_errors) =
                        self.compensate(compensations).await;

                    self.stats.failed.fetch_add(1, Ordering::Relaxed);

                    #[cfg(feature = "metrics")]
                    metrics::counter!("backstop_saga_runs_total", "saga" => config.name.clone(), "outcome" => "failure").increment(1);

                    config.event_listeners.emit(&SagaEvent::SagaFailed {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        failed_step: step.name.clone(),
                        compensated_steps,
                    });

                    return SagaResult::Failure {
                        error,
                        executed_steps,
                        compensated_steps,
                        compensation_errors,
                        duration: config.clock.now() - start,
                    };
                }
            }
        }

        let duration = config.clock.now() - start;
        let steps = executed_steps.len();

        match final_result.and_then(|boxed| boxed.downcast::<T>().ok()) {
            Some(result) => {
                self.stats.successful.fetch_add(1, Ordering::Relaxed);

                #[cfg(feature = "metrics")]
                metrics::counter!("backstop_saga_runs_total", "saga" => config.name.clone(), "outcome" => "success").increment(1);

                config.event_listeners.emit(&SagaEvent::SagaCompleted {
                    pattern_name: config.name.clone(),
                    timestamp: WallInstant::now(),
                    steps,
                });

                SagaResult::Success {
                    result: *result,
                    executed_steps,
                    duration,
                }
            }
            // The declared result type does not match the final step.
            None => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                SagaResult::Failure {
                    error: ResilienceError::InvalidArgument {
                        what: "saga result type does not match the final step",
                    },
                    executed_steps,
                    compensated_steps: 0,
                    compensation_errors: Vec::new(),
                    duration,
                }
            }
        }
    }

    /// Runs the recorded compensations in reverse order.
    async fn compensate(
        &self,
        compensations: Vec<(String, CompThunk<E>)>,
    ) -> (usize, Vec<CompensationError<E>>) {
        let config = &self.config;
        let mut compensated = 0;
        let mut errors = Vec::new();

        let deadline = config
            .compensation_timeout
            .map(|timeout| config.clock.now() + timeout);
        let mut abandoned = false;

        for (name, thunk) in compensations.into_iter().rev() {
            if abandoned {
                self.record_abandoned(&name, &mut errors);
                continue;
            }

            let remaining = deadline.map(|d| d.saturating_duration_since(config.clock.now()));
            if remaining.is_some_and(|r| r.is_zero()) {
                abandoned = true;
                self.record_abandoned(&name, &mut errors);
                continue;
            }

            let outcome = match remaining {
                None => thunk().await,
                Some(remaining) => {
                    let sleep = config.clock.sleep(remaining);
                    futures::pin_mut!(sleep);
                    let comp = thunk();
                    futures::pin_mut!(comp);
                    tokio::select! {
                        outcome = &mut comp => outcome,
                        _ = &mut sleep => {
                            abandoned = true;
                            self.record_abandoned(&name, &mut errors);
                            continue;
                        }
                    }
                }
            };

            match outcome {
                Ok(()) => {
                    compensated += 1;
                    self.stats.steps_compensated.fetch_add(1, Ordering::Relaxed);
                    config.event_listeners.emit(&SagaEvent::StepCompensated {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        step: name,
                    });
                }
                Err(error) => {
                    self.stats
                        .compensation_failures
                        .fetch_add(1, Ordering::Relaxed);

                    #[cfg(feature = "tracing")]
                    tracing::warn!(saga = %config.name, step = %name, "compensation failed");

                    config.event_listeners.emit(&SagaEvent::CompensationFailed {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        step: name.clone(),
                        abandoned: false,
                    });
                    errors.push(CompensationError {
                        step: name,
                        kind: CompensationErrorKind::Failed(error),
                    });

                    if !config.continue_on_compensation_failure {
                        break;
                    }
                }
            }
        }

        (compensated, errors)
    }

    fn record_abandoned(&self, name: &str, errors: &mut Vec<CompensationError<E>>) {
        self.stats
            .compensation_failures
            .fetch_add(1, Ordering::Relaxed);
        self.config
            .event_listeners
            .emit(&SagaEvent::CompensationFailed {
                pattern_name: self.config.name.clone(),
                timestamp: WallInstant::now(),
                step: name.to_string(),
                abandoned: true,
            });
        errors.push(CompensationError {
            step: name.to_string(),
            kind: CompensationErrorKind::Abandoned,
        });
    }

    /// Returns a snapshot of the counters.
    pub fn statistics(&self) -> SagaStatistics {
        SagaStatistics {
            total_executions: self.stats.total_executions.load(Ordering::Relaxed),
            successful: self.stats.successful.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            steps_compensated: self.stats.steps_compensated.load(Ordering::Relaxed),
            compensation_failures: self.stats.compensation_failures.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters to zero.
    pub fn reset_statistics(&self) {
        self.stats.total_executions.store(0, Ordering::Relaxed);
        self.stats.successful.store(0, Ordering::Relaxed);
        self.stats.failed.store(0, Ordering::Relaxed);
        self.stats.steps_compensated.store(0, Ordering::Relaxed);
        self.stats.compensation_failures.store(0, Ordering::Relaxed);
    }

    /// Registers a listener at runtime; returns a handle for removal.
    pub fn add_listener<L>(&self, listener: L) -> ListenerHandle
    where
        L: EventListener<SagaEvent> + 'static,
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

    /// Number of declared steps.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Builder for [`Saga`].
///
/// `T` must be the success type of the final step added.
pub struct SagaBuilder<T, E> {
    name: String,
    steps: Vec<SagaStep<E>>,
    continue_on_compensation_failure: bool,
    compensation_timeout: Option<Duration>,
    event_listeners: EventListeners<SagaEvent>,
    clock: Arc<dyn Clock>,
    _result: std::marker::PhantomData<fn() -> T>,
}

impl<T, E> SagaBuilder<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - continue on compensation failure: true
    /// - compensation timeout: none
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            steps: Vec::new(),
            continue_on_compensation_failure: true,
            compensation_timeout: None,
            event_listeners: EventListeners::new(),
            clock: default_clock(),
            _result: std::marker::PhantomData,
        }
    }

    /// Adds a step with a compensation.
    ///
    /// The compensation receives the value the forward action produced,
    /// and runs only if a later step fails.
    pub fn step<R, A, AFut, C, CFut>(mut self, name: &str, action: A, compensation: C) -> Self
    where
        R: Clone + Send + 'static,
        A: Fn() -> AFut + Send + Sync + 'static,
        AFut: std::future::Future<Output = Result<R, ResilienceError<E>>> + Send + 'static,
        C: Fn(R) -> CFut + Send + Sync + 'static,
        CFut: std::future::Future<Output = Result<(), ResilienceError<E>>> + Send + 'static,
    {
        let comp: CompFn<R, E> = Arc::new(move |value| Box::pin(compensation(value)));
        self.push_step(name, action, Some(comp));
        self
    }

    /// Adds a step with no compensation; it is skipped silently during
    /// rollback.
    pub fn step_uncompensated<R, A, AFut>(mut self, name: &str, action: A) -> Self
    where
        R: Clone + Send + 'static,
        A: Fn() -> AFut + Send + Sync + 'static,
        AFut: std::future::Future<Output = Result<R, ResilienceError<E>>> + Send + 'static,
    {
        self.push_step::<R, _, _>(name, action, None);
        self
    }

    /// Adds a compensated step whose forward action runs under a
    /// deadline; a fired deadline fails the step with a timeout error.
    pub fn step_with_timeout<R, A, AFut, C, CFut>(
        mut self,
        name: &str,
        timeout: Duration,
        action: A,
        compensation: C,
    ) -> Self
    where
        R: Clone + Send + 'static,
        A: Fn() -> AFut + Send + Sync + 'static,
        AFut: std::future::Future<Output = Result<R, ResilienceError<E>>> + Send + 'static,
        C: Fn(R) -> CFut + Send + Sync + 'static,
        CFut: std::future::Future<Output = Result<(), ResilienceError<E>>> + Send + 'static,
    {
        let limiter = TimeLimiter::builder()
            .timeout(timeout)
            .name(format!("{name}.deadline"))
            .build();
        let action = Arc::new(action);
        let guarded = move || {
            let limiter = limiter.clone();
            let action = Arc::clone(&action);
            async move { limiter.execute(|| (*action)()).await }
        };

        let comp: CompFn<R, E> = Arc::new(move |value| Box::pin(compensation(value)));
        self.push_step(name, guarded, Some(comp));
        self
    }

    /// Adds a compensated step whose forward action is retried with the
    /// engine's default backoff before it counts as failed.
    pub fn step_with_retry<R, A, AFut, C, CFut>(
        mut self,
        name: &str,
        retries: usize,
        action: A,
        compensation: C,
    ) -> Self
    where
        R: Clone + Send + 'static,
        A: Fn() -> AFut + Send + Sync + 'static,
        AFut: std::future::Future<Output = Result<R, ResilienceError<E>>> + Send + 'static,
        C: Fn(R) -> CFut + Send + Sync + 'static,
        CFut: std::future::Future<Output = Result<(), ResilienceError<E>>> + Send + 'static,
    {
        let retry: Retry<E> = Retry::builder()
            .retries(retries)
            .name(format!("{name}.retry"))
            .build();
        let action = Arc::new(action);
        let retried = move || {
            let retry = retry.clone();
            let action = Arc::clone(&action);
            async move { retry.execute(|| (*action)()).await }
        };

        let comp: CompFn<R, E> = Arc::new(move |value| Box::pin(compensation(value)));
        self.push_step(name, retried, Some(comp));
        self
    }

    fn push_step<R, A, AFut>(&mut self, name: &str, action: A, compensation: Option<CompFn<R, E>>)
    where
        R: Clone + Send + 'static,
        A: Fn() -> AFut + Send + Sync + 'static,
        AFut: std::future::Future<Output = Result<R, ResilienceError<E>>> + Send + 'static,
    {
        let action = Arc::new(action);
        let run: RunFn<E> = Arc::new(move || {
            let action = Arc::clone(&action);
            let compensation = compensation.clone();
            Box::pin(async move {
                let value = (*action)().await?;
                let thunk = compensation.map(|comp| {
                    let comp_value = value.clone();
                    Box::new(move || comp(comp_value)) as CompThunk<E>
                });
                Ok(StepOutcome {
                    result: Box::new(value) as ErasedResult,
                    compensation: thunk,
                })
            })
        });

        self.steps.push(SagaStep {
            name: name.to_string(),
            run,
        });
    }

    /// Whether to keep compensating after one compensation fails.
    ///
    /// Default: true
    pub fn continue_on_compensation_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_compensation_failure = continue_on_failure;
        self
    }

    /// Bounds the whole compensation phase; compensations that do not
    /// finish before the deadline are abandoned and recorded.
    ///
    /// # Panics
    ///
    /// Panics when the timeout is zero.
    pub fn compensation_timeout(mut self, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "compensation_timeout must be > 0");
        self.compensation_timeout = Some(timeout);
        self
    }

    /// Give this saga a human-readable name for observability.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the clock. Intended for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a callback for completed forward steps.
    pub fn on_step_completed<F>(self, f: F) -> Self
    where
        F: Fn(&str, usize) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(backstop_core::FnListener::new(move |event: &SagaEvent| {
                if let SagaEvent::StepCompleted { step, index, .. } = event {
                    f(step, *index);
                }
            }));
        self
    }

    /// Register a callback for successful compensations.
    pub fn on_step_compensated<F>(self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(backstop_core::FnListener::new(move |event: &SagaEvent| {
                if let SagaEvent::StepCompensated { step, .. } = event {
                    f(step);
                }
            }));
        self
    }

    /// Builds the saga.
    ///
    /// # Panics
    ///
    /// Panics when no steps were added.
    pub fn build(self) -> Saga<T, E> {
        assert!(!self.steps.is_empty(), "a saga needs at least one step");

        Saga {
            config: Arc::new(SagaConfig {
                continue_on_compensation_failure: self.continue_on_compensation_failure,
                compensation_timeout: self.compensation_timeout,
                event_listeners: self.event_listeners,
                name: self.name,
                clock: self.clock,
            }),
            steps: Arc::new(self.steps),
            stats: Arc::new(StatsCell::default()),
            _result: std::marker::PhantomData,
        }
    }
}

impl<T, E> Default for SagaBuilder<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
