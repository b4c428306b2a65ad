//! Discrete-window admission via a sliding timestamp log.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant as WallInstant};

use parking_lot::Mutex;
use tokio::time::Instant;

use backstop_core::clock::{default_clock, Clock};
use backstop_core::{EventListener, EventListeners, FnListener, ListenerHandle, ResilienceError};

use crate::events::RateLimiterEvent;
use crate::stats::{RateLimiterStatistics, StatsCell};

struct SlidingWindowConfig {
    max_requests: usize,
    window_duration: Duration,
    event_listeners: EventListeners<RateLimiterEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

/// Sliding-window rate limiter.
///
/// Keeps the timestamps of admissions within `(now - window_duration,
/// now]` and admits a call only while fewer than `max_requests` remain in
/// the window. Prune, test, and insert happen as one atomic action.
///
/// Admission either succeeds immediately or fails with
/// [`ResilienceError::RateLimitExceeded`]; there is no queueing.
///
/// # Example
///
/// ```
/// use backstop_ratelimiter::SlidingWindow;
/// use backstop_core::ResilienceError;
/// use std::time::Duration;
///
/// # async fn example() {
/// let limiter = SlidingWindow::builder()
///     .max_requests(100)
///     .window_duration(Duration::from_secs(60))
///     .name("login-attempts")
///     .build();
///
/// let result = limiter
///     .execute(|| async { Ok::<_, ResilienceError<&str>>(()) })
///     .await;
/// # let _ = result;
/// # }
/// ```
pub struct SlidingWindow {
    config: Arc<SlidingWindowConfig>,
    log: Arc<Mutex<VecDeque<Instant>>>,
    stats: Arc<StatsCell>,
}

impl Clone for SlidingWindow {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            log: Arc::clone(&self.log),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl SlidingWindow {
    /// Creates a new configuration builder.
    pub fn builder() -> SlidingWindowBuilder {
        SlidingWindowBuilder::new()
    }

    fn try_admit<E>(&self) -> Result<(), ResilienceError<E>> {
        let config = &self.config;
        let now = config.clock.now();

        let outcome = {
            let mut log = self.log.lock();
            Self::prune(&mut log, now, config.window_duration);
            if log.len() < config.max_requests {
                log.push_back(now);
                Ok(())
            } else {
                // Admission frees up when the oldest entry leaves the window.
                let retry_after = log.front().map(|oldest| {
                    (*oldest + config.window_duration).saturating_duration_since(now)
                });
                Err(retry_after)
            }
        };

        match outcome {
            Ok(()) => {
                config.event_listeners.emit(&RateLimiterEvent::Permitted {
                    pattern_name: config.name.clone(),
                    timestamp: WallInstant::now(),
                    waited: Duration::ZERO,
                });

                #[cfg(feature = "metrics")]
                metrics::counter!("backstop_ratelimiter_permits_total", "ratelimiter" => config.name.clone(), "outcome" => "permitted").increment(1);

                Ok(())
            }
            Err(retry_after) => {
                config.event_listeners.emit(&RateLimiterEvent::Rejected {
                    pattern_name: config.name.clone(),
                    timestamp: WallInstant::now(),
                    retry_after,
                });

                #[cfg(feature = "metrics")]
                metrics::counter!("backstop_ratelimiter_permits_total", "ratelimiter" => config.name.clone(), "outcome" => "rejected").increment(1);

                #[cfg(feature = "tracing")]
                tracing::debug!(ratelimiter = %config.name, "sliding window full");

                Err(ResilienceError::RateLimitExceeded { retry_after })
            }
        }
    }

    fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = log.front() {
            if now.saturating_duration_since(*oldest) >= window {
                log.pop_front();
            } else {
                break;
            }
        }
    }

    /// Runs `op` if the window has room, otherwise rejects.
    pub async fn try_execute<T, E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        if let Err(error) = self.try_admit::<E>() {
            self.stats.record_rejection();
            return Err(error);
        }

        let result = op().await;
        match &result {
            Ok(_) => self.stats.record_success(),
            Err(error) if error.is_cancelled() => {}
            Err(_) => self.stats.record_failure(),
        }
        result
    }

    /// Alias for [`SlidingWindow::try_execute`]; window admission never
    /// queues.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        self.try_execute(op).await
    }

    /// Admissions currently inside the window.
    pub fn current_window_count(&self) -> usize {
        let mut log = self.log.lock();
        Self::prune(&mut log, self.config.clock.now(), self.config.window_duration);
        log.len()
    }

    /// Admissions the window can still take right now.
    pub fn available_permits(&self) -> usize {
        self.config
            .max_requests
            .saturating_sub(self.current_window_count())
    }

    /// Returns a snapshot of the call counters.
    pub fn statistics(&self) -> RateLimiterStatistics {
        self.stats.snapshot()
    }

    /// Resets all call counters to zero.
    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Registers a listener at runtime; returns a handle for removal.
    pub fn add_listener<L>(&self, listener: L) -> ListenerHandle
    where
        L: EventListener<RateLimiterEvent> + 'static,
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

/// Builder for [`SlidingWindow`].
pub struct SlidingWindowBuilder {
    max_requests: usize,
    window_duration: Duration,
    event_listeners: EventListeners<RateLimiterEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            max_requests: 100,
            window_duration: Duration::from_secs(1),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
            clock: default_clock(),
        }
    }

    /// Admissions allowed per window.
    ///
    /// Default: 100
    pub fn max_requests(mut self, max: usize) -> Self {
        self.max_requests = max;
        self
    }

    /// Window length.
    ///
    /// Default: 1 second
    pub fn window_duration(mut self, duration: Duration) -> Self {
        self.window_duration = duration;
        self
    }

    /// Give this limiter a human-readable name for observability.
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the clock. Intended for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a callback for rejected calls.
    pub fn on_rejected<F>(self, f: F) -> Self
    where
        F: Fn(Option<Duration>) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RateLimiterEvent| {
                if let RateLimiterEvent::Rejected { retry_after, .. } = event {
                    f(*retry_after);
                }
            }));
        self
    }

    /// Builds the limiter with an empty window.
    ///
    /// # Panics
    ///
    /// Panics when `max_requests` or `window_duration` is zero.
    pub fn build(self) -> SlidingWindow {
        assert!(self.max_requests > 0, "max_requests must be > 0");
        assert!(
            !self.window_duration.is_zero(),
            "window_duration must be > 0"
        );

        SlidingWindow {
            log: Arc::new(Mutex::new(VecDeque::with_capacity(self.max_requests))),
            config: Arc::new(SlidingWindowConfig {
                max_requests: self.max_requests,
                window_duration: self.window_duration,
                event_listeners: self.event_listeners,
                name: self.name,
                clock: self.clock,
            }),
            stats: Arc::new(StatsCell::default()),
        }
    }
}

impl Default for SlidingWindowBuilder {
    fn default() -> Self {
        Self::new()
    }
}
