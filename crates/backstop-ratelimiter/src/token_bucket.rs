//! Continuous-rate admission via a token bucket.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant as WallInstant};

use parking_lot::Mutex;
use tokio::time::Instant;

use backstop_core::clock::{default_clock, Clock};
use backstop_core::{EventListener, EventListeners, FnListener, ListenerHandle, ResilienceError};

use crate::events::RateLimiterEvent;
use crate::stats::{RateLimiterStatistics, StatsCell};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    /// Refill and deduction are one atomic action; callers hold the lock.
    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(burst);
        self.last_refill = now;
    }
}

struct TokenBucketConfig {
    permits_per_second: f64,
    burst_capacity: u32,
    event_listeners: EventListeners<RateLimiterEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

/// Token-bucket rate limiter.
///
/// Tokens accrue continuously at `permits_per_second` up to
/// `burst_capacity`; each admission consumes one or more. [`try_execute`]
/// rejects when the bucket is short; [`execute`] sleeps until enough
/// tokens have accrued.
///
/// [`try_execute`]: TokenBucket::try_execute
/// [`execute`]: TokenBucket::execute
///
/// # Example
///
/// ```
/// use backstop_ratelimiter::TokenBucket;
/// use backstop_core::ResilienceError;
///
/// # async fn example() {
/// let limiter = TokenBucket::builder()
///     .permits_per_second(100.0)
///     .burst_capacity(20)
///     .name("outbound-api")
///     .build();
///
/// let result = limiter
///     .try_execute(|| async { Ok::<_, ResilienceError<&str>>("sent") })
///     .await;
/// # let _ = result;
/// # }
/// ```
pub struct TokenBucket {
    config: Arc<TokenBucketConfig>,
    state: Arc<Mutex<BucketState>>,
    stats: Arc<StatsCell>,
}

impl Clone for TokenBucket {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl TokenBucket {
    /// Creates a new configuration builder.
    pub fn builder() -> TokenBucketBuilder {
        TokenBucketBuilder::new()
    }

    /// Attempts to take `permits` tokens without waiting.
    ///
    /// On rejection, the error's `retry_after` reports the wait that would
    /// make the deficit whole.
    pub fn try_acquire<E>(&self, permits: u32) -> Result<(), ResilienceError<E>> {
        self.try_acquire_inner(permits)
    }

    fn try_acquire_inner<E>(&self, permits: u32) -> Result<(), ResilienceError<E>> {
        let config = &self.config;
        if permits == 0 || permits > config.burst_capacity {
            return Err(ResilienceError::InvalidArgument {
                what: "permits must be in 1..=burst_capacity",
            });
        }

        let needed = permits as f64;
        let outcome = {
            let mut state = self.state.lock();
            state.refill(
                config.clock.now(),
                config.permits_per_second,
                config.burst_capacity as f64,
            );
            if state.tokens >= needed {
                state.tokens -= needed;
                Ok(())
            } else {
                let deficit = needed - state.tokens;
                Err(Duration::from_secs_f64(deficit / config.permits_per_second))
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
                    retry_after: Some(retry_after),
                });

                #[cfg(feature = "metrics")]
                metrics::counter!("backstop_ratelimiter_permits_total", "ratelimiter" => config.name.clone(), "outcome" => "rejected").increment(1);

                #[cfg(feature = "tracing")]
                tracing::debug!(ratelimiter = %config.name, retry_after_ms = retry_after.as_millis() as u64, "token bucket short");

                Err(ResilienceError::RateLimitExceeded {
                    retry_after: Some(retry_after),
                })
            }
        }
    }

    /// Takes `permits` tokens, sleeping until enough have accrued.
    pub async fn acquire<E>(&self, permits: u32) -> Result<Duration, ResilienceError<E>> {
        let config = &self.config;
        if permits == 0 || permits > config.burst_capacity {
            return Err(ResilienceError::InvalidArgument {
                what: "permits must be in 1..=burst_capacity",
            });
        }

        let start = config.clock.now();
        let needed = permits as f64;
        loop {
            let wait = {
                let mut state = self.state.lock();
                state.refill(
                    config.clock.now(),
                    config.permits_per_second,
                    config.burst_capacity as f64,
                );
                if state.tokens >= needed {
                    state.tokens -= needed;
                    None
                } else {
                    let deficit = needed - state.tokens;
                    Some(Duration::from_secs_f64(deficit / config.permits_per_second))
                }
            };

            match wait {
                None => {
                    let waited = config.clock.now() - start;
                    config.event_listeners.emit(&RateLimiterEvent::Permitted {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        waited,
                    });
                    return Ok(waited);
                }
                // Sleep outside the lock, then re-enter the transaction:
                // another caller may have taken the accrued tokens.
                Some(wait) => config.clock.sleep(wait).await,
            }
        }
    }

    /// Runs `op` if one token is available right now, otherwise rejects
    /// with [`ResilienceError::RateLimitExceeded`].
    pub async fn try_execute<T, E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        self.try_execute_permits(1, op).await
    }

    /// Runs `op` if `permits` tokens are available right now.
    pub async fn try_execute_permits<T, E, F, Fut>(
        &self,
        permits: u32,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        if let Err(error) = self.try_acquire_inner::<E>(permits) {
            if error.is_rate_limited() {
                self.stats.record_rejection();
            }
            return Err(error);
        }
        self.run_admitted(op).await
    }

    /// Runs `op`, sleeping until a token is available.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        self.execute_permits(1, op).await
    }

    /// Runs `op`, sleeping until `permits` tokens are available.
    pub async fn execute_permits<T, E, F, Fut>(
        &self,
        permits: u32,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        self.acquire::<E>(permits).await?;
        self.run_admitted(op).await
    }

    async fn run_admitted<T, E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let result = op().await;
        match &result {
            Ok(_) => self.stats.record_success(),
            Err(error) if error.is_cancelled() => {}
            Err(_) => self.stats.record_failure(),
        }
        result
    }

    /// Tokens available right now, without committing the refill.
    pub fn available_tokens(&self) -> f64 {
        let config = &self.config;
        let state = self.state.lock();
        let elapsed = config
            .clock
            .now()
            .saturating_duration_since(state.last_refill);
        (state.tokens + elapsed.as_secs_f64() * config.permits_per_second)
            .min(config.burst_capacity as f64)
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

/// Builder for [`TokenBucket`].
pub struct TokenBucketBuilder {
    permits_per_second: f64,
    burst_capacity: u32,
    event_listeners: EventListeners<RateLimiterEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

impl TokenBucketBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            permits_per_second: 10.0,
            burst_capacity: 10,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
            clock: default_clock(),
        }
    }

    /// Token accrual rate.
    ///
    /// Default: 10.0
    pub fn permits_per_second(mut self, rate: f64) -> Self {
        self.permits_per_second = rate;
        self
    }

    /// Maximum tokens the bucket holds.
    ///
    /// Default: 10
    pub fn burst_capacity(mut self, capacity: u32) -> Self {
        self.burst_capacity = capacity;
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

    /// Register a callback for admitted calls.
    pub fn on_permitted<F>(self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RateLimiterEvent| {
                if let RateLimiterEvent::Permitted { waited, .. } = event {
                    f(*waited);
                }
            }));
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

    /// Builds the limiter with a full bucket.
    ///
    /// # Panics
    ///
    /// Panics when the rate is not strictly positive and finite, or the
    /// burst capacity is zero.
    pub fn build(self) -> TokenBucket {
        assert!(
            self.permits_per_second > 0.0 && self.permits_per_second.is_finite(),
            "permits_per_second must be finite and > 0"
        );
        assert!(self.burst_capacity > 0, "burst_capacity must be > 0");

        let now = self.clock.now();
        TokenBucket {
            state: Arc::new(Mutex::new(BucketState {
                tokens: self.burst_capacity as f64,
                last_refill: now,
            })),
            config: Arc::new(TokenBucketConfig {
                permits_per_second: self.permits_per_second,
                burst_capacity: self.burst_capacity,
                event_listeners: self.event_listeners,
                name: self.name,
                clock: self.clock,
            }),
            stats: Arc::new(StatsCell::default()),
        }
    }
}

impl Default for TokenBucketBuilder {
    fn default() -> Self {
        Self::new()
    }
}
