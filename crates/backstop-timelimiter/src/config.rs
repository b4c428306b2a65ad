//! Time limiter configuration.

use std::sync::Arc;
use std::time::Duration;

use backstop_core::clock::{default_clock, Clock};
use backstop_core::{EventListeners, FnListener};

use crate::events::TimeLimiterEvent;
use crate::TimeLimiter;

/// Configuration for the time limiter.
pub struct TimeLimiterConfig {
    pub(crate) timeout: Duration,
    pub(crate) event_listeners: EventListeners<TimeLimiterEvent>,
    pub(crate) name: String,
    pub(crate) clock: Arc<dyn Clock>,
}

impl TimeLimiterConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> TimeLimiterConfigBuilder {
        TimeLimiterConfigBuilder::new()
    }
}

/// Builder for configuring and constructing a time limiter.
pub struct TimeLimiterConfigBuilder {
    timeout: Duration,
    event_listeners: EventListeners<TimeLimiterEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

impl TimeLimiterConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
            clock: default_clock(),
        }
    }

    /// Default deadline for every call.
    ///
    /// Default: 1 second
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Give this limiter a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the clock. Intended for tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a callback for calls that beat their deadline.
    pub fn on_success<F>(self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &TimeLimiterEvent| {
                if let TimeLimiterEvent::Success { duration, .. } = event {
                    f(*duration);
                }
            }));
        self
    }

    /// Register a callback for calls that failed before their deadline.
    pub fn on_error<F>(self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &TimeLimiterEvent| {
                if let TimeLimiterEvent::Failure { duration, .. } = event {
                    f(*duration);
                }
            }));
        self
    }

    /// Register a callback for fired deadlines.
    pub fn on_timeout<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &TimeLimiterEvent| {
                if matches!(event, TimeLimiterEvent::Timeout { .. }) {
                    f();
                }
            }));
        self
    }

    /// Builds the limiter.
    ///
    /// # Panics
    ///
    /// Panics when the timeout is zero.
    pub fn build(self) -> TimeLimiter {
        assert!(!self.timeout.is_zero(), "timeout must be > 0");

        TimeLimiter::from_config(TimeLimiterConfig {
            timeout: self.timeout,
            event_listeners: self.event_listeners,
            name: self.name,
            clock: self.clock,
        })
    }
}

impl Default for TimeLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
