//! Circuit breaker configuration.

use std::sync::Arc;
use std::time::Duration;

use backstop_core::clock::{default_clock, Clock};
use backstop_core::{EventListeners, FnListener};

use crate::circuit::CircuitState;
use crate::events::CircuitBreakerEvent;
use crate::CircuitBreaker;

/// Configuration for the circuit breaker.
pub struct CircuitBreakerConfig {
    pub(crate) failure_threshold: u32,
    pub(crate) reset_timeout: Duration,
    pub(crate) half_open_success_threshold: u32,
    pub(crate) half_open_max_calls: u32,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
    pub(crate) name: String,
    pub(crate) clock: Arc<dyn Clock>,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        failure_threshold: u32,
        reset_timeout: Duration,
        half_open_success_threshold: u32,
        half_open_max_calls: u32,
    ) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            half_open_success_threshold,
            half_open_max_calls,
            event_listeners: EventListeners::new(),
            name: String::from("test"),
            clock: default_clock(),
        }
    }
}

/// Builder for configuring and constructing a circuit breaker.
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_success_threshold: u32,
    half_open_max_calls: u32,
    event_listeners: EventListeners<CircuitBreakerEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_success_threshold: 1,
            half_open_max_calls: 1,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
            clock: default_clock(),
        }
    }

    /// Consecutive failures in the closed state that open the circuit.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// How long the circuit stays open before admitting a probe.
    ///
    /// Default: 30 seconds
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Successful probes required to close the circuit from half-open.
    ///
    /// Default: 1
    pub fn half_open_success_threshold(mut self, threshold: u32) -> Self {
        self.half_open_success_threshold = threshold;
        self
    }

    /// Probes admitted concurrently while half-open.
    ///
    /// Default: 1
    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.half_open_max_calls = max_calls;
        self
    }

    /// Give this breaker a human-readable name for observability.
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

    /// Register a callback for state transition events.
    pub fn on_state_transition<F>(self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::StateTransition {
                    from_state,
                    to_state,
                    ..
                } = event
                {
                    f(*from_state, *to_state);
                }
            }));
        self
    }

    /// Register a callback for call permitted events.
    pub fn on_call_permitted<F>(self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::CallPermitted { state, .. } = event {
                    f(*state);
                }
            }));
        self
    }

    /// Register a callback for call rejected events.
    pub fn on_call_rejected<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if matches!(event, CircuitBreakerEvent::CallRejected { .. }) {
                    f();
                }
            }));
        self
    }

    /// Register a callback for recorded successes.
    pub fn on_success<F>(self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::SuccessRecorded { state, .. } = event {
                    f(*state);
                }
            }));
        self
    }

    /// Register a callback for recorded failures.
    pub fn on_failure<F>(self, f: F) -> Self
    where
        F: Fn(CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitBreakerEvent| {
                if let CircuitBreakerEvent::FailureRecorded { state, .. } = event {
                    f(*state);
                }
            }));
        self
    }

    /// Builds the breaker.
    ///
    /// # Panics
    ///
    /// Panics when any threshold is zero or the reset timeout is zero.
    pub fn build(self) -> CircuitBreaker {
        assert!(self.failure_threshold > 0, "failure_threshold must be > 0");
        assert!(
            !self.reset_timeout.is_zero(),
            "reset_timeout must be > 0"
        );
        assert!(
            self.half_open_success_threshold > 0,
            "half_open_success_threshold must be > 0"
        );
        assert!(
            self.half_open_max_calls > 0,
            "half_open_max_calls must be > 0"
        );

        CircuitBreaker::from_config(CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: self.reset_timeout,
            half_open_success_threshold: self.half_open_success_threshold,
            half_open_max_calls: self.half_open_max_calls,
            event_listeners: self.event_listeners,
            name: self.name,
            clock: self.clock,
        })
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
