//! Bulkhead configuration.

use std::sync::Arc;
use std::time::Duration;

use backstop_core::clock::{default_clock, Clock};
use backstop_core::{EventListeners, FnListener};

use crate::events::BulkheadEvent;
use crate::Bulkhead;

/// Configuration for the bulkhead.
pub struct BulkheadConfig {
    pub(crate) max_concurrent_calls: usize,
    pub(crate) max_waiting_calls: usize,
    pub(crate) max_wait_duration: Option<Duration>,
    pub(crate) event_listeners: EventListeners<BulkheadEvent>,
    pub(crate) name: String,
    pub(crate) clock: Arc<dyn Clock>,
}

impl BulkheadConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }
}

/// Builder for configuring and constructing a bulkhead.
pub struct BulkheadConfigBuilder {
    max_concurrent_calls: usize,
    max_waiting_calls: usize,
    max_wait_duration: Option<Duration>,
    event_listeners: EventListeners<BulkheadEvent>,
    name: String,
    clock: Arc<dyn Clock>,
}

impl BulkheadConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            max_concurrent_calls: 25,
            max_waiting_calls: 100,
            max_wait_duration: None,
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
            clock: default_clock(),
        }
    }

    /// Maximum calls allowed to run concurrently.
    ///
    /// Default: 25
    pub fn max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    /// Maximum callers allowed to queue for a permit. Zero means any call
    /// that cannot be admitted immediately is rejected.
    ///
    /// Default: 100
    pub fn max_waiting_calls(mut self, max: usize) -> Self {
        self.max_waiting_calls = max;
        self
    }

    /// Bounds how long a queued caller waits for a permit.
    ///
    /// Default: unbounded
    pub fn max_wait_duration(mut self, duration: Duration) -> Self {
        self.max_wait_duration = Some(duration);
        self
    }

    /// Give this bulkhead a human-readable name for observability.
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

    /// Register a callback for permitted calls.
    pub fn on_call_permitted<F>(self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BulkheadEvent| {
                if let BulkheadEvent::CallPermitted {
                    concurrent_calls, ..
                } = event
                {
                    f(*concurrent_calls);
                }
            }));
        self
    }

    /// Register a callback for rejected calls (queue full).
    pub fn on_call_rejected<F>(self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BulkheadEvent| {
                if matches!(event, BulkheadEvent::CallRejected { .. }) {
                    f();
                }
            }));
        self
    }

    /// Register a callback for calls that gave up waiting.
    pub fn on_call_timed_out<F>(self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BulkheadEvent| {
                if let BulkheadEvent::CallTimedOut { waited, .. } = event {
                    f(*waited);
                }
            }));
        self
    }

    /// Register a callback for finished calls.
    pub fn on_call_finished<F>(self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BulkheadEvent| {
                if let BulkheadEvent::CallFinished { duration, .. } = event {
                    f(*duration);
                }
            }));
        self
    }

    /// Builds the bulkhead.
    ///
    /// # Panics
    ///
    /// Panics when `max_concurrent_calls` is zero or `max_wait_duration`
    /// is set to zero.
    pub fn build(self) -> Bulkhead {
        assert!(
            self.max_concurrent_calls > 0,
            "max_concurrent_calls must be > 0"
        );
        if let Some(duration) = self.max_wait_duration {
            assert!(!duration.is_zero(), "max_wait_duration must be > 0");
        }

        Bulkhead::from_config(BulkheadConfig {
            max_concurrent_calls: self.max_concurrent_calls,
            max_waiting_calls: self.max_waiting_calls,
            max_wait_duration: self.max_wait_duration,
            event_listeners: self.event_listeners,
            name: self.name,
            clock: self.clock,
        })
    }
}

impl Default for BulkheadConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
