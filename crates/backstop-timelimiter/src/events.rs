//! Events emitted by the time limiter.

use std::time::{Duration, Instant};

use backstop_core::ResilienceEvent;

/// Events emitted by a time limiter instance.
#[derive(Debug, Clone)]
pub enum TimeLimiterEvent {
    /// The operation completed before its deadline.
    Success {
        /// Name of the limiter instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// How long the operation ran.
        duration: Duration,
    },
    /// The operation failed before its deadline.
    Failure {
        /// Name of the limiter instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// How long the operation ran.
        duration: Duration,
    },
    /// The deadline fired and the operation was cancelled.
    Timeout {
        /// Name of the limiter instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The deadline that fired.
        timeout_duration: Duration,
    },
}

impl ResilienceEvent for TimeLimiterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TimeLimiterEvent::Success { .. } => "success",
            TimeLimiterEvent::Failure { .. } => "failure",
            TimeLimiterEvent::Timeout { .. } => "timeout",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            TimeLimiterEvent::Success { timestamp, .. }
            | TimeLimiterEvent::Failure { timestamp, .. }
            | TimeLimiterEvent::Timeout { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            TimeLimiterEvent::Success { pattern_name, .. }
            | TimeLimiterEvent::Failure { pattern_name, .. }
            | TimeLimiterEvent::Timeout { pattern_name, .. } => pattern_name,
        }
    }
}
