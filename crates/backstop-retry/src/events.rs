//! Events emitted by the retry and repeat engines.

use std::time::{Duration, Instant};

use backstop_core::ResilienceEvent;

/// Events emitted while driving a schedule.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// A further attempt was scheduled after a failure (retry) or a
    /// continuing value (repeat).
    RetryScheduled {
        /// Name of the engine instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The attempt that just finished (1-based).
        attempt: usize,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// The loop finished with a success.
    Success {
        /// Name of the engine instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Total attempts made, including the first.
        attempts: usize,
    },
    /// The schedule was exhausted without a success.
    Exhausted {
        /// Name of the engine instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Total attempts made.
        attempts: usize,
    },
    /// An error was rejected by the retry predicate and propagated
    /// without consuming a schedule decision.
    IgnoredError {
        /// Name of the engine instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
    },
}

impl ResilienceEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::RetryScheduled { .. } => "retry_scheduled",
            RetryEvent::Success { .. } => "success",
            RetryEvent::Exhausted { .. } => "exhausted",
            RetryEvent::IgnoredError { .. } => "ignored_error",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::RetryScheduled { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Exhausted { timestamp, .. }
            | RetryEvent::IgnoredError { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            RetryEvent::RetryScheduled { pattern_name, .. }
            | RetryEvent::Success { pattern_name, .. }
            | RetryEvent::Exhausted { pattern_name, .. }
            | RetryEvent::IgnoredError { pattern_name, .. } => pattern_name,
        }
    }
}
