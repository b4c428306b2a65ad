//! Events emitted by the rate limiters.

use std::time::{Duration, Instant};

use backstop_core::ResilienceEvent;

/// Events emitted by a rate limiter instance.
#[derive(Debug, Clone)]
pub enum RateLimiterEvent {
    /// A call was admitted.
    Permitted {
        /// Name of the limiter instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// How long the caller waited for admission, zero for immediate
        /// admission.
        waited: Duration,
    },
    /// A call was rejected.
    Rejected {
        /// Name of the limiter instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Time until a permit is expected to free up, when known.
        retry_after: Option<Duration>,
    },
}

impl ResilienceEvent for RateLimiterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RateLimiterEvent::Permitted { .. } => "permitted",
            RateLimiterEvent::Rejected { .. } => "rejected",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RateLimiterEvent::Permitted { timestamp, .. }
            | RateLimiterEvent::Rejected { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            RateLimiterEvent::Permitted { pattern_name, .. }
            | RateLimiterEvent::Rejected { pattern_name, .. } => pattern_name,
        }
    }
}
