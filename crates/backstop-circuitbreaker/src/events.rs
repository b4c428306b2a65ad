//! Events emitted by the circuit breaker.

use std::time::Instant;

use backstop_core::ResilienceEvent;

use crate::circuit::CircuitState;

/// Events emitted by a circuit breaker instance.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// The breaker committed a state transition.
    StateTransition {
        /// Name of the breaker instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// State before the transition.
        from_state: CircuitState,
        /// State after the transition.
        to_state: CircuitState,
    },
    /// A call was admitted.
    CallPermitted {
        /// Name of the breaker instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// State at admission time.
        state: CircuitState,
    },
    /// A call was rejected.
    CallRejected {
        /// Name of the breaker instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
    },
    /// A success was recorded against the breaker.
    SuccessRecorded {
        /// Name of the breaker instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// State the success was recorded in.
        state: CircuitState,
    },
    /// A failure was recorded against the breaker.
    FailureRecorded {
        /// Name of the breaker instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// State the failure was recorded in.
        state: CircuitState,
    },
}

impl ResilienceEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::SuccessRecorded { .. } => "success_recorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "failure_recorded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::SuccessRecorded { timestamp, .. }
            | CircuitBreakerEvent::FailureRecorded { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateTransition { pattern_name, .. }
            | CircuitBreakerEvent::CallPermitted { pattern_name, .. }
            | CircuitBreakerEvent::CallRejected { pattern_name, .. }
            | CircuitBreakerEvent::SuccessRecorded { pattern_name, .. }
            | CircuitBreakerEvent::FailureRecorded { pattern_name, .. } => pattern_name,
        }
    }
}
