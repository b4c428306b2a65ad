//! The circuit state machine.
//!
//! [`Circuit`] is the plain state record guarded by the breaker's mutex.
//! Its methods are synchronous, never block, and never call listeners:
//! each transition returns the events describing what was committed, and
//! the caller emits them after releasing the lock.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant as WallInstant;

use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;

/// Represents the state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CircuitState {
    /// The circuit is closed and calls pass through.
    Closed = 0,
    /// The circuit is open and calls are rejected.
    Open = 1,
    /// The circuit is half-open and a limited number of probes are allowed.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

/// Whether an admission check let the call through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Call admitted. `probe` is true when the call occupies a half-open
    /// probe slot that must be returned on every exit path.
    Permitted { probe: bool },
    /// Call rejected; the breaker is open or out of probe slots.
    Rejected,
}

/// Point-in-time view of the breaker's state attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures observed in the closed state (kept across the
    /// transition to open, cleared when the circuit closes again).
    pub failure_count: u32,
    /// Successful probes since the circuit went half-open.
    pub half_open_successes: u32,
    /// Probes currently in flight in the half-open state.
    pub half_open_in_flight: u32,
}

pub(crate) struct Circuit {
    state: CircuitState,
    state_atomic: Arc<AtomicU8>,
    failure_count: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    last_failure_time: Option<Instant>,
}

impl Circuit {
    pub(crate) fn new_with_atomic(state_atomic: Arc<AtomicU8>) -> Self {
        Self {
            state: CircuitState::Closed,
            state_atomic,
            failure_count: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            last_failure_time: None,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            half_open_successes: self.half_open_successes,
            half_open_in_flight: self.half_open_in_flight,
        }
    }

    pub(crate) fn try_acquire(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
        events: &mut Vec<CircuitBreakerEvent>,
    ) -> Admission {
        match self.state {
            CircuitState::Closed => {
                events.push(CircuitBreakerEvent::CallPermitted {
                    pattern_name: config.name.clone(),
                    timestamp: WallInstant::now(),
                    state: self.state,
                });
                Admission::Permitted { probe: false }
            }
            CircuitState::Open => {
                let cooled_down = self
                    .last_failure_time
                    .is_some_and(|at| now.saturating_duration_since(at) >= config.reset_timeout);
                if cooled_down {
                    self.transition_to(CircuitState::HalfOpen, config, events);
                    self.half_open_in_flight = 1;
                    events.push(CircuitBreakerEvent::CallPermitted {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        state: self.state,
                    });
                    Admission::Permitted { probe: true }
                } else {
                    events.push(CircuitBreakerEvent::CallRejected {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                    });
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_in_flight < config.half_open_max_calls {
                    self.half_open_in_flight += 1;
                    events.push(CircuitBreakerEvent::CallPermitted {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                        state: self.state,
                    });
                    Admission::Permitted { probe: true }
                } else {
                    events.push(CircuitBreakerEvent::CallRejected {
                        pattern_name: config.name.clone(),
                        timestamp: WallInstant::now(),
                    });
                    Admission::Rejected
                }
            }
        }
    }

    pub(crate) fn record_success(
        &mut self,
        config: &CircuitBreakerConfig,
        probe: bool,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        if probe {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }

        events.push(CircuitBreakerEvent::SuccessRecorded {
            pattern_name: config.name.clone(),
            timestamp: WallInstant::now(),
            state: self.state,
        });

        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= config.half_open_success_threshold {
                    self.transition_to(CircuitState::Closed, config, events);
                }
            }
            // A call admitted before trip() can complete while open; its
            // outcome no longer changes the state.
            CircuitState::Open => {}
        }
    }

    pub(crate) fn record_failure(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
        probe: bool,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        if probe {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }

        events.push(CircuitBreakerEvent::FailureRecorded {
            pattern_name: config.name.clone(),
            timestamp: WallInstant::now(),
            state: self.state,
        });

        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                self.last_failure_time = Some(now);
                if self.failure_count >= config.failure_threshold {
                    self.transition_to(CircuitState::Open, config, events);
                }
            }
            CircuitState::HalfOpen => {
                self.last_failure_time = Some(now);
                self.transition_to(CircuitState::Open, config, events);
            }
            CircuitState::Open => {}
        }
    }

    /// Returns a half-open probe slot without recording an outcome.
    /// Used when a call is cancelled: cancellation counts as neither
    /// success nor failure.
    pub(crate) fn abandon(&mut self, probe: bool) {
        if probe {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }
    }

    pub(crate) fn force_open(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        self.last_failure_time = Some(now);
        self.transition_to(CircuitState::Open, config, events);
    }

    pub(crate) fn reset(
        &mut self,
        config: &CircuitBreakerConfig,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        self.transition_to(CircuitState::Closed, config, events);
        // reset() restores the initial state even when already closed.
        self.failure_count = 0;
        self.half_open_successes = 0;
        self.last_failure_time = None;
    }

    fn transition_to(
        &mut self,
        state: CircuitState,
        config: &CircuitBreakerConfig,
        events: &mut Vec<CircuitBreakerEvent>,
    ) {
        if self.state == state {
            return;
        }

        let from_state = self.state;
        events.push(CircuitBreakerEvent::StateTransition {
            pattern_name: config.name.clone(),
            timestamp: WallInstant::now(),
            from_state,
            to_state: state,
        });

        #[cfg(feature = "tracing")]
        tracing::info!(breaker = %config.name, from = ?from_state, to = ?state, "circuit state transition");

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(
                "backstop_circuitbreaker_transitions_total",
                "circuitbreaker" => config.name.clone(),
                "from" => from_state.as_str(),
                "to" => state.as_str()
            )
            .increment(1);

            metrics::gauge!(
                "backstop_circuitbreaker_state",
                "circuitbreaker" => config.name.clone()
            )
            .set(state as u8 as f64);
        }

        self.state = state;
        self.state_atomic.store(state as u8, Ordering::Release);

        match state {
            CircuitState::Closed => {
                self.failure_count = 0;
                self.half_open_successes = 0;
                self.half_open_in_flight = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_successes = 0;
                self.half_open_in_flight = 0;
            }
            CircuitState::Open => {}
        }
    }
}
