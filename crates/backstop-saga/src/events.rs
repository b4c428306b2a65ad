//! Events emitted by the saga engine.

use std::time::Instant;

use backstop_core::ResilienceEvent;

/// Events emitted while executing a saga.
#[derive(Debug, Clone)]
pub enum SagaEvent {
    /// A forward step completed.
    StepCompleted {
        /// Name of the saga instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Name of the completed step.
        step: String,
        /// Forward index of the step.
        index: usize,
    },
    /// A forward step failed; compensation follows.
    StepFailed {
        /// Name of the saga instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Name of the failing step.
        step: String,
        /// Forward index of the step.
        index: usize,
    },
    /// A compensation ran successfully.
    StepCompensated {
        /// Name of the saga instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Name of the compensated step.
        step: String,
    },
    /// A compensation failed or was abandoned.
    CompensationFailed {
        /// Name of the saga instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Name of the step whose compensation did not run to completion.
        step: String,
        /// True when the compensation was abandoned by the deadline
        /// rather than failing on its own.
        abandoned: bool,
    },
    /// The saga finished with a success.
    SagaCompleted {
        /// Name of the saga instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Number of executed steps.
        steps: usize,
    },
    /// The saga finished with a failure, after compensation.
    SagaFailed {
        /// Name of the saga instance.
        pattern_name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Name of the step that failed.
        failed_step: String,
        /// Number of compensations that ran successfully.
        compensated_steps: usize,
    },
}

impl ResilienceEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::StepCompleted { .. } => "step_completed",
            SagaEvent::StepFailed { .. } => "step_failed",
            SagaEvent::StepCompensated { .. } => "step_compensated",
            SagaEvent::CompensationFailed { .. } => "compensation_failed",
            SagaEvent::SagaCompleted { .. } => "saga_completed",
            SagaEvent::SagaFailed { .. } => "saga_failed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            SagaEvent::StepCompleted { timestamp, .. }
            | SagaEvent::StepFailed { timestamp, .. }
            | SagaEvent::StepCompensated { timestamp, .. }
            | SagaEvent::CompensationFailed { timestamp, .. }
            | SagaEvent::SagaCompleted { timestamp, .. }
            | SagaEvent::SagaFailed { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            SagaEvent::StepCompleted { pattern_name, .. }
            | SagaEvent::StepFailed { pattern_name, .. }
            | SagaEvent::StepCompensated { pattern_name, .. }
            | SagaEvent::CompensationFailed { pattern_name, .. }
            | SagaEvent::SagaCompleted { pattern_name, .. }
            | SagaEvent::SagaFailed { pattern_name, .. } => pattern_name,
        }
    }
}
