//! Forward/compensate transactional sequencer.
//!
//! A [`Saga`] runs an ordered list of steps. When a step fails, the
//! steps that already succeeded are compensated in reverse order, each
//! compensation receiving the value its forward action produced. Step
//! actions can be wrapped with a per-step deadline or retry policy, and
//! many sagas can run concurrently through [`run_all`].
//!
//! The failing step surfaces as [`ResilienceError::SagaStepFailed`]
//! with the original cause attached; compensation problems are collected
//! into the result, never raised.
//!
//! [`ResilienceError::SagaStepFailed`]: backstop_core::ResilienceError::SagaStepFailed

mod events;
mod saga;

pub use events::SagaEvent;
pub use saga::{
    CompensationError, CompensationErrorKind, ExecutedStep, Saga, SagaBuilder, SagaResult,
    SagaStatistics,
};

use std::time::Duration;

/// Aggregate outcome of a batch of sagas run concurrently.
#[derive(Debug)]
pub struct SagaBatchReport<T, E> {
    /// Per-saga results, positionally aligned with the input.
    pub results: Vec<SagaResult<T, E>>,
    /// Sagas that completed every step.
    pub success_count: usize,
    /// Sagas that failed and compensated.
    pub failure_count: usize,
    /// Wall-clock duration of the whole batch.
    pub total_duration: Duration,
}

impl<T, E> SagaBatchReport<T, E> {
    /// Successes as a fraction of the batch; zero for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.success_count as f64 / self.results.len() as f64
        }
    }
}

/// Runs every saga concurrently; each saga runs independently and the
/// results align positionally with the input.
pub async fn run_all<T, E>(sagas: &[Saga<T, E>]) -> SagaBatchReport<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let start = tokio::time::Instant::now();
    let results = futures::future::join_all(sagas.iter().map(|saga| saga.execute())).await;

    let success_count = results.iter().filter(|r| r.is_success()).count();
    let failure_count = results.len() - success_count;

    SagaBatchReport {
        results,
        success_count,
        failure_count,
        total_duration: start.elapsed(),
    }
}
