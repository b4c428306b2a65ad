//! The common error taxonomy for backstop primitives.
//!
//! Every `execute` combinator in the workspace returns
//! `Result<T, ResilienceError<E>>`, where `E` is the caller's own error
//! type. Admission rejections, deadline expiry, and saga step failures all
//! surface as dedicated variants, while the caller's errors pass through
//! unchanged inside [`ResilienceError::Application`]. This removes the need
//! for per-primitive `From` conversions when stacking primitives: the outer
//! primitive simply forwards the inner one's error type.

use std::time::Duration;

/// A closed error type covering every way a backstop primitive can fail.
///
/// # Type Parameters
///
/// - `E`: The application-specific error type returned by the protected
///   operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResilienceError<E> {
    /// A circuit breaker rejected admission because it is open.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen {
        /// Name of the breaker instance that rejected the call.
        name: String,
    },

    /// A bulkhead rejected the call because its wait queue is full.
    #[error("bulkhead is full: max concurrent calls ({max_concurrent_calls}) reached")]
    BulkheadFull {
        /// Maximum concurrent calls allowed.
        max_concurrent_calls: usize,
    },

    /// A bulkhead caller waited longer than its configured wait bound.
    #[error("timed out waiting for a bulkhead permit after {waited:?}")]
    BulkheadTimeout {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// A rate limiter rejected admission.
    #[error("rate limit exceeded")]
    RateLimitExceeded {
        /// Time until a permit is expected to free up, when known.
        retry_after: Option<Duration>,
    },

    /// A time limiter's deadline expired before the operation completed.
    #[error("operation timed out after {timeout:?}")]
    Timeout {
        /// The deadline that expired.
        timeout: Duration,
    },

    /// The surrounding task was cancelled.
    ///
    /// Cancellation is transparent: primitives release their permits and
    /// counters through the same paths as success and failure, but record
    /// the call as neither.
    #[error("operation was cancelled")]
    Cancelled,

    /// A repeat loop exhausted its attempts without a satisfying value.
    #[error("condition not met after {attempts} attempts")]
    ConditionNotMet {
        /// Number of attempts that were made.
        attempts: usize,
    },

    /// A saga step's forward action failed.
    #[error("saga step '{step}' failed")]
    SagaStepFailed {
        /// Name of the failing step.
        step: String,
        /// The underlying failure.
        #[source]
        source: Box<ResilienceError<E>>,
    },

    /// A runtime argument was out of range.
    #[error("invalid argument: {what}")]
    InvalidArgument {
        /// Which argument was rejected.
        what: &'static str,
    },

    /// The protected operation itself failed; propagated unchanged.
    #[error("application error")]
    Application(#[source] E),
}

impl<E> ResilienceError<E> {
    /// Returns true if this is a deadline expiry from a time limiter.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ResilienceError::Timeout { .. })
    }

    /// Returns true if a circuit breaker rejected admission.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    /// Returns true if a bulkhead rejected or timed out the call.
    pub fn is_bulkhead_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::BulkheadFull { .. } | ResilienceError::BulkheadTimeout { .. }
        )
    }

    /// Returns true if a rate limiter rejected admission.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ResilienceError::RateLimitExceeded { .. })
    }

    /// Returns true if the surrounding task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled)
    }

    /// Returns true if the protected operation itself failed.
    pub fn is_application(&self) -> bool {
        matches!(self, ResilienceError::Application(_))
    }

    /// Returns a reference to the application error, if that is what this is.
    pub fn application_error(&self) -> Option<&E> {
        match self {
            ResilienceError::Application(e) => Some(e),
            _ => None,
        }
    }

    /// Consumes the error, returning the application error if present.
    pub fn into_application(self) -> Option<E> {
        match self {
            ResilienceError::Application(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the application error type, leaving every other variant intact.
    pub fn map_application<F, E2>(self, f: F) -> ResilienceError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            ResilienceError::Application(e) => ResilienceError::Application(f(e)),
            ResilienceError::CircuitOpen { name } => ResilienceError::CircuitOpen { name },
            ResilienceError::BulkheadFull {
                max_concurrent_calls,
            } => ResilienceError::BulkheadFull {
                max_concurrent_calls,
            },
            ResilienceError::BulkheadTimeout { waited } => {
                ResilienceError::BulkheadTimeout { waited }
            }
            ResilienceError::RateLimitExceeded { retry_after } => {
                ResilienceError::RateLimitExceeded { retry_after }
            }
            ResilienceError::Timeout { timeout } => ResilienceError::Timeout { timeout },
            ResilienceError::Cancelled => ResilienceError::Cancelled,
            ResilienceError::ConditionNotMet { attempts } => {
                ResilienceError::ConditionNotMet { attempts }
            }
            ResilienceError::SagaStepFailed { step, source } => ResilienceError::SagaStepFailed {
                step,
                source: Box::new(source.map_application(f)),
            },
            ResilienceError::InvalidArgument { what } => ResilienceError::InvalidArgument { what },
        }
    }
}
