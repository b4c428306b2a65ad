//! Schedule-driven retry and repeat engines.
//!
//! This crate provides the re-execution half of backstop: a composable
//! [`Schedule`] type and two engines that drive it:
//!
//! - [`Retry`] re-invokes an async operation while it **fails**, with
//!   exponential, Fibonacci, or fixed backoff, optional caps and jitter,
//!   retry predicates, fallback values, and per-attempt history.
//! - [`Repeat`] re-invokes an operation while it **succeeds**, driving the
//!   schedule with the produced values: polling loops, collection runs,
//!   and until/while conditions.
//!
//! # Schedules
//!
//! A schedule produces `(delay, continue?)` decisions and composes:
//!
//! ```
//! use backstop_retry::Schedule;
//! use std::time::Duration;
//!
//! // Exponential from 50ms, capped at 2s, at most 5 retries, ±10% jitter.
//! let schedule: Schedule<()> =
//!     Schedule::exponential(Duration::from_millis(50))
//!         .max_delay(Duration::from_secs(2))
//!         .and(Schedule::recurs(5))
//!         .jittered(0.1);
//! # let _ = schedule;
//! ```
//!
//! # Retrying an operation
//!
//! ```
//! use backstop_retry::Retry;
//! use backstop_core::ResilienceError;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let retry: Retry<std::io::Error> = Retry::builder()
//!     .retries(4)
//!     .exponential_backoff(Duration::from_millis(100))
//!     .jitter(0.1)
//!     .retry_on(|e| !e.is_cancelled())
//!     .name("s3-put")
//!     .build();
//!
//! let result = retry
//!     .execute(|| async {
//!         // the protected call
//!         Ok::<_, ResilienceError<std::io::Error>>(())
//!     })
//!     .await;
//! # let _ = result;
//! # }
//! ```

mod events;
mod repeat;
mod retry;
mod schedule;
mod stats;

pub use events::RetryEvent;
pub use repeat::{Repeat, RepeatBuilder};
pub use retry::{AttemptRecord, Retry, RetryBuilder, RetryOutcome};
pub use schedule::{Decision, Schedule, DEFAULT_JITTER_FACTOR};
pub use stats::RetryStatistics;
