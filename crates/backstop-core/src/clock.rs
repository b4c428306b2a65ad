//! Clock abstraction for time-dependent primitives.
//!
//! Every primitive that reads the time or sleeps takes its clock through
//! [`Clock`], so tests can drive virtual time. The default implementation
//! delegates to `tokio::time`, which means
//! `#[tokio::test(start_paused = true)]` already gives deterministic,
//! instantly-advancing time without a separate fake.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

/// Monotonic time source plus a cancellable sleep.
///
/// `sleep` futures are cancelled by dropping them; callers racing a sleep
/// against other work (deadline enforcement, wait bounds) rely on that.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;

    /// Returns a future that resolves after `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// The default clock, backed by `tokio::time`.
///
/// Under a paused tokio runtime this follows the test-controlled virtual
/// clock, including `tokio::time::advance`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Returns the shared default clock.
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock)
}
