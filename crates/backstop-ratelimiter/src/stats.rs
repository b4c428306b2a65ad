//! Call accounting shared by both limiter flavors.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of a rate limiter's call counters.
///
/// Counters are monotone between explicit resets; cancelled calls are not
/// recorded in any bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimiterStatistics {
    /// Calls that reached an accounted outcome.
    pub total_calls: u64,
    /// Admitted calls that succeeded.
    pub successful_calls: u64,
    /// Admitted calls that failed.
    pub failed_calls: u64,
    /// Calls rejected at admission.
    pub rejected_calls: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCell {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

impl StatsCell {
    pub(crate) fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.successful_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RateLimiterStatistics {
        RateLimiterStatistics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.successful_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.rejected_calls.store(0, Ordering::Relaxed);
    }
}
