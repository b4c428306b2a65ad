//! Attempt bookkeeping shared by the retry and repeat engines.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of an engine's counters.
///
/// All counters are monotone between explicit resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryStatistics {
    /// Number of `execute*` calls started.
    pub total_calls: u64,
    /// Calls that finished with a success.
    pub successful_calls: u64,
    /// Calls that finished with an error (exhausted, rejected by the
    /// predicate, or cancelled).
    pub failed_calls: u64,
    /// Attempts made across all calls, including first attempts.
    pub total_attempts: u64,
    /// Re-attempts that were scheduled and executed.
    pub retries: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCell {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    total_attempts: AtomicU64,
    retries: AtomicU64,
}

impl StatsCell {
    pub(crate) fn record_call_started(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successful_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RetryStatistics {
        RetryStatistics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.successful_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.total_attempts.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }
}
