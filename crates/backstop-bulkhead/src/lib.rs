//! Bounded-concurrency bulkhead.
//!
//! A [`Bulkhead`] caps how many calls run a protected operation at once
//! and how many may queue for a slot. Waiters acquire permits in FIFO
//! order; an optional wait bound turns a stalled queue into a fast
//! failure instead of unbounded buildup.
//!
//! Admission tries a free permit first: a call that can run immediately
//! never enters the queue. Otherwise:
//!
//! 1. If the wait queue is full, the call is rejected immediately with
//!    [`ResilienceError::BulkheadFull`].
//! 2. Otherwise the call queues for a concurrency permit. If
//!    `max_wait_duration` elapses first, the call fails with
//!    [`ResilienceError::BulkheadTimeout`].
//!
//! Permits and counters are released through RAII on every exit path,
//! including cancellation.
//!
//! # Example
//!
//! ```
//! use backstop_bulkhead::Bulkhead;
//! use backstop_core::ResilienceError;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let bulkhead = Bulkhead::builder()
//!     .max_concurrent_calls(10)
//!     .max_waiting_calls(50)
//!     .max_wait_duration(Duration::from_millis(250))
//!     .name("search-index")
//!     .build();
//!
//! let result = bulkhead
//!     .execute(|| async { Ok::<_, ResilienceError<&str>>("hit") })
//!     .await;
//! assert_eq!(result.unwrap(), "hit");
//! # }
//! ```

mod config;
mod events;

pub use config::{BulkheadConfig, BulkheadConfigBuilder};
pub use events::BulkheadEvent;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant as WallInstant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use backstop_core::{EventListener, ListenerHandle, ResilienceError};

/// Point-in-time snapshot of a bulkhead's call counters.
///
/// `total_calls` always equals `successful_calls + failed_calls +
/// rejected_calls`; cancelled calls release their resources without
/// being recorded in any bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkheadStatistics {
    /// Calls that reached an accounted outcome.
    pub total_calls: u64,
    /// Admitted calls that succeeded.
    pub successful_calls: u64,
    /// Admitted calls that failed.
    pub failed_calls: u64,
    /// Calls rejected at admission, whether queue-full or wait-timeout.
    pub rejected_calls: u64,
}

#[derive(Default)]
struct StatsCell {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

#[derive(Default)]
struct Counts {
    waiting: usize,
    active: usize,
}

/// The bulkhead primitive. Cheap to clone; clones share state.
pub struct Bulkhead {
    config: Arc<BulkheadConfig>,
    semaphore: Arc<Semaphore>,
    counts: Arc<Mutex<Counts>>,
    stats: Arc<StatsCell>,
}

impl Clone for Bulkhead {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            semaphore: Arc::clone(&self.semaphore),
            counts: Arc::clone(&self.counts),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Decrements the waiting count when a queued caller leaves the queue for
/// any reason, including being dropped while waiting.
struct WaitingGuard {
    counts: Arc<Mutex<Counts>>,
    armed: bool,
}

impl WaitingGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.counts.lock().waiting -= 1;
        }
    }
}

/// Decrements the active count when an admitted call finishes for any
/// reason; the owned permit it carries releases the semaphore slot.
struct ActiveGuard {
    counts: Arc<Mutex<Counts>>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counts.lock().active -= 1;
    }
}

impl Bulkhead {
    /// Creates a new configuration builder.
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    pub(crate) fn from_config(config: BulkheadConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_calls));
        Self {
            config: Arc::new(config),
            semaphore,
            counts: Arc::new(Mutex::new(Counts::default())),
            stats: Arc::new(StatsCell::default()),
        }
    }

    /// Runs `op` once a concurrency permit is available.
    ///
    /// Queue-full rejections and wait timeouts surface as
    /// [`ResilienceError::BulkheadFull`] and
    /// [`ResilienceError::BulkheadTimeout`]; operation errors propagate
    /// unchanged.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError<E>>>,
    {
        let config = &self.config;
        let start = config.clock.now();

        // Fast path: a free permit admits the call without queueing.
        let mut waiting_guard: Option<WaitingGuard> = None;
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                // Queue-full test and waiting increment are one transaction.
                {
                    let mut counts = self.counts.lock();
                    if counts.waiting >= config.max_waiting_calls {
                        drop(counts);
                        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
                        self.stats.rejected_calls.fetch_add(1, Ordering::Relaxed);

                        #[cfg(feature = "metrics")]
                        metrics::counter!("backstop_bulkhead_calls_rejected_total", "bulkhead" => config.name.clone()).increment(1);

                        #[cfg(feature = "tracing")]
                        tracing::warn!(bulkhead = %config.name, "wait queue full, rejecting call");

                        config.event_listeners.emit(&BulkheadEvent::CallRejected {
                            pattern_name: config.name.clone(),
                            timestamp: WallInstant::now(),
                            max_concurrent_calls: config.max_concurrent_calls,
                        });
                        return Err(ResilienceError::BulkheadFull {
                            max_concurrent_calls: config.max_concurrent_calls,
                        });
                    }
                    counts.waiting += 1;
                }

                waiting_guard = Some(WaitingGuard {
                    counts: Arc::clone(&self.counts),
                    armed: true,
                });

                // FIFO wait for a permit, optionally bounded.
                let acquired = match config.max_wait_duration {
                    Some(max_wait) => {
                        let acquire = Arc::clone(&self.semaphore).acquire_owned();
                        tokio::select! {
                            biased;
                            permit = acquire => Some(permit),
                            _ = config.clock.sleep(max_wait) => None,
                        }
                    }
                    None => Some(Arc::clone(&self.semaphore).acquire_owned().await),
                };

                match acquired {
                    Some(Ok(permit)) => permit,
                    Some(Err(_closed)) => {
                        // The semaphore is never closed while the bulkhead
                        // lives.
                        drop(waiting_guard);
                        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
                        self.stats.rejected_calls.fetch_add(1, Ordering::Relaxed);
                        return Err(ResilienceError::BulkheadFull {
                            max_concurrent_calls: config.max_concurrent_calls,
                        });
                    }
                    None => {
                        let waited = config.clock.now() - start;
                        drop(waiting_guard);
                        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
                        self.stats.rejected_calls.fetch_add(1, Ordering::Relaxed);

                        #[cfg(feature = "metrics")]
                        metrics::counter!("backstop_bulkhead_calls_rejected_total", "bulkhead" => config.name.clone()).increment(1);

                        config.event_listeners.emit(&BulkheadEvent::CallTimedOut {
                            pattern_name: config.name.clone(),
                            timestamp: WallInstant::now(),
                            waited,
                        });
                        return Err(ResilienceError::BulkheadTimeout { waited });
                    }
                }
            }
        };

        // Leave the queue (when queued) and become active in one
        // transaction.
        let concurrent_calls = {
            let mut counts = self.counts.lock();
            if let Some(guard) = waiting_guard.as_mut() {
                counts.waiting -= 1;
                guard.disarm();
            }
            counts.active += 1;
            counts.active
        };

        let active_guard = ActiveGuard {
            counts: Arc::clone(&self.counts),
            _permit: permit,
        };

        config.event_listeners.emit(&BulkheadEvent::CallPermitted {
            pattern_name: config.name.clone(),
            timestamp: WallInstant::now(),
            concurrent_calls,
        });

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("backstop_bulkhead_calls_permitted_total", "bulkhead" => config.name.clone()).increment(1);
            metrics::gauge!("backstop_bulkhead_concurrent_calls", "bulkhead" => config.name.clone())
                .set(concurrent_calls as f64);
        }

        let result = op().await;
        drop(active_guard);

        let duration = config.clock.now() - start;
        match &result {
            Ok(_) => {
                self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
                self.stats.successful_calls.fetch_add(1, Ordering::Relaxed);
                config.event_listeners.emit(&BulkheadEvent::CallFinished {
                    pattern_name: config.name.clone(),
                    timestamp: WallInstant::now(),
                    duration,
                });
            }
            Err(error) if error.is_cancelled() => {
                // Resources are already released; cancellation is not
                // recorded in any bucket.
            }
            Err(_) => {
                self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
                self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
                config.event_listeners.emit(&BulkheadEvent::CallFailed {
                    pattern_name: config.name.clone(),
                    timestamp: WallInstant::now(),
                    duration,
                });
            }
        }

        result
    }

    /// Active calls right now.
    pub fn active_calls(&self) -> usize {
        self.counts.lock().active
    }

    /// Callers queued for a permit right now.
    pub fn waiting_calls(&self) -> usize {
        self.counts.lock().waiting
    }

    /// Permits still available: `max_concurrent_calls - active_calls`.
    pub fn available_capacity(&self) -> usize {
        self.config
            .max_concurrent_calls
            .saturating_sub(self.counts.lock().active)
    }

    /// Fraction of the concurrency cap currently in use.
    pub fn utilization_rate(&self) -> f64 {
        self.counts.lock().active as f64 / self.config.max_concurrent_calls as f64
    }

    /// Returns a snapshot of the call counters.
    pub fn statistics(&self) -> BulkheadStatistics {
        BulkheadStatistics {
            total_calls: self.stats.total_calls.load(Ordering::Relaxed),
            successful_calls: self.stats.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.stats.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.stats.rejected_calls.load(Ordering::Relaxed),
        }
    }

    /// Resets all call counters to zero.
    pub fn reset_statistics(&self) {
        self.stats.total_calls.store(0, Ordering::Relaxed);
        self.stats.successful_calls.store(0, Ordering::Relaxed);
        self.stats.failed_calls.store(0, Ordering::Relaxed);
        self.stats.rejected_calls.store(0, Ordering::Relaxed);
    }

    /// Registers a listener at runtime; returns a handle for removal.
    pub fn add_listener<L>(&self, listener: L) -> ListenerHandle
    where
        L: EventListener<BulkheadEvent> + 'static,
    {
        self.config.event_listeners.add(listener)
    }

    /// Removes a previously registered listener. Idempotent.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.config.event_listeners.remove(handle)
    }

    /// The instance name used in events and logs.
    pub fn name(&self) -> &str {
        &self.config.name
    }
}
