//! Composable retry/repeat schedules.
//!
//! A [`Schedule`] is a lazy policy that, for each attempt, produces a
//! [`Decision`]: either stop, or continue after a delay. Schedules are
//! driven by the outcome of the previous attempt (errors for retry,
//! successful values for repeat) and compose with [`Schedule::and`],
//! [`Schedule::jittered`], and [`Schedule::max_delay`].
//!
//! Decisions are computed from the attempt index and the current input, so
//! a schedule can be consulted concurrently and replayed deterministically
//! (jitter excepted, which draws a fresh perturbation per attempt).

use std::sync::Arc;
use std::time::Duration;

/// Default jitter factor applied by [`Schedule::jittered_default`].
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

// Delays beyond this are clamped; keeps f64 math out of Duration overflow.
const MAX_DELAY_SECS: f64 = 1_000_000_000.0;

/// The outcome of consulting a schedule for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run another attempt after waiting for `delay`.
    Continue {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Stop; the schedule is exhausted or its condition was met.
    Done,
}

impl Decision {
    /// Returns the delay if the decision is to continue.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Decision::Continue { delay } => Some(*delay),
            Decision::Done => None,
        }
    }

    /// Returns true if the decision is to continue.
    pub fn is_continue(&self) -> bool {
        matches!(self, Decision::Continue { .. })
    }
}

type Predicate<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;

enum Kind<A> {
    Exponential { base: Duration, factor: f64 },
    Fibonacci { base: Duration },
    Spaced { delay: Duration },
    Recurs { max_retries: usize },
    DoUntil { predicate: Predicate<A> },
    DoWhile { predicate: Predicate<A> },
    Jittered { inner: Box<Schedule<A>>, factor: f64 },
    MaxDelay { inner: Box<Schedule<A>>, cap: Duration },
    And { left: Box<Schedule<A>>, right: Box<Schedule<A>> },
}

/// A lazy, composable retry/repeat policy over inputs of type `A`.
pub struct Schedule<A> {
    kind: Kind<A>,
}

impl<A> Schedule<A> {
    /// Exponential backoff with the default factor of 2.0.
    ///
    /// Attempt `n` (zero-based) yields `base * 2^n`. Unbounded; combine
    /// with [`Schedule::recurs`] via [`Schedule::and`] to cap attempts.
    pub fn exponential(base: Duration) -> Self {
        Self::exponential_with_factor(base, 2.0)
    }

    /// Exponential backoff with a custom multiplier.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is not strictly positive or not finite.
    pub fn exponential_with_factor(base: Duration, factor: f64) -> Self {
        assert!(
            factor > 0.0 && factor.is_finite(),
            "exponential factor must be finite and > 0, got {factor}"
        );
        Self {
            kind: Kind::Exponential { base, factor },
        }
    }

    /// Exponential backoff capped at `max_delay`.
    ///
    /// The cap applies before any jitter layered on top.
    ///
    /// # Panics
    ///
    /// Panics if `factor` is invalid or `max_delay` is zero.
    pub fn exponential_capped(base: Duration, factor: f64, max_delay: Duration) -> Self {
        Self::exponential_with_factor(base, factor).max_delay(max_delay)
    }

    /// Fibonacci backoff: attempt `n` yields `base * fib(n + 1)`
    /// (so the first delays are `base, base, 2*base, 3*base, 5*base, ...`).
    pub fn fibonacci(base: Duration) -> Self {
        Self {
            kind: Kind::Fibonacci { base },
        }
    }

    /// Constant delay between attempts. Unbounded.
    pub fn spaced(delay: Duration) -> Self {
        Self {
            kind: Kind::Spaced { delay },
        }
    }

    /// Continue for at most `max_retries` further attempts, without delay.
    ///
    /// `recurs(0)` never continues: the first attempt is the only one.
    pub fn recurs(max_retries: usize) -> Self {
        Self {
            kind: Kind::Recurs { max_retries },
        }
    }

    /// Continue until the predicate accepts the input.
    pub fn do_until<F>(predicate: F) -> Self
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        Self {
            kind: Kind::DoUntil {
                predicate: Arc::new(predicate),
            },
        }
    }

    /// Continue while the predicate accepts the input.
    pub fn do_while<F>(predicate: F) -> Self
    where
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        Self {
            kind: Kind::DoWhile {
                predicate: Arc::new(predicate),
            },
        }
    }

    /// Perturbs each delay by a uniform draw from `[-factor, +factor]`:
    /// the delay becomes `delay * (1 + r)`.
    ///
    /// Jitter is computed per attempt and never accumulates across
    /// attempts. Apply it outermost so caps stay pre-jitter.
    ///
    /// # Panics
    ///
    /// Panics unless `0.0 <= factor < 1.0`.
    pub fn jittered(self, factor: f64) -> Self {
        assert!(
            (0.0..1.0).contains(&factor),
            "jitter factor must be in [0, 1), got {factor}"
        );
        Self {
            kind: Kind::Jittered {
                inner: Box::new(self),
                factor,
            },
        }
    }

    /// Jitter with [`DEFAULT_JITTER_FACTOR`].
    pub fn jittered_default(self) -> Self {
        self.jittered(DEFAULT_JITTER_FACTOR)
    }

    /// Caps the delay produced by this schedule.
    ///
    /// # Panics
    ///
    /// Panics if `cap` is zero.
    pub fn max_delay(self, cap: Duration) -> Self {
        assert!(!cap.is_zero(), "max_delay cap must be > 0");
        Self {
            kind: Kind::MaxDelay {
                inner: Box::new(self),
                cap,
            },
        }
    }

    /// Element-wise conjunction: continues only when both schedules
    /// continue, waiting for the longer of the two delays.
    pub fn and(self, other: Schedule<A>) -> Self {
        Self {
            kind: Kind::And {
                left: Box::new(self),
                right: Box::new(other),
            },
        }
    }

    /// Consults the schedule after attempt `attempt` (zero-based) finished
    /// with `input`.
    pub fn decide(&self, attempt: usize, input: &A) -> Decision {
        match &self.kind {
            Kind::Exponential { base, factor } => {
                let secs = base.as_secs_f64() * factor.powi(attempt.min(i32::MAX as usize) as i32);
                Decision::Continue {
                    delay: clamp_secs(secs),
                }
            }
            Kind::Fibonacci { base } => Decision::Continue {
                delay: base.saturating_mul(fib(attempt + 1)),
            },
            Kind::Spaced { delay } => Decision::Continue { delay: *delay },
            Kind::Recurs { max_retries } => {
                if attempt < *max_retries {
                    Decision::Continue {
                        delay: Duration::ZERO,
                    }
                } else {
                    Decision::Done
                }
            }
            Kind::DoUntil { predicate } => {
                if predicate(input) {
                    Decision::Done
                } else {
                    Decision::Continue {
                        delay: Duration::ZERO,
                    }
                }
            }
            Kind::DoWhile { predicate } => {
                if predicate(input) {
                    Decision::Continue {
                        delay: Duration::ZERO,
                    }
                } else {
                    Decision::Done
                }
            }
            Kind::Jittered { inner, factor } => match inner.decide(attempt, input) {
                Decision::Continue { delay } => {
                    use rand::Rng;
                    let r = rand::rng().random_range(-*factor..=*factor);
                    Decision::Continue {
                        delay: clamp_secs(delay.as_secs_f64() * (1.0 + r)),
                    }
                }
                Decision::Done => Decision::Done,
            },
            Kind::MaxDelay { inner, cap } => match inner.decide(attempt, input) {
                Decision::Continue { delay } => Decision::Continue {
                    delay: delay.min(*cap),
                },
                Decision::Done => Decision::Done,
            },
            Kind::And { left, right } => {
                match (left.decide(attempt, input), right.decide(attempt, input)) {
                    (
                        Decision::Continue { delay: a },
                        Decision::Continue { delay: b },
                    ) => Decision::Continue { delay: a.max(b) },
                    _ => Decision::Done,
                }
            }
        }
    }
}

fn clamp_secs(secs: f64) -> Duration {
    if !secs.is_finite() || secs < 0.0 {
        Duration::from_secs_f64(MAX_DELAY_SECS)
    } else {
        Duration::from_secs_f64(secs.min(MAX_DELAY_SECS))
    }
}

fn fib(n: usize) -> u32 {
    let (mut a, mut b): (u32, u32) = (0, 1);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}
