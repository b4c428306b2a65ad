//! Rate-limiting admission control.
//!
//! Two limiter flavors with one statistics and event surface:
//!
//! - [`TokenBucket`]: continuous-rate admission. Tokens accrue at a fixed
//!   rate up to a burst capacity; `try_execute` rejects on a short bucket,
//!   `execute` sleeps for the deficit.
//! - [`SlidingWindow`]: discrete-window admission. At most `max_requests`
//!   calls within any trailing `window_duration`; admission never queues.
//!
//! Refill-and-deduct and prune-test-insert are each a single atomic
//! action, so concurrent callers can never overdraw the bucket or
//! overfill the window.

mod events;
mod sliding_window;
mod stats;
mod token_bucket;

pub use events::RateLimiterEvent;
pub use sliding_window::{SlidingWindow, SlidingWindowBuilder};
pub use stats::RateLimiterStatistics;
pub use token_bucket::{TokenBucket, TokenBucketBuilder};
