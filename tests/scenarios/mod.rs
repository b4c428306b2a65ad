//! Scenario organization:
//! - breaker.rs: opening, rejecting, and recovering through half-open
//! - bulkhead.rs: FIFO admission under contention
//! - ratelimiter.rs: burst exhaustion and refill
//! - timelimiter.rs: deadline accounting
//! - saga.rs: reverse-order compensation
//! - cache.rs: LRU eviction choice

mod breaker;
mod bulkhead;
mod cache;
mod ratelimiter;
mod saga;
mod timelimiter;
