mod bulkhead;
mod cache;
mod circuit_breaker;
mod rate_limiter;
mod saga;
