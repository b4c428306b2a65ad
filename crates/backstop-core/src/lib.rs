//! Core infrastructure for backstop.
//!
//! This crate provides the shared functionality used across all backstop
//! primitives:
//! - Event system for observability
//! - The common error taxonomy surfaced by every `execute` combinator
//! - Clock abstraction so tests can drive virtual time
//! - Registry for managing named instances

pub mod clock;
pub mod error;
pub mod events;
pub mod registry;

pub use clock::{Clock, TokioClock};
pub use error::ResilienceError;
pub use events::{EventListener, EventListeners, FnListener, ListenerHandle, ResilienceEvent};
pub use registry::Registry;
