//! Event system for resilience primitives.
//!
//! Provides a unified event system that all backstop primitives use for
//! observability and monitoring. Listeners can be registered both at build
//! time (through the config builders) and at runtime, and removed again by
//! the handle returned from [`EventListeners::add`].

#[cfg(feature = "tracing")]
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

/// Trait for events emitted by resilience primitives.
pub trait ResilienceEvent: Send + Sync + fmt::Debug {
    /// Returns the type of event (e.g., "state_transition", "call_rejected").
    fn event_type(&self) -> &'static str;

    /// Returns when this event occurred.
    fn timestamp(&self) -> Instant;

    /// Returns the name of the primitive instance that emitted this event.
    fn pattern_name(&self) -> &str;
}

/// Trait for listening to resilience events.
pub trait EventListener<E>: Send + Sync {
    /// Called when an event occurs.
    ///
    /// Listeners run outside the primitive's critical section, but on the
    /// emitting task. A listener must not call back into the same primitive
    /// synchronously; move such work to another task.
    fn on_event(&self, event: &E);
}

/// Type alias for boxed event listeners.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// Identity of a registered listener, used for removal.
///
/// Handles are unique per [`EventListeners`] collection. Removing a handle
/// that was already removed is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

/// A collection of event listeners.
///
/// Registration order is preserved, and an emission dispatches to a
/// consistent snapshot of the listeners registered at that moment, outside
/// the lock guarding the list. Concurrent `add`/`remove` calls never tear an
/// in-progress emission.
pub struct EventListeners<E> {
    listeners: RwLock<Vec<(ListenerHandle, BoxedEventListener<E>)>>,
    next_id: AtomicU64,
}

impl<E> EventListeners<E> {
    /// Creates a new empty event listener collection.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Adds a listener and returns its handle.
    pub fn add<L>(&self, listener: L) -> ListenerHandle
    where
        L: EventListener<E> + 'static,
    {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((handle, Arc::new(listener)));
        handle
    }

    /// Removes a listener by handle.
    ///
    /// Returns `true` if the listener was present. Removing an unknown or
    /// already-removed handle returns `false`.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        listeners.len() != before
    }

    /// Returns true if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Returns the number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

impl<E: ResilienceEvent> EventListeners<E> {
    /// Emits an event to all registered listeners.
    ///
    /// If a listener panics, the panic is caught and the remaining listeners
    /// are still called, so one misbehaving listener cannot prevent others
    /// from receiving events or corrupt the emitting primitive. When the
    /// optional `tracing` feature is enabled, panicking listeners are logged
    /// as warnings; with the `metrics` feature enabled a counter is
    /// incremented for observability.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<BoxedEventListener<E>> = {
            let listeners = self.listeners.read();
            listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for (index, listener) in snapshot.iter().enumerate() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if let Err(_panic_payload) = result {
                #[cfg(feature = "tracing")]
                log_listener_panic(index, event, _panic_payload.as_ref());

                #[cfg(feature = "metrics")]
                record_listener_panic_metric(event);

                #[cfg(not(feature = "tracing"))]
                let _ = index;

                #[cfg(not(any(feature = "tracing", feature = "metrics")))]
                let _ = _panic_payload;
            }
        }
    }

}

impl<E> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple function-based event listener.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

#[cfg(feature = "tracing")]
fn log_listener_panic<E: ResilienceEvent>(
    index: usize,
    event: &E,
    panic_payload: &(dyn Any + Send),
) {
    let panic_message = panic_payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic_payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    tracing::warn!(
        listener_index = index,
        pattern = event.pattern_name(),
        event_type = event.event_type(),
        panic_message = %panic_message,
        "backstop event listener panicked"
    );
}

#[cfg(feature = "metrics")]
fn record_listener_panic_metric<E: ResilienceEvent>(event: &E) {
    let pattern_label = event.pattern_name().to_string();
    let event_type_label = event.event_type().to_string();

    metrics::counter!(
        "backstop_listener_panics_total",
        "pattern" => pattern_label,
        "event_type" => event_type_label
    )
    .increment(1);
}
