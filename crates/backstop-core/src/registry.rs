//! Named-instance registries.
//!
//! A [`Registry`] maps a string name to a single shared instance of a
//! primitive, so independently-wired parts of an application converge on
//! the same breaker, bulkhead, or cache when they agree on a name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// A collection of named instances of one primitive type.
///
/// The registry owns its children exclusively and hands out `Arc` clones.
/// `get_or_create` is idempotent on the name: the builder closure runs at
/// most once per name for the lifetime of the entry.
pub struct Registry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Registry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the instance registered under `name`, creating it with
    /// `init` if absent.
    ///
    /// A later `get` for the same name returns the identical `Arc`.
    pub fn get_or_create<F>(&self, name: &str, init: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.entries.read().get(name) {
            return Arc::clone(existing);
        }

        let mut entries = self.entries.write();
        // Re-check: another task may have created it between the locks.
        if let Some(existing) = entries.get(name) {
            return Arc::clone(existing);
        }

        let created = Arc::new(init());
        entries.insert(name.to_string(), Arc::clone(&created));

        #[cfg(feature = "tracing")]
        tracing::debug!(name, "registered new instance");

        created
    }

    /// Returns the instance registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.read().get(name).map(Arc::clone)
    }

    /// Removes and returns the instance registered under `name`.
    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.entries.write().remove(name)
    }

    /// Returns the registered names, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Returns the number of registered instances.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every registered instance.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
