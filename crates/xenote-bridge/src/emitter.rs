//! Named-event publish/subscribe.
//!
//! Listeners are kept per event name in registration order. Emission works on
//! a snapshot of the listener list taken when `emit` is called, so listeners
//! may subscribe or unsubscribe from inside a callback without affecting the
//! emission in progress.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use crate::lock;

/// A shared event callback. Identity (the `Arc` allocation) is what makes two
/// registrations "the same listener".
pub type Listener<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;

type ListenerId = u64;

type Registry<T> = HashMap<String, Vec<(ListenerId, Listener<T>)>>;

/// String-keyed event emitter.
pub struct Emitter<T> {
    listeners: Arc<Mutex<Registry<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `listener` for `event`.
    ///
    /// Registering the same `Arc` twice for one event is a no-op; the returned
    /// subscription then refers to the existing registration.
    pub fn on(&self, event: &str, listener: Listener<T>) -> Subscription<T> {
        let mut registry = lock(&self.listeners);
        let entries = registry.entry(event.to_string()).or_default();

        let existing = entries
            .iter()
            .find(|(_, l)| same_listener(l, &listener))
            .map(|(id, _)| *id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                entries.push((id, listener));
                id
            }
        };

        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            event: event.to_string(),
            id,
        }
    }

    /// Register a closure for `event`.
    pub fn on_fn<F>(&self, event: &str, f: F) -> Subscription<T>
    where
        F: Fn(Option<&T>) + Send + Sync + 'static,
    {
        self.on(event, Arc::new(f))
    }

    /// Invoke every listener registered for `event` at the time of the call.
    ///
    /// Returns the number of listeners invoked.
    pub fn emit(&self, event: &str, value: Option<&T>) -> usize {
        let snapshot: Vec<Listener<T>> = {
            let registry = lock(&self.listeners);
            match registry.get(event) {
                Some(entries) => entries.iter().map(|(_, l)| l.clone()).collect(),
                None => return 0,
            }
        };

        trace!(event, listeners = snapshot.len(), "Emit");
        for listener in &snapshot {
            listener(value);
        }
        snapshot.len()
    }

    /// Remove every listener from every event.
    pub fn destroy(&self) {
        let mut registry = lock(&self.listeners);
        for entries in registry.values_mut() {
            entries.clear();
        }
        registry.clear();
    }

    /// Number of listeners currently registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.listeners).get(event).map_or(0, |v| v.len())
    }
}

fn same_listener<T>(a: &Listener<T>, b: &Listener<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Handle returned by [`Emitter::on`].
///
/// Dropping it does not unsubscribe.
pub struct Subscription<T> {
    listeners: Weak<Mutex<Registry<T>>>,
    event: String,
    id: ListenerId,
}

impl<T> Subscription<T> {
    /// Remove exactly this listener. Returns `false` if it was already gone
    /// (unsubscribed, destroyed, or the emitter was dropped).
    pub fn unsubscribe(&self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut registry = lock(&listeners);
        let Some(entries) = registry.get_mut(&self.event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != self.id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            registry.remove(&self.event);
        }
        removed
    }
}
