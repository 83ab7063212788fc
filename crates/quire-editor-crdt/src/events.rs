//! Single-threaded publish/subscribe.
//!
//! Components that emit events own an [`EventEmitter`] and expose only
//! registration. Registering returns a [`Subscription`]; dropping it (or
//! calling [`Subscription::unsubscribe`]) removes the listener.
//!
//! Delivery is synchronous and in registration order. A listener may emit
//! further events, register listeners or drop subscriptions while being
//! called; listeners removed mid-delivery are not called afterwards.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

type Listener<E> = Rc<dyn Fn(&E)>;

struct Listeners<E> {
    next_id: u64,
    entries: Vec<(u64, Listener<E>)>,
}

impl<E> Listeners<E> {
    fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Owner side of an event stream.
pub struct EventEmitter<E> {
    listeners: Rc<RefCell<Listeners<E>>>,
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<E: 'static> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.borrow().entries.len())
            .finish()
    }
}

impl<E: 'static> EventEmitter<E> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener. It stays registered while the returned
    /// subscription is alive.
    pub fn on(&self, listener: impl Fn(&E) + 'static) -> Subscription {
        let id = {
            let mut listeners = self.listeners.borrow_mut();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Rc::new(listener)));
            id
        };

        let weak: Weak<RefCell<Listeners<E>>> = Rc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.borrow_mut().remove(id);
            }
        })
    }

    /// Deliver `event` to every listener registered at call time.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<(u64, Listener<E>)> = self.listeners.borrow().entries.clone();
        for (id, listener) in snapshot {
            if !self.listeners.borrow().contains(id) {
                continue;
            }
            listener(event);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }
}

/// Registration handle returned by `on`/`subscribe` methods.
///
/// Unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap an unsubscribe action.
    pub fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keep the listener registered for the emitter's whole lifetime.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
