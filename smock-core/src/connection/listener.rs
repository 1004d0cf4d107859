//! Event listeners and the listener registry shared by connection implementations.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::event::{Event, EventType};

/// Object-style listener: anything with a `handle_event` method.
pub trait EventHandler: Send + Sync {
    /// Handle a dispatched event.
    fn handle_event(&self, event: &Event);
}

/// Identity of a listener, derived from its shared allocation.
///
/// Two `EventListener` values are the same listener exactly when they were
/// cloned from one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

/// A listener registered for an event type.
///
/// Both calling conventions are accepted: a plain closure, or an object
/// implementing [`EventHandler`]. The variant is fixed when the listener is
/// created.
#[derive(Clone)]
pub enum EventListener {
    /// Closure listener
    Function(Arc<dyn Fn(&Event) + Send + Sync>),
    /// Object listener
    Handler(Arc<dyn EventHandler>),
}

impl EventListener {
    /// Wrap a closure.
    pub fn function(f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        EventListener::Function(Arc::new(f))
    }

    /// Wrap a handler object.
    pub fn handler(handler: Arc<dyn EventHandler>) -> Self {
        EventListener::Handler(handler)
    }

    /// Deliver `event` to this listener.
    pub fn invoke(&self, event: &Event) {
        match self {
            EventListener::Function(f) => f(event),
            EventListener::Handler(handler) => handler.handle_event(event),
        }
    }

    /// Reference identity of this listener.
    pub fn id(&self) -> ListenerId {
        let ptr = match self {
            EventListener::Function(f) => Arc::as_ptr(f) as *const () as usize,
            EventListener::Handler(handler) => Arc::as_ptr(handler) as *const () as usize,
        };
        ListenerId(ptr)
    }

    /// Whether `self` and `other` are the same listener.
    pub fn same(&self, other: &EventListener) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            EventListener::Function(_) => "Function",
            EventListener::Handler(_) => "Handler",
        };
        f.debug_struct("EventListener")
            .field("kind", &kind)
            .field("id", &self.id())
            .finish()
    }
}

/// Listener bookkeeping and dispatch for a connection.
///
/// Follows DOM semantics: a `(type, listener)` pair is held at most once and
/// listeners run in registration order.
#[derive(Default)]
pub struct EventTarget {
    listeners: RwLock<Vec<(EventType, EventListener)>>,
}

impl EventTarget {
    /// Create an empty target.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event_type`. Returns `false` if it was already registered.
    pub fn add(&self, event_type: EventType, listener: EventListener) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners
            .iter()
            .any(|(t, l)| *t == event_type && l.same(&listener))
        {
            return false;
        }
        listeners.push((event_type, listener));
        true
    }

    /// Unregister `listener` for `event_type`. Returns `false` if it was not registered.
    pub fn remove(&self, event_type: &EventType, listener: &EventListener) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(t, l)| !(t == event_type && l.same(listener)));
        listeners.len() != before
    }

    /// Number of listeners registered for `event_type`.
    pub fn count(&self, event_type: &EventType) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(t, _)| t == event_type)
            .count()
    }

    /// Deliver `event` to every listener registered for its type.
    ///
    /// Listeners are snapshotted first so a listener may add or remove
    /// listeners while being invoked.
    pub fn dispatch(&self, event: &Event) {
        let snapshot: Vec<EventListener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(t, _)| *t == event.event_type)
            .map(|(_, l)| l.clone())
            .collect();

        for listener in snapshot {
            listener.invoke(event);
        }
    }
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("EventTarget").field("listeners", &len).finish()
    }
}
