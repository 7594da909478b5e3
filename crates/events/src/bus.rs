use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use agentmesh_core::Event;

/// Does `pattern` match the concrete event `name`?
///
/// Rules: exact equality; a lone `"*"` matches everything; a pattern ending
/// in `".*"` matches any name sharing that literal prefix (the pattern minus
/// the trailing `*`).
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if prefix.ends_with('.') {
            return name.starts_with(prefix);
        }
    }
    pattern == name
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct ListenerEntry {
    id: u64,
    pattern: String,
    callback: Listener,
}

struct Inner {
    listeners: Vec<ListenerEntry>,
    next_id: u64,
    history: VecDeque<Event>,
    history_limit: usize,
}

/// Process-wide publish/subscribe hub.
///
/// Dispatch is synchronous and in subscription order; a panicking listener is
/// caught and logged so the remaining listeners still run. There is exactly
/// one instance per process graph, constructed explicitly and passed to every
/// component that needs it.
pub struct EventBus {
    inner: Mutex<Inner>,
}

impl EventBus {
    pub fn new(history_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                listeners: Vec::new(),
                next_id: 1,
                history: VecDeque::new(),
                history_limit,
            }),
        })
    }

    /// Register a listener for every event whose name matches `pattern`.
    /// The returned handle removes the listener when `unsubscribe` is called;
    /// dropping the handle without calling it leaves the listener in place.
    pub fn subscribe(
        self: &Arc<Self>,
        pattern: &str,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push(ListenerEntry {
            id,
            pattern: pattern.to_string(),
            callback: Arc::new(callback),
        });
        debug!(pattern, id, "listener subscribed");
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    /// Publish an event. Every listener whose pattern matches is invoked
    /// synchronously, in subscription order, before `emit` returns.
    pub fn emit(&self, name: &str, payload: Value) {
        let event = Event::new(name, payload);
        let matching: Vec<Listener> = {
            let mut inner = self.inner.lock().expect("event bus lock poisoned");
            inner.history.push_back(event.clone());
            while inner.history.len() > inner.history_limit {
                inner.history.pop_front();
            }
            inner
                .listeners
                .iter()
                .filter(|entry| pattern_matches(&entry.pattern, name))
                .map(|entry| entry.callback.clone())
                .collect()
        };

        for callback in matching {
            // Listener panics must not starve the rest of the dispatch.
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                warn!(event = name, panic = %msg, "listener panicked during dispatch");
            }
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.listeners.retain(|entry| entry.id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().expect("event bus lock poisoned").listeners.len()
    }

    /// Recent events, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.inner
            .lock()
            .expect("event bus lock poisoned")
            .history
            .iter()
            .cloned()
            .collect()
    }
}

/// Handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    id: u64,
    bus: Weak<EventBus>,
}

impl Subscription {
    /// Remove the listener. Idempotent; a no-op if the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
