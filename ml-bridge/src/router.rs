//! Named event dispatch.
//!
//! Handlers are kept per event name in registration order and all of them
//! run for every matching event. Registering again for a name adds a
//! handler rather than replacing the existing one; use
//! [`EventRouter::clear`] first to replace.
//!
//! Dispatch is synchronous on the caller's task (the connection driver);
//! nothing is queued.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Identifies one registered handler
pub type HandlerId = u64;

/// Event handler, called with the event name and its optional payload
pub type EventHandler = Arc<dyn Fn(&str, Option<&Value>) + Send + Sync>;

#[derive(Default)]
pub struct EventRouter {
    handlers: DashMap<String, Vec<(HandlerId, EventHandler)>>,
    next_id: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `event`
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&str, Option<&Value>) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let event = event.into();
        trace!(event = %event, handler_id = id, "Registering event handler");
        self.handlers
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler. Returns false if it was not registered for `event`.
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let Some(mut entry) = self.handlers.get_mut(event) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(handler_id, _)| *handler_id != id);
        let removed = entry.len() != before;
        let now_empty = entry.is_empty();
        drop(entry);

        if now_empty {
            self.handlers.remove_if(event, |_, handlers| handlers.is_empty());
        }
        removed
    }

    /// Remove every handler for `event`, returning how many were removed
    pub fn clear(&self, event: &str) -> usize {
        self.handlers
            .remove(event)
            .map_or(0, |(_, handlers)| handlers.len())
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, |handlers| handlers.len())
    }

    /// Invoke every handler registered for `event`, in registration order.
    ///
    /// Returns the number of handlers invoked; unregistered events are
    /// dropped. Handlers are cloned out first so they may register or remove
    /// handlers themselves.
    pub fn dispatch(&self, event: &str, payload: Option<&Value>) -> usize {
        let handlers: Vec<EventHandler> = match self.handlers.get(event) {
            Some(entry) => entry.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            None => {
                trace!(event = event, "No handler for event, dropping");
                return 0;
            }
        };

        for handler in &handlers {
            handler(event, payload);
        }
        handlers.len()
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("EventRouter").field("events", &events).finish()
    }
}
