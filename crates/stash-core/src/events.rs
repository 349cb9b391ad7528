//! Listener registries for model events

use crate::{EventKind, ModelEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Callback invoked for an event; returning `false` stops propagation
pub type Listener = Arc<dyn Fn(&ModelEvent) -> bool + Send + Sync>;

/// Handle returned by [`EventTarget::on`], used to remove the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct EventTarget {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ModelEvent) -> bool + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let Some(stack) = listeners.get_mut(&kind) else {
            return false;
        };
        match stack.iter().position(|(registered, _)| *registered == id) {
            Some(position) => {
                stack.remove(position);
                true
            }
            None => false,
        }
    }

    /// Invoke the listeners for `event.kind` in registration order.
    ///
    /// Returns `false` if a listener stopped propagation.
    pub fn fire(&self, event: &ModelEvent) -> bool {
        // Listeners run without the registry lock so they may register or
        // remove listeners themselves.
        let stack: Vec<Listener> = match self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.kind)
        {
            Some(stack) => stack.iter().map(|(_, l)| l.clone()).collect(),
            None => return true,
        };

        stack.iter().all(|listener| listener(event))
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
