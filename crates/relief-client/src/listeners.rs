//! Callback registry notified of every inbound event.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::sse::InboundEvent;

type Listener = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Handle returned by [`EventListeners::add`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    entries: Vec<(ListenerId, Listener)>,
}

/// Set of callbacks invoked, in registration order, for every event the
/// consumer receives. Cloning shares the same set.
#[derive(Clone, Default)]
pub struct EventListeners {
    inner: Arc<Mutex<ListenerSet>>,
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.len())
            .finish()
    }
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, ListenerSet> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, listener: impl Fn(&InboundEvent) + Send + Sync + 'static) -> ListenerId {
        let mut set = self.set();
        set.next_id += 1;
        let id = ListenerId(set.next_id);
        set.entries.push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut set = self.set();
        let before = set.entries.len();
        set.entries.retain(|(existing, _)| *existing != id);
        set.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.set().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener with `event`.
    ///
    /// Listeners run outside the lock, so one may add or remove listeners
    /// (itself included) while being notified.
    pub fn notify(&self, event: &InboundEvent) {
        let snapshot: Vec<Listener> = self
            .set()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}
