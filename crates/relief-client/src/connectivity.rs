//! Online/offline signal supplied by the host environment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Shared connectivity flag. Receivers are only notified on transitions.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
    came_online: Arc<AtomicU64>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self {
            tx: Arc::new(tx),
            came_online: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records that the host came online. Returns whether this was a change.
    pub fn set_online(&self) -> bool {
        self.set(true)
    }

    /// Records that the host went offline. Returns whether this was a change.
    pub fn set_offline(&self) -> bool {
        self.set(false)
    }

    fn set(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                if online {
                    self.came_online.fetch_add(1, Ordering::AcqRel);
                }
                true
            }
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of offline-to-online transitions so far. Bumped before
    /// receivers are notified, so it also counts flips a receiver only
    /// sees coalesced into a single change.
    pub fn online_transitions(&self) -> u64 {
        self.came_online.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Resolves once `rx` reports online. Returns `false` if the signal source
/// went away first.
pub(crate) async fn wait_until_online(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|online| *online).await.is_ok()
}
