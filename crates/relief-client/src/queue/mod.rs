//! Durable queue of writes that could not be delivered.
//!
//! Writes are persisted before `enqueue` returns and removed only after a
//! successful replay. Draining is serialized: at most one pass runs at a
//! time, guarded by a flag that is released on every exit path.

mod replay;
mod store;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relief_types::QueuedMutation;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::connectivity::{wait_until_online, Connectivity};
use crate::error::QueueError;

pub use replay::{
    AcknowledgeReplayer, HttpReplayer, MutationReplayer, ReplayError, IDEMPOTENCY_KEY_HEADER,
};
pub use store::{MemoryMutationStore, MutationStore, SqliteMutationStore, StoreError};

/// Result of one call to [`MutationQueue::drain`].
#[derive(Debug)]
pub enum DrainOutcome {
    /// Another pass was in progress; nothing was done.
    AlreadyRunning,
    /// Connectivity is down; nothing was done.
    Offline,
    /// A pass ran to completion or stopped early; see the report.
    Completed(DrainReport),
    /// The queued records could not be read.
    Failed(QueueError),
}

/// What a drain pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Records the replayer accepted.
    pub replayed: usize,
    /// Records removed from the store.
    pub removed: usize,
    /// Records the server refused permanently; removed without retry.
    pub rejected: usize,
    /// Records delivered but left in the store because removal failed.
    pub failed_deletes: usize,
    /// The pass stopped at a record that could not be delivered; it and
    /// every later record stay queued.
    pub interrupted: bool,
}

/// Clears the drain flag when a pass ends, however it ends.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The client's offline write queue.
pub struct MutationQueue {
    store: Arc<dyn MutationStore>,
    replayer: Arc<dyn MutationReplayer>,
    connectivity: Connectivity,
    draining: AtomicBool,
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("online", &self.connectivity.is_online())
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

impl MutationQueue {
    pub fn new(
        store: Arc<dyn MutationStore>,
        replayer: Arc<dyn MutationReplayer>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            replayer,
            connectivity,
            draining: AtomicBool::new(false),
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Records a write for later replay and returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Store` if the record could not be persisted; the
    /// write is then not queued and the caller decides what to tell the user.
    pub async fn enqueue(
        &self,
        endpoint: impl Into<String>,
        input: serde_json::Value,
    ) -> Result<QueuedMutation, QueueError> {
        let mutation = QueuedMutation {
            id: Uuid::new_v4().to_string(),
            endpoint: endpoint.into(),
            input,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let store = Arc::clone(&self.store);
        let record = mutation.clone();
        let result = tokio::task::spawn_blocking(move || store.add(&record)).await;
        match result {
            Ok(Ok(())) => {
                tracing::debug!(id = %mutation.id, endpoint = %mutation.endpoint, "queued mutation");
                Ok(mutation)
            }
            Ok(Err(e)) => {
                tracing::warn!(endpoint = %mutation.endpoint, "failed to queue mutation: {}", e);
                Err(e.into())
            }
            Err(e) => {
                tracing::warn!(endpoint = %mutation.endpoint, "mutation store task failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Number of queued records.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.len()).await??)
    }

    /// Every queued record in insertion order.
    pub async fn pending(&self) -> Result<Vec<QueuedMutation>, QueueError> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.all()).await??)
    }

    /// Replays and removes every queued record, in insertion order.
    ///
    /// Returns immediately when another pass is running or the client is
    /// offline. A record whose removal fails stays queued and the pass moves
    /// on. A record that cannot be delivered stops the pass so later records
    /// are never applied ahead of it.
    pub async fn drain(&self) -> DrainOutcome {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            tracing::debug!("drain already in progress");
            return DrainOutcome::AlreadyRunning;
        };
        if !self.connectivity.is_online() {
            return DrainOutcome::Offline;
        }

        let pending = match self.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!("failed to read mutation queue: {}", e);
                return DrainOutcome::Failed(e);
            }
        };
        if pending.is_empty() {
            return DrainOutcome::Completed(DrainReport::default());
        }
        tracing::info!(count = pending.len(), "draining mutation queue");

        let mut report = DrainReport::default();
        for mutation in &pending {
            if !self.connectivity.is_online() {
                report.interrupted = true;
                break;
            }

            match self.replayer.replay(mutation).await {
                Ok(()) => report.replayed += 1,
                Err(e) if e.is_permanent() => {
                    tracing::warn!(id = %mutation.id, endpoint = %mutation.endpoint, "queued mutation rejected, discarding: {}", e);
                    report.rejected += 1;
                }
                Err(e) => {
                    tracing::warn!(id = %mutation.id, endpoint = %mutation.endpoint, "replay failed, stopping drain: {}", e);
                    report.interrupted = true;
                    break;
                }
            }

            if self.remove(&mutation.id).await {
                report.removed += 1;
            } else {
                report.failed_deletes += 1;
            }
        }

        tracing::info!(
            replayed = report.replayed,
            removed = report.removed,
            rejected = report.rejected,
            failed_deletes = report.failed_deletes,
            interrupted = report.interrupted,
            "mutation queue drain finished"
        );
        DrainOutcome::Completed(report)
    }

    async fn remove(&self, id: &str) -> bool {
        let store = Arc::clone(&self.store);
        let owned = id.to_string();
        match tokio::task::spawn_blocking(move || store.delete(&owned)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(id, "failed to remove queued mutation: {}", e);
                false
            }
            Err(e) => {
                tracing::warn!(id, "mutation store task failed: {}", e);
                false
            }
        }
    }
}

/// Drains `queue` once now if online, then on every offline-to-online
/// transition. Runs until aborted.
///
/// The watch channel only keeps the latest value, so an offline-online
/// flip that happens while a pass runs reads as "still online". Passes are
/// keyed on [`Connectivity::online_transitions`] instead, which counts
/// every flip.
pub fn spawn_auto_drain(queue: Arc<MutationQueue>) -> JoinHandle<()> {
    let mut rx = queue.connectivity().subscribe();
    tokio::spawn(async move {
        'passes: loop {
            if !wait_until_online(&mut rx).await {
                break;
            }
            let drained_at = queue.connectivity().online_transitions();
            let outcome = queue.drain().await;
            tracing::debug!(?outcome, "auto drain pass");

            // Sit out the rest of this online period.
            loop {
                if rx.changed().await.is_err() {
                    break 'passes;
                }
                if queue.connectivity().online_transitions() != drained_at {
                    break;
                }
            }
        }
        tracing::debug!("auto drain stopped");
    })
}
