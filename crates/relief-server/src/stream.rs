//! Per-client stream connections and the registry of open streams.
//!
//! A [`StreamConnection`] owns the write side of one client's event stream:
//! a bounded frame sink, a closed flag, and the handle of the task that
//! writes heartbeats and forwards published events. Teardown goes through
//! [`StreamConnection::close`], which is safe to call any number of times
//! from any side (client disconnect, write failure, server shutdown).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::response::sse::Event as SseEvent;
use relief_types::{ConnectedFrame, Event};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One unit written to a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Synthetic first frame announcing the open stream.
    Connected(ConnectedFrame),
    /// A published event.
    Event(Event),
    /// Keep-alive comment line.
    Heartbeat,
}

impl Frame {
    /// Renders the frame as a server-sent event.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if the frame cannot be encoded.
    pub fn into_sse(self) -> Result<SseEvent, serde_json::Error> {
        match self {
            Self::Connected(frame) => Ok(SseEvent::default().data(serde_json::to_string(&frame)?)),
            Self::Event(event) => Ok(SseEvent::default()
                .id(event.id.to_string())
                .data(serde_json::to_string(&event)?)),
            Self::Heartbeat => Ok(SseEvent::default().comment("heartbeat")),
        }
    }
}

/// Lifecycle of a stream connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Result of [`StreamConnection::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// This call performed the teardown.
    Closed,
    /// The connection had already been torn down; nothing was done.
    AlreadyClosed,
}

/// A write was attempted on a connection whose sink is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stream connection is closed")]
pub struct SinkClosed;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The server half of one client's long-lived event stream.
#[derive(Debug)]
pub struct StreamConnection {
    id: Uuid,
    identity: Option<String>,
    sink: Mutex<Option<mpsc::Sender<Frame>>>,
    closed: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnection {
    /// Opens a connection with a frame buffer of `buffer` entries and returns
    /// it with the receiving end that feeds the response body.
    ///
    /// `identity` is the opaque caller identity supplied by the
    /// authentication layer, kept for logging only.
    pub fn open(buffer: usize, identity: Option<String>) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            identity,
            sink: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        });
        (connection, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hands the connection the task that drives its heartbeat.
    ///
    /// If the connection was closed in the meantime the task is aborted
    /// immediately.
    pub fn attach_heartbeat(&self, handle: JoinHandle<()>) {
        let mut slot = lock(&self.heartbeat);
        if self.is_closed() {
            handle.abort();
            return;
        }
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Frame>, SinkClosed> {
        if self.is_closed() {
            return Err(SinkClosed);
        }
        lock(&self.sink).as_ref().cloned().ok_or(SinkClosed)
    }

    /// Writes a frame, waiting for buffer space.
    ///
    /// # Errors
    ///
    /// Returns `SinkClosed` if the connection is closed or the reader is gone.
    pub async fn send(&self, frame: Frame) -> Result<(), SinkClosed> {
        let sender = self.sender()?;
        sender.send(frame).await.map_err(|_| SinkClosed)
    }

    /// Writes a frame without waiting. A full buffer drops the frame, which
    /// is acceptable for best-effort frames such as heartbeats.
    ///
    /// # Errors
    ///
    /// Returns `SinkClosed` if the connection is closed or the reader is gone.
    pub fn try_write(&self, frame: Frame) -> Result<(), SinkClosed> {
        let sender = self.sender()?;
        match sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::trace!(connection = %self.id, "stream buffer full; frame skipped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SinkClosed),
        }
    }

    /// Tears the connection down: marks it closed, cancels the heartbeat
    /// task and drops the sink so the response body ends.
    ///
    /// Only the first call does anything; later calls report
    /// `CloseStatus::AlreadyClosed`.
    pub fn close(&self) -> CloseStatus {
        if self.closed.swap(true, Ordering::AcqRel) {
            return CloseStatus::AlreadyClosed;
        }
        if let Some(handle) = lock(&self.heartbeat).take() {
            handle.abort();
        }
        lock(&self.sink).take();
        tracing::debug!(
            connection = %self.id,
            identity = self.identity.as_deref().unwrap_or("<anonymous>"),
            "stream connection closed"
        );
        CloseStatus::Closed
    }
}

/// Open stream connections keyed by connection id.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    connections: Arc<Mutex<HashMap<Uuid, Arc<StreamConnection>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Arc<StreamConnection>) {
        lock(&self.connections).insert(connection.id(), connection);
    }

    /// Forgets a connection. Returns whether it was registered.
    pub fn remove(&self, id: Uuid) -> bool {
        lock(&self.connections).remove(&id).is_some()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.connections).is_empty()
    }

    /// Closes and forgets every connection; used on server shutdown so
    /// long-lived responses do not hold graceful shutdown open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = lock(&self.connections).drain().map(|(_, c)| c).collect();
        let count = drained.len();
        for connection in drained {
            connection.close();
        }
        count
    }
}

/// Closes a connection when the response body that owns it is dropped,
/// which is how a client disconnect surfaces.
pub(crate) struct DisconnectGuard {
    connection: Arc<StreamConnection>,
    registry: StreamRegistry,
}

impl DisconnectGuard {
    pub(crate) fn new(connection: Arc<StreamConnection>, registry: StreamRegistry) -> Self {
        Self {
            connection,
            registry,
        }
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.registry.remove(self.connection.id());
        if self.connection.close() == CloseStatus::Closed {
            tracing::info!(connection = %self.connection.id(), "client disconnected from event stream");
        }
    }
}
