//! The client's single event stream subscription.
//!
//! One background task owns the only stream. It cycles
//! `Disconnected -> Connecting -> Connected -> Disconnected` for as long as
//! the owning [`ConsumerHandle`] lives: any transport error, end of body or
//! silence longer than the idle timeout leads to a fixed-delay reconnect.
//! There is no backoff and no retry limit.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::connectivity::{wait_until_online, Connectivity};
use crate::dispatch::{CacheInvalidator, DispatchTable};
use crate::error::ConsumerError;
use crate::listeners::EventListeners;
use crate::sse::{parse_line, InboundEvent, LineBuffer};

const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";
const IDENTITY_HEADER: &str = "X-Relief-Identity";

/// Connection state of the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Connected,
}

/// Consumer tunables.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Full URL of the stream endpoint, e.g. `http://host:3000/events/stream`.
    pub stream_url: String,
    /// Wait between a stream failure and the next attempt.
    pub reconnect_delay: Duration,
    /// Longest silence tolerated on an open stream; should exceed the
    /// server's heartbeat interval.
    pub idle_timeout: Duration,
    /// Restrict the stream to these channels; empty means all.
    pub channels: Vec<String>,
    /// Opaque identity forwarded to the server.
    pub identity: Option<String>,
}

impl ConsumerConfig {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            reconnect_delay: Duration::from_millis(relief_types::DEFAULT_RECONNECT_DELAY_MS),
            idle_timeout: Duration::from_millis(
                relief_types::DEFAULT_HEARTBEAT_INTERVAL_SECS * 1_000
                    + relief_types::DEFAULT_STALL_GRACE_MS,
            ),
            channels: Vec::new(),
            identity: None,
        }
    }

    fn request_url(&self) -> String {
        if self.channels.is_empty() {
            self.stream_url.clone()
        } else {
            let separator = if self.stream_url.contains('?') { '&' } else { '?' };
            format!(
                "{}{}channels={}",
                self.stream_url,
                separator,
                self.channels.join(",")
            )
        }
    }
}

/// Whether an event followed the previous one without a hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuity {
    First,
    InOrder,
    Gap,
}

/// Last event id seen across reconnects.
#[derive(Debug, Default)]
struct ResumePoint {
    last_id: Option<u64>,
}

impl ResumePoint {
    fn observe(&mut self, id: u64) -> Continuity {
        let continuity = match self.last_id {
            None => Continuity::First,
            Some(last) if last.checked_add(1) == Some(id) => Continuity::InOrder,
            // Either events were evicted before we resumed, or the server
            // restarted and its ids began again.
            Some(_) => Continuity::Gap,
        };
        self.last_id = Some(id);
        continuity
    }
}

/// Subscribes to the server's event stream and invalidates local caches.
pub struct EventConsumer {
    client: reqwest::Client,
    config: ConsumerConfig,
    table: Arc<DispatchTable>,
    invalidator: Arc<dyn CacheInvalidator>,
    listeners: EventListeners,
    connectivity: Connectivity,
}

impl EventConsumer {
    /// # Errors
    ///
    /// Returns `ConsumerError::Transport` if the HTTP client cannot be built.
    pub fn new(
        config: ConsumerConfig,
        table: DispatchTable,
        invalidator: Arc<dyn CacheInvalidator>,
        connectivity: Connectivity,
    ) -> Result<Self, ConsumerError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            config,
            table: Arc::new(table),
            invalidator,
            listeners: EventListeners::new(),
            connectivity,
        })
    }

    /// The listener registry notified of every received event.
    pub fn listeners(&self) -> EventListeners {
        self.listeners.clone()
    }

    /// Starts the background task.
    pub fn spawn(self) -> ConsumerHandle {
        let (state_tx, state_rx) = watch::channel(ConsumerState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(state_tx, shutdown_rx));
        ConsumerHandle {
            state: state_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    async fn run(self, state: watch::Sender<ConsumerState>, mut shutdown: watch::Receiver<bool>) {
        let mut resume = ResumePoint::default();
        let mut online = self.connectivity.subscribe();
        let mut attempt: u64 = 0;

        loop {
            if !self.connectivity.is_online() {
                tracing::debug!("offline; waiting before connecting event stream");
                tokio::select! {
                    came_online = wait_until_online(&mut online) => {
                        if !came_online {
                            break;
                        }
                    }
                    () = shutdown_requested(&mut shutdown) => break,
                }
            }

            attempt += 1;
            state.send_replace(ConsumerState::Connecting);
            let outcome = tokio::select! {
                outcome = self.stream_once(&state, &mut resume) => outcome,
                () = shutdown_requested(&mut shutdown) => break,
            };
            state.send_replace(ConsumerState::Disconnected);

            match outcome {
                Ok(()) => tracing::info!(
                    attempt,
                    delay_ms = self.config.reconnect_delay.as_millis() as u64,
                    "event stream ended; reconnecting"
                ),
                Err(e) => tracing::warn!(
                    attempt,
                    delay_ms = self.config.reconnect_delay.as_millis() as u64,
                    "event stream failed: {}; reconnecting",
                    e
                ),
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.reconnect_delay) => {}
                () = shutdown_requested(&mut shutdown) => break,
            }
        }

        state.send_replace(ConsumerState::Disconnected);
        tracing::info!("event consumer stopped");
    }

    /// Runs one stream from request to termination.
    async fn stream_once(
        &self,
        state: &watch::Sender<ConsumerState>,
        resume: &mut ResumePoint,
    ) -> Result<(), ConsumerError> {
        let mut request = self
            .client
            .get(self.config.request_url())
            .header(ACCEPT, "text/event-stream");
        if let Some(last_id) = resume.last_id {
            request = request.header(LAST_EVENT_ID_HEADER, last_id.to_string());
        }
        if let Some(identity) = &self.config.identity {
            request = request.header(IDENTITY_HEADER, identity);
        }

        let idle = self.config.idle_timeout;
        let response = timeout(idle, request.send())
            .await
            .map_err(|_| ConsumerError::Stalled(idle))??
            .error_for_status()?;

        state.send_replace(ConsumerState::Connected);
        tracing::info!(url = %self.config.stream_url, resume_from = resume.last_id, "event stream connected");

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();
        loop {
            let chunk = match timeout(idle, body.next()).await {
                Err(_) => return Err(ConsumerError::Stalled(idle)),
                Ok(None) => return Ok(()),
                Ok(Some(chunk)) => chunk?,
            };
            for line in lines.push(&chunk) {
                if let Some(event) = parse_line(&line) {
                    self.handle_event(event, resume);
                }
            }
        }
    }

    fn handle_event(&self, event: InboundEvent, resume: &mut ResumePoint) {
        if let Some(id) = event.id {
            let continuity = resume.observe(id);
            // A channel-filtered stream skips ids by design.
            if continuity == Continuity::Gap && self.config.channels.is_empty() {
                let invalidated = self.table.invalidate_all(self.invalidator.as_ref());
                tracing::info!(id, invalidated, "gap in event ids; invalidated all caches");
            }
        }

        self.listeners.notify(&event);
        let invalidated = self
            .table
            .dispatch(&event.event_type, self.invalidator.as_ref());
        tracing::debug!(
            id = event.id,
            event_type = %event.event_type,
            invalidated,
            "handled event"
        );
    }
}

/// Resolves when shutdown is requested or the handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Owner's handle on a running consumer. Dropping it stops the consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    state: watch::Receiver<ConsumerState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    /// Stops the consumer: cancels any pending reconnect and closes the
    /// stream. Safe to call repeatedly; returns whether this call requested
    /// the stop.
    pub fn shutdown(&self) -> bool {
        self.shutdown.send_if_modified(|stop| !std::mem::replace(stop, true))
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stops the consumer and waits for its task to finish.
    pub async fn join(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("event consumer task failed: {}", e);
            }
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
