//! Publish entry point: the event log plus live fan-out.

use std::sync::{Mutex, MutexGuard, PoisonError};

use relief_events::{EventLog, EventLogError};
use relief_types::{Event, Payload};
use tokio::sync::broadcast;

/// The process's event log and the broadcast channel feeding open streams.
///
/// Appending, evicting and broadcasting happen under one lock, so live
/// subscribers observe events in id order and a subscriber created through
/// [`EventHub::subscribe_after`] sees neither a gap nor a duplicate between
/// its backlog and its live feed.
#[derive(Debug)]
pub struct EventHub {
    log: Mutex<EventLog>,
    tx: broadcast::Sender<Event>,
}

impl EventHub {
    /// Creates a hub retaining `max_events` events, with a per-subscriber
    /// live buffer of `broadcast_capacity` events.
    ///
    /// # Errors
    ///
    /// Returns `EventLogError::ZeroCapacity` if `max_events` is 0.
    pub fn new(max_events: usize, broadcast_capacity: usize) -> Result<Self, EventLogError> {
        Ok(Self::with_log(EventLog::new(max_events)?, broadcast_capacity))
    }

    /// Wraps an existing log.
    pub fn with_log(log: EventLog, broadcast_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            log: Mutex::new(log),
            tx,
        }
    }

    fn log(&self) -> MutexGuard<'_, EventLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records an event and pushes it to every open stream.
    ///
    /// Callers invoke this after a successful domain write, with
    /// `event_type` named `<entity>.<verb>`. Never fails; having no open
    /// streams is normal.
    pub fn publish(
        &self,
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: Payload,
    ) -> Event {
        let mut log = self.log();
        let event = log.publish(channel, event_type, payload);
        match self.tx.send(event.clone()) {
            Ok(receivers) => tracing::debug!(
                id = event.id,
                event_type = %event.event_type,
                receivers,
                "published event"
            ),
            Err(_) => tracing::debug!(
                id = event.id,
                event_type = %event.event_type,
                "published event with no open streams"
            ),
        }
        event
    }

    /// Subscribes to live events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Subscribes to live events and returns the retained events newer than
    /// `last_id` (none when `last_id` is `None`).
    pub fn subscribe_after(&self, last_id: Option<u64>) -> (Vec<Event>, broadcast::Receiver<Event>) {
        let log = self.log();
        let backlog = last_id.map(|id| log.events_after(id)).unwrap_or_default();
        (backlog, self.tx.subscribe())
    }

    pub fn events_since(&self, timestamp: i64) -> Vec<Event> {
        self.log().events_since(timestamp)
    }

    pub fn latest_events(&self, count: usize) -> Vec<Event> {
        self.log().latest_events(count)
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.log().capacity()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
