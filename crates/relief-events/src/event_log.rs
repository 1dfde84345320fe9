//! The bounded, append-only event sequence.

use std::collections::VecDeque;
use std::fmt;

use relief_types::{Event, Payload};

use crate::clock::{Clock, SystemClock};
use crate::error::EventLogError;

/// Ordered, bounded sequence of published events.
///
/// Invariants:
/// - entries are sorted by `id` ascending and ids are never reused;
/// - timestamps are non-decreasing in id order;
/// - `len() <= capacity()` after every publish.
pub struct EventLog {
    events: VecDeque<Event>,
    capacity: usize,
    next_id: u64,
    last_timestamp: i64,
    clock: Box<dyn Clock>,
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.events.len())
            .field("capacity", &self.capacity)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl EventLog {
    /// Creates an empty log retaining at most `capacity` events.
    ///
    /// # Errors
    ///
    /// Returns `EventLogError::ZeroCapacity` if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self, EventLogError> {
        Self::with_clock(capacity, SystemClock)
    }

    /// Creates an empty log that stamps events using `clock`.
    ///
    /// # Errors
    ///
    /// Returns `EventLogError::ZeroCapacity` if `capacity` is 0.
    pub fn with_clock(capacity: usize, clock: impl Clock + 'static) -> Result<Self, EventLogError> {
        if capacity == 0 {
            return Err(EventLogError::ZeroCapacity);
        }
        Ok(Self {
            events: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            next_id: 1,
            last_timestamp: i64::MIN,
            clock: Box::new(clock),
        })
    }

    /// Appends a new event and evicts the oldest entries beyond capacity.
    ///
    /// The timestamp is the clock's current time, raised to the previous
    /// event's timestamp if the clock went backwards.
    pub fn publish(
        &mut self,
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: Payload,
    ) -> Event {
        let timestamp = self.clock.now_millis().max(self.last_timestamp);
        let event = Event {
            id: self.next_id,
            channel: channel.into(),
            event_type: event_type.into(),
            payload,
            timestamp,
        };
        self.next_id += 1;
        self.last_timestamp = timestamp;

        self.events.push_back(event.clone());
        let mut evicted = 0usize;
        while self.events.len() > self.capacity {
            self.events.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::trace!(evicted, capacity = self.capacity, "evicted events from log");
        }

        event
    }

    /// Returns every retained event with `timestamp` strictly greater than
    /// `timestamp`, in ascending id order.
    pub fn events_since(&self, timestamp: i64) -> Vec<Event> {
        // Timestamps are non-decreasing, so the matching events form a suffix.
        let start = self.events.partition_point(|e| e.timestamp <= timestamp);
        self.events.range(start..).cloned().collect()
    }

    /// Returns every retained event with an id greater than `id`, in
    /// ascending id order.
    pub fn events_after(&self, id: u64) -> Vec<Event> {
        let start = self.events.partition_point(|e| e.id <= id);
        self.events.range(start..).cloned().collect()
    }

    /// Returns the most recent `count` events (fewer if the log is shorter),
    /// oldest first.
    pub fn latest_events(&self, count: usize) -> Vec<Event> {
        let start = self.events.len().saturating_sub(count);
        self.events.range(start..).cloned().collect()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of retained events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Id of the most recently published event, if any was ever published.
    pub fn last_id(&self) -> Option<u64> {
        self.next_id.checked_sub(1).filter(|id| *id > 0)
    }

    /// Id of the oldest event still retained.
    pub fn oldest_id(&self) -> Option<u64> {
        self.events.front().map(|e| e.id)
    }
}
