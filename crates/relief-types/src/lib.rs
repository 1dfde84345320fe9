//! Shared wire types and defaults for the Relief realtime subsystem.
//!
//! Both the server (which publishes and streams [`Event`]s) and the client
//! (which consumes them and queues [`QueuedMutation`]s while offline) depend
//! on this crate, so the JSON shapes defined here are the contract between
//! the two sides.

use serde::{Deserialize, Serialize};

mod mutation;
pub use mutation::QueuedMutation;

/// Open key/value payload attached to an event.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Default number of events retained by the in-memory event log.
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Default interval between heartbeat comments on an open stream.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Default delay before a client reconnects a failed stream.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Grace margin added to the heartbeat interval before a silent stream is
/// considered stalled.
pub const DEFAULT_STALL_GRACE_MS: u64 = 10_000;

/// Event type of the synthetic frame written when a stream opens.
pub const CONNECTED_EVENT_TYPE: &str = "connected";

/// A published domain occurrence.
///
/// Events are created only by the event log's publish operation and never
/// mutated afterwards. The `type` field follows the `<entity>.<verb>` naming
/// convention, e.g. `shelter.capacity_changed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Process-local, strictly increasing identifier.
    pub id: u64,
    /// Free-text grouping label.
    pub channel: String,
    /// Domain occurrence name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary JSON-compatible data.
    #[serde(default)]
    pub payload: Payload,
    /// Publish time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Event {
    /// Returns the entity part of the event type (`shelter` for
    /// `shelter.capacity_changed`), or the whole type if it has no dot.
    pub fn entity(&self) -> &str {
        self.event_type
            .split_once('.')
            .map_or(self.event_type.as_str(), |(entity, _)| entity)
    }
}

/// The synthetic frame sent first on every stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedFrame {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
}

impl ConnectedFrame {
    pub fn new(timestamp: i64) -> Self {
        Self {
            event_type: CONNECTED_EVENT_TYPE.to_string(),
            timestamp,
        }
    }
}
