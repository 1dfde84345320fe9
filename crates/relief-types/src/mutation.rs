//! Offline write intents.

use serde::{Deserialize, Serialize};

/// A write that could not be delivered immediately and waits in the
/// client's durable queue.
///
/// `input` is opaque to the queue: it is the original call's arguments,
/// replayed verbatim against `endpoint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Client-generated unique id; doubles as the idempotency key on replay.
    pub id: String,
    /// Name of the remote write operation, e.g. `supply.approve`.
    pub endpoint: String,
    /// Original call arguments.
    pub input: serde_json::Value,
    /// Enqueue time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}
