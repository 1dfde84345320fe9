//! Bounded in-memory event log for the Relief realtime subsystem.
//!
//! Every successful write elsewhere in the system is announced by calling
//! [`EventLog::publish`], which stamps the event with the next id and the
//! current time and appends it. The log keeps at most `capacity` events;
//! older entries are evicted first-in, first-out.
//!
//! The log is a notification buffer, not a durability log. Catch-up reads
//! ([`EventLog::events_since`], [`EventLog::events_after`]) are best-effort:
//! a client that was away long enough for its last-seen event to be evicted
//! silently misses the evicted range.
//!
//! # Usage
//!
//! ```rust,ignore
//! use relief_events::EventLog;
//!
//! let mut log = EventLog::new(1000)?;
//! let event = log.publish("rescue", "rescue.status_changed", payload);
//! let missed = log.events_after(last_seen_id);
//! ```
//!
//! There is no process-wide instance: owners construct a log and share it
//! (the server wraps it in a mutex together with its broadcast sender).

mod clock;
mod error;
mod event_log;

pub use clock::{Clock, SystemClock};
pub use error::EventLogError;
pub use event_log::EventLog;

#[cfg(test)]
mod tests;
