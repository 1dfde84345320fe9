//! Error types for the event log.

/// Errors that can occur when constructing an event log.
///
/// Publishing and reading never fail.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventLogError {
    /// A log must be able to retain at least one event.
    #[error("event log capacity must be at least 1")]
    ZeroCapacity,
}
