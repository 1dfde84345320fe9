//! Error types for the client.

use std::time::Duration;

use crate::queue::StoreError;

/// Reasons a stream attempt ended. All of them lead to a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The request failed, the server answered with an error status, or
    /// the body broke mid-stream.
    #[error("event stream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Nothing arrived, not even a heartbeat, within the idle timeout.
    #[error("event stream silent for {0:?}")]
    Stalled(Duration),
}

/// Errors surfaced by mutation queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The durable store rejected the operation.
    #[error("mutation store error: {0}")]
    Store(#[from] StoreError),

    /// The blocking store task panicked or was cancelled.
    #[error("mutation store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
