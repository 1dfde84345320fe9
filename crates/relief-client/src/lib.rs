//! Relief realtime client.
//!
//! Two independent mechanisms keep a client converged with the server:
//!
//! - [`EventConsumer`] holds one event stream open, maps each event type to
//!   the local caches it invalidates, and reconnects after a fixed delay
//!   whenever the stream fails or goes silent.
//! - [`MutationQueue`] durably records writes that could not be delivered
//!   and drains them when connectivity returns, one pass at a time.
//!
//! Both observe the same [`Connectivity`] signal supplied by the host.

pub mod config;
pub mod connectivity;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod listeners;
pub mod queue;
pub mod sse;

pub use connectivity::Connectivity;
pub use consumer::{ConsumerConfig, ConsumerHandle, ConsumerState, EventConsumer};
pub use dispatch::{CacheInvalidator, CacheKey, DispatchTable};
pub use error::{ConsumerError, QueueError};
pub use listeners::{EventListeners, ListenerId};
pub use queue::{
    spawn_auto_drain, AcknowledgeReplayer, DrainOutcome, DrainReport, HttpReplayer,
    MemoryMutationStore, MutationQueue, MutationReplayer, MutationStore, ReplayError,
    SqliteMutationStore, StoreError,
};
pub use sse::{parse_line, InboundEvent, LineBuffer};
