//! Relief realtime server.
//!
//! Hosts the broadcast stream endpoint and the catch-up API over the
//! process's [`EventHub`]. Domain code elsewhere in the process announces
//! its writes through [`EventHub::publish`] (reachable as
//! `AppState::hub`); every open stream receives every published event.

pub mod api_events;
pub mod api_sse;
pub mod config;
pub mod hub;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use hub::EventHub;
pub use stream::{CloseStatus, ConnectionState, Frame, StreamConnection, StreamRegistry};

/// Tunables for the stream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Interval between heartbeat comments.
    pub heartbeat_interval: Duration,
    /// Frames buffered per connection.
    pub frame_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(relief_types::DEFAULT_HEARTBEAT_INTERVAL_SECS),
            frame_buffer: 64,
        }
    }
}

impl From<&config::StreamConfig> for StreamSettings {
    fn from(config: &config::StreamConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            frame_buffer: config.frame_buffer.max(1),
        }
    }
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event log and live fan-out.
    pub hub: Arc<EventHub>,
    /// Open stream connections.
    pub streams: StreamRegistry,
    /// Stream endpoint settings.
    pub stream: StreamSettings,
}

impl AppState {
    pub fn new(hub: Arc<EventHub>, stream: StreamSettings) -> Self {
        Self {
            hub,
            streams: StreamRegistry::new(),
            stream,
        }
    }
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "streams": state.streams.len(),
        "events": state.hub.len(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events/stream", get(api_sse::get_event_stream_handler))
        .route("/api/events", get(api_events::get_events_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
