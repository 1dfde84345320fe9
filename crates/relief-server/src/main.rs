//! Relief server binary.
//!
//! Serves the event stream and catch-up API. On SIGINT or SIGTERM it stops
//! accepting connections and closes every open event stream, which lets
//! graceful shutdown finish instead of waiting on long-lived responses.

use std::net::SocketAddr;
use std::sync::Arc;

use relief_server::config::{self, ConfigSource};
use relief_server::{app, AppState, EventHub, StreamRegistry, StreamSettings};
use tokio::net::TcpListener;

const DEFAULT_CONFIG_FILE: &str = "relief.toml";

#[tokio::main]
async fn main() {
    let source = ConfigSource::resolve(std::env::args().nth(1), "RELIEF_CONFIG_PATH");
    let config = config::load_config(Some(source.path().unwrap_or(DEFAULT_CONFIG_FILE)))
        .expect("invalid relief server configuration");
    config.logging.init_tracing();
    tracing::info!(?source, "configuration loaded");

    let hub = EventHub::new(config.events.max_events, config.events.broadcast_capacity)
        .expect("events.max_events must be at least 1");
    let state = AppState::new(Arc::new(hub), StreamSettings::from(&config.stream));
    let streams = state.streams.clone();

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("cannot listen on {addr}: {e}"));
    tracing::info!(
        %addr,
        max_events = config.events.max_events,
        heartbeat_secs = config.stream.heartbeat_interval_secs,
        "relief server listening"
    );

    if let Err(e) = axum::serve(listener, app(state))
        .with_graceful_shutdown(close_streams_on_signal(streams))
        .await
    {
        tracing::error!("server stopped with error: {}", e);
        std::process::exit(1);
    }
    tracing::info!("relief server shut down");
}

async fn close_streams_on_signal(streams: StreamRegistry) {
    let signal = shutdown_signal().await;
    let closed = streams.close_all();
    tracing::info!(signal, closed, "shutting down; closed open event streams");
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    }
}
