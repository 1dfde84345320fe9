#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relief_server::{app, AppState, EventHub, StreamRegistry, StreamSettings};
use tokio::net::TcpListener;

pub struct TestServer {
    pub url: String,
    pub hub: Arc<EventHub>,
    pub streams: StreamRegistry,
}

pub fn test_state(max_events: usize, heartbeat: Duration) -> AppState {
    let hub = EventHub::new(max_events, 64).expect("valid capacity");
    AppState::new(
        Arc::new(hub),
        StreamSettings {
            heartbeat_interval: heartbeat,
            frame_buffer: 16,
        },
    )
}

pub async fn spawn_server(state: AppState) -> TestServer {
    let hub = state.hub.clone();
    let streams = state.streams.clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });

    TestServer {
        url: format!("http://{}", addr),
        hub,
        streams,
    }
}

/// Reads body chunks until the accumulated text contains `needle`.
pub async fn read_until(response: &mut reqwest::Response, needle: &str) -> String {
    let mut buffer = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !buffer.contains(needle) {
        let chunk = tokio::time::timeout_at(deadline, response.chunk())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}; got {buffer:?}"))
            .expect("failed to read chunk")
            .expect("stream closed early");
        buffer.push_str(&String::from_utf8_lossy(&chunk));
    }
    buffer
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
