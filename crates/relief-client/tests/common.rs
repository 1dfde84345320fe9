#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use relief_client::{CacheInvalidator, CacheKey, ConsumerHandle, ConsumerState};
use relief_server::{AppState, EventHub, StreamSettings};
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Starts a real relief server and returns its base URL and hub.
pub async fn spawn_relief_server(max_events: usize) -> (String, Arc<EventHub>) {
    let hub = Arc::new(EventHub::new(max_events, 64).expect("valid capacity"));
    let state = AppState::new(
        hub.clone(),
        StreamSettings {
            heartbeat_interval: Duration::from_secs(1),
            frame_buffer: 16,
        },
    );
    let url = serve(relief_server::app(state)).await;
    (url, hub)
}

/// Invalidator that records every key it is asked to invalidate.
#[derive(Clone, Default)]
pub struct Recorder {
    keys: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

impl CacheInvalidator for Recorder {
    fn invalidate(&self, key: &CacheKey) {
        self.keys.lock().unwrap().push(key.as_str().to_string());
    }
}

pub async fn wait_for_state(handle: &ConsumerHandle, wanted: ConsumerState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == wanted))
        .await
        .unwrap_or_else(|_| panic!("consumer never reached {wanted:?}"))
        .expect("consumer task ended");
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
