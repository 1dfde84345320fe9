//! Broadcast stream endpoint.
//!
//! `GET /events/stream` holds the response open as a server-sent event
//! stream. The first frame is a synthetic `connected` event; after that the
//! client receives every published event (optionally restricted with
//! `?channels=a,b`) and a heartbeat comment every heartbeat interval.
//! A `Last-Event-ID` header replays retained events newer than that id
//! before live delivery starts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    http::{header, HeaderMap, HeaderName},
    response::{IntoResponse, Sse},
};
use relief_types::{ConnectedFrame, Event};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::stream::{DisconnectGuard, Frame, StreamConnection};
use crate::AppState;

/// Header carrying the opaque caller identity set by the authentication layer.
pub const IDENTITY_HEADER: &str = "x-relief-identity";

const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Headers that keep proxies from buffering or caching the stream.
fn stream_headers() -> [(HeaderName, &'static str); 3] {
    [
        (header::CACHE_CONTROL, "no-cache, no-transform"),
        (header::CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ]
}

/// Query parameters for `GET /events/stream`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Comma-separated channel names; absent means every channel.
    pub channels: Option<String>,
}

/// Which channels a stream receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFilter(Option<HashSet<String>>);

impl ChannelFilter {
    /// Parses a comma-separated list. Empty or missing input allows all.
    pub fn parse(raw: Option<&str>) -> Self {
        let channels: HashSet<String> = raw
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if channels.is_empty() {
            Self(None)
        } else {
            Self(Some(channels))
        }
    }

    pub fn allows(&self, event: &Event) -> bool {
        self.0
            .as_ref()
            .map_or(true, |channels| channels.contains(&event.channel))
    }
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Handler for `GET /events/stream`.
pub async fn get_event_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<StreamQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let filter = ChannelFilter::parse(params.channels.as_deref());
    let identity = headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let resume_from = last_event_id(&headers);

    let (connection, frames) = StreamConnection::open(state.stream.frame_buffer, identity);

    // The buffer is fresh, so the connected frame is always the first one.
    let connected = ConnectedFrame::new(chrono::Utc::now().timestamp_millis());
    let _ = connection.try_write(Frame::Connected(connected));

    let (backlog, rx) = state.hub.subscribe_after(resume_from);
    tracing::info!(
        connection = %connection.id(),
        identity = connection.identity().unwrap_or("<anonymous>"),
        resume_from,
        backlog = backlog.len(),
        "event stream opened"
    );

    state.streams.register(connection.clone());
    let task = tokio::spawn(run_stream(
        connection.clone(),
        rx,
        backlog,
        filter,
        state.stream.heartbeat_interval,
    ));
    connection.attach_heartbeat(task);

    let guard = DisconnectGuard::new(connection, state.streams.clone());
    let body = ReceiverStream::new(frames).filter_map(move |frame| {
        let _alive = &guard;
        match frame.into_sse() {
            Ok(event) => Some(Ok::<_, std::convert::Infallible>(event)),
            Err(e) => {
                tracing::error!("failed to serialize stream frame: {}", e);
                None
            }
        }
    });

    (stream_headers(), Sse::new(body))
}

/// Writes the backlog, then live events and heartbeats, until the
/// connection's sink goes away.
async fn run_stream(
    connection: Arc<StreamConnection>,
    mut rx: broadcast::Receiver<Event>,
    backlog: Vec<Event>,
    filter: ChannelFilter,
    heartbeat_interval: Duration,
) {
    for event in backlog.into_iter().filter(|e| filter.allows(e)) {
        if connection.send(Frame::Event(event)).await.is_err() {
            connection.close();
            return;
        }
    }

    let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if connection.try_write(Frame::Heartbeat).is_err() {
                    break;
                }
            }
            received = rx.recv() => match received {
                Ok(event) => {
                    if !filter.allows(&event) {
                        continue;
                    }
                    if connection.send(Frame::Event(event)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        connection = %connection.id(),
                        skipped,
                        "event stream lagged; events were dropped for this subscriber"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    connection.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use relief_types::Payload;

    fn event(channel: &str) -> Event {
        Event {
            id: 1,
            channel: channel.to_string(),
            event_type: "rescue.created".to_string(),
            payload: Payload::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn missing_or_blank_filter_allows_everything() {
        assert!(ChannelFilter::parse(None).allows(&event("rescue")));
        assert!(ChannelFilter::parse(Some(" , ")).allows(&event("shelter")));
    }

    #[test]
    fn filter_restricts_to_named_channels() {
        let filter = ChannelFilter::parse(Some("rescue, supply"));
        assert!(filter.allows(&event("rescue")));
        assert!(filter.allows(&event("supply")));
        assert!(!filter.allows(&event("shelter")));
    }

    #[test]
    fn last_event_id_parses_numeric_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers), None);
        headers.insert(LAST_EVENT_ID_HEADER, " 42 ".parse().expect("valid header"));
        assert_eq!(last_event_id(&headers), Some(42));
        headers.insert(LAST_EVENT_ID_HEADER, "abc".parse().expect("valid header"));
        assert_eq!(last_event_id(&headers), None);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_stops_after_close() {
        let hub = crate::EventHub::new(10, 16).expect("valid capacity");
        let (connection, mut frames) = StreamConnection::open(8, None);
        let task = tokio::spawn(run_stream(
            connection.clone(),
            hub.subscribe(),
            Vec::new(),
            ChannelFilter::default(),
            Duration::from_secs(15),
        ));
        connection.attach_heartbeat(task);

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(frames.recv().await, Some(Frame::Heartbeat));

        connection.close();
        connection.close();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(frames.recv().await, None, "no frame after teardown");
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_precedes_live_events_and_filter_applies() {
        let hub = crate::EventHub::new(10, 16).expect("valid capacity");
        hub.publish("rescue", "rescue.created", Payload::new());
        hub.publish("shelter", "shelter.updated", Payload::new());
        let (backlog, rx) = hub.subscribe_after(Some(0));

        let (connection, mut frames) = StreamConnection::open(8, None);
        let task = tokio::spawn(run_stream(
            connection.clone(),
            rx,
            backlog,
            ChannelFilter::parse(Some("rescue")),
            Duration::from_secs(15),
        ));
        connection.attach_heartbeat(task);

        hub.publish("shelter", "shelter.updated", Payload::new());
        hub.publish("rescue", "rescue.status_changed", Payload::new());

        let ids: Vec<u64> = [frames.recv().await, frames.recv().await]
            .into_iter()
            .map(|f| match f {
                Some(Frame::Event(e)) => e.id,
                other => panic!("unexpected frame: {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![1, 4]);
        connection.close();
    }
}
