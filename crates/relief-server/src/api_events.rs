//! Catch-up reads over the retained event log.
//!
//! `GET /api/events?since=<ms>` returns events published strictly after the
//! given timestamp; `GET /api/events?latest=<n>` returns the newest `n`.
//! Both are best-effort: events evicted from the bounded log are gone.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relief_types::Event;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Number of events returned when neither `since` nor `latest` is given.
const DEFAULT_LATEST: usize = 50;

/// Query parameters for `GET /api/events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Return events with a timestamp strictly greater than this (ms).
    pub since: Option<i64>,
    /// Return the newest `latest` events. Ignored when `since` is present.
    pub latest: Option<usize>,
}

/// Response body for `GET /api/events`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
    /// Matching events, oldest first.
    pub events: Vec<Event>,
    /// The number of events returned.
    pub count: usize,
}

/// Handler for `GET /api/events`.
pub async fn get_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, Response> {
    let events = match (params.since, params.latest) {
        (Some(since), _) => state.hub.events_since(since),
        (None, Some(0)) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "latest must be at least 1" })),
            )
                .into_response());
        }
        (None, latest) => {
            let count = latest.unwrap_or(DEFAULT_LATEST).min(state.hub.capacity());
            state.hub.latest_events(count)
        }
    };

    let count = events.len();
    Ok(Json(EventsResponse { events, count }))
}
