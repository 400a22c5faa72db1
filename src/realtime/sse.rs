//! SSE endpoint: `GET /api/realtime?tables=a,b`
//!
//! Framing: an initial `event: connected`, then one frame per change
//! (`event:` is the action, `data:` the `{action,table,record}` body,
//! `id:` the monotone per-process event id), comment heartbeats every
//! 25 seconds, and a `lag` comment after dropped events.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use serde::Deserialize;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Error;
use crate::realtime::hub::ChangeEvent;
use crate::state::AppState;

/// Heartbeat interval
const HEARTBEAT: Duration = Duration::from_secs(25);

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    /// Comma-separated table names
    #[serde(default)]
    tables: String,
}

fn frame(event: &ChangeEvent) -> Event {
    Event::default()
        .id(event.id.to_string())
        .event(event.action.as_str())
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}

/// SSE handler
pub async fn realtime(
    State(state): State<AppState>,
    Query(params): Query<RealtimeParams>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, Error> {
    let tables: HashSet<String> = params
        .tables
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if tables.is_empty() {
        return Err(Error::bad_request("tables query parameter is required"));
    }

    let last_event_id: Option<u64> = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let mut subscription = state.hub.subscribe(tables.clone());

    let stream = async_stream::stream! {
        let connected = serde_json::json!({
            "subscriberId": subscription.id,
            "tables": tables.iter().collect::<Vec<_>>(),
        });
        yield Ok(Event::default().event("connected").data(connected.to_string()));

        // Best-effort resume from the in-memory ring; events that have
        // already left the buffer are not replayed.
        if let Some(last_id) = last_event_id {
            for event in subscription.replay_since(last_id, &tables) {
                yield Ok(frame(&event));
            }
        }

        while let Some(event) = subscription.rx.recv().await {
            if subscription.lagged.swap(false, Ordering::AcqRel) {
                yield Ok(Event::default().comment("lag"));
            }
            yield Ok(frame(&event));
        }
        // channel closed: hub shut down or this subscription was removed
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::hub::Action;

    #[test]
    fn frame_carries_action_and_id() {
        let event = ChangeEvent {
            id: 7,
            action: Action::Create,
            table: "users".into(),
            record: serde_json::json!({"name": "Charlie"}),
        };
        // Event's builder API is opaque; serialize through the data we control
        let data = serde_json::to_string(&event).unwrap();
        assert!(data.contains("\"action\":\"create\""));
        assert!(data.contains("\"table\":\"users\""));
        assert!(data.contains("Charlie"));
        // the per-process id is framing metadata, not payload
        assert!(!data.contains("\"id\":7"));
    }
}
