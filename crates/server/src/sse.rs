// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-sent event stream with prefix filtering and heartbeats.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{unfold, Stream};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use iolink_core::ServerEvent;

use crate::app::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated event-type prefixes; empty means everything.
    pub types: Option<String>,
}

struct StreamState {
    rx: broadcast::Receiver<ServerEvent>,
    token: CancellationToken,
    filters: Vec<String>,
}

/// `GET /api/events`: every bus event matching the filters, as
/// `event:`/`data:` SSE frames, with `: heartbeat` comments every 30 s.
pub async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filters: Vec<String> = query
        .types
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let stream_state = StreamState {
        rx: state.manager.bus().subscribe(),
        token: state.manager.register_sse(),
        filters,
    };

    let stream = unfold(stream_state, |mut s| async move {
        loop {
            tokio::select! {
                _ = s.token.cancelled() => return None,
                received = s.rx.recv() => match received {
                    Ok(event) => {
                        if !s.filters.is_empty()
                            && !s.filters.iter().any(|p| event.matches_prefix(p))
                        {
                            continue;
                        }
                        let data = serde_json::to_string(&event.data).unwrap_or_default();
                        let frame = Event::default().event(event.event_type).data(data);
                        return Some((Ok(frame), s));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}
