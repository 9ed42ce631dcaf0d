//! `GET /events`: newline-delimited SSE of the worker's `SseEvent`s
//! (spec §4.6, §6). Every write-path handler and the agent loop publish
//! onto one `broadcast::Sender`; this just turns the receiver into a
//! `Stream<Item = Event>`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::http::state::SharedState;

pub async fn events(State(state): State<Arc<SharedState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(event) => {
                let json = serde_json::to_string(&event).ok()?;
                Some(Ok(Event::default().data(json)))
            }
            // A slow subscriber dropped messages; keep the connection open
            // rather than terminating it (spec: events are best-effort over SSE).
            Err(_lagged) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
