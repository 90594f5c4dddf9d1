use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::schedule::PollEvent;
use crate::AppContext;

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub label: Option<String>,
}

fn event_name(event: &PollEvent) -> &'static str {
    match event {
        PollEvent::Update { .. } => "update",
        PollEvent::PollError { .. } => "poll_error",
        PollEvent::Finished { .. } => "finished",
    }
}

/// Server-sent stream of poll events, optionally for one label.
pub async fn stream_events(
    State(ctx): State<Arc<AppContext>>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(ctx.events.subscribe()).filter_map(move |item| {
        let event = match item {
            Ok(event) => event,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Event stream lagged, {} events dropped", skipped);
                return None;
            }
        };
        if let Some(label) = &filter.label {
            if event.label() != label.as_str() {
                return None;
            }
        }
        Event::default()
            .event(event_name(&event))
            .json_data(&event)
            .ok()
            .map(Ok)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
