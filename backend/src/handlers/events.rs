//! Server-sent farm events

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::{convert::Infallible, time::Duration};
use tokio::sync::broadcast;

use crate::middleware::CurrentOperator;
use crate::AppState;

/// Stream committed events for the operator's farm
pub async fn stream_events(
    State(state): State<AppState>,
    CurrentOperator(operator): CurrentOperator,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();
    let farm_id = operator.farm_id;

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) if event.farm_id == farm_id => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(Event::default().event("farm").data(data));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(farm_id = %farm_id, skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
