use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;

use crate::routes::AppState;
use crate::{OrderEventsError, Result};

/// `GET /stream/shipments` (§6, §4.7) — Server-Sent-Events feed of every
/// shipment/order change, named event type `shipment_update`. Each
/// connection gets its own broadcaster subscription with drop-oldest
/// backpressure; disconnecting the client drops the subscription.
pub async fn shipment_stream(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let events = state
        .broadcaster
        .subscribe()
        .await
        .map_err(|e| OrderEventsError::Broadcast(e.to_string()))?;

    let stream = futures::StreamExt::map(events, |update| {
        let data = serde_json::to_string(&update).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event("shipment_update").data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
