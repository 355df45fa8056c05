use axum::{extract::State, http::HeaderMap, Json};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::IngestAck;
use crate::routes::AppState;
use crate::{dedupe, inbox, queue, OrderEventsError, Result};

const INGEST_QUEUE: &str = "ingest_events";

/// `POST /webhooks/shopify/orders` (§4.8). Header `x-shopify-webhook-id`
/// supplies the preferred dedupe path when present; `x-shopify-topic`
/// becomes the event type. `id` is required; the event timestamp prefers
/// `updated_at`, falls back to `created_at`, then to the current time.
pub async fn shopify_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<IngestAck>> {
    let order_id = payload
        .get("id")
        .and_then(|v| v.as_str().map(String::from).or_else(|| v.as_i64().map(|n| n.to_string())))
        .ok_or_else(|| OrderEventsError::Validation("missing required field: id".to_string()))?;

    let event_type = headers
        .get("x-shopify-topic")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("orders/unknown")
        .to_string();

    let event_ts = payload
        .get("updated_at")
        .or_else(|| payload.get("created_at"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let upstream_id = headers
        .get("x-shopify-webhook-id")
        .and_then(|v| v.to_str().ok());

    let dedupe_key = dedupe::dedupe_key("shopify", upstream_id, &order_id, &event_type, &payload);

    submit_event(&state, &dedupe_key, "shopify", &order_id, &event_type, event_ts, payload).await
}

/// `POST /events/courier/status_update` (§4.8). `orderId`, `eventType`, and
/// `eventTs` are all required; courier events have no upstream id, so the
/// dedupe key always falls back to a content hash of the body.
pub async fn courier_status_update(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<IngestAck>> {
    let order_id = payload
        .get("orderId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OrderEventsError::Validation("missing required field: orderId".to_string()))?
        .to_string();

    let event_type = payload
        .get("eventType")
        .and_then(|v| v.as_str())
        .ok_or_else(|| OrderEventsError::Validation("missing required field: eventType".to_string()))?
        .to_string();

    let event_ts = payload
        .get("eventTs")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| OrderEventsError::Validation("missing or invalid required field: eventTs".to_string()))?;

    let dedupe_key = dedupe::dedupe_key("courier", None, &order_id, &event_type, &payload);

    submit_event(&state, &dedupe_key, "courier", &order_id, &event_type, event_ts, payload).await
}

/// Shared ingress write path (§4.2): insert the inbox row and enqueue the
/// ingest-events message in one transaction, so a crash between the two can
/// never happen. The unique-key violation on `dedupe_key` is the sole
/// deduplication signal — a duplicate never reaches the queue.
async fn submit_event(
    state: &AppState,
    dedupe_key: &str,
    source: &str,
    order_id: &str,
    event_type: &str,
    event_ts: DateTime<Utc>,
    payload: Value,
) -> Result<Json<IngestAck>> {
    let mut tx = state.db.begin().await?;

    let inserted = inbox::insert_event(&mut tx, dedupe_key, source, order_id, event_type, event_ts, &payload)
        .await?;

    let Some(inbox_id) = inserted else {
        tx.rollback().await?;
        return Ok(Json(IngestAck::duplicate()));
    };

    let message = crate::models::IngestMessage {
        inbox_id,
        order_id: order_id.to_string(),
        dedupe_key: dedupe_key.to_string(),
        event_type: event_type.to_string(),
        event_ts,
        source: source.to_string(),
        payload,
    };
    queue::enqueue_tx(&mut tx, INGEST_QUEUE, &message).await?;

    tx.commit().await?;

    Ok(Json(IngestAck::accepted(inbox_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shopify_event_ts_prefers_updated_over_created() {
        let payload = json!({"id": "o1", "created_at": "2026-01-01T00:00:00Z", "updated_at": "2026-01-02T00:00:00Z"});
        let ts = payload
            .get("updated_at")
            .or_else(|| payload.get("created_at"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        assert_eq!(ts.unwrap().to_rfc3339(), "2026-01-02T00:00:00+00:00");
    }
}
