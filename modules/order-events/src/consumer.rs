use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::broadcaster::Broadcaster;
use crate::models::{
    inbox_status, IngestMessage, OutboundMessage, ShipmentUpdateEvent,
};
use crate::orders_repo::{OrderFields, ShipmentFields, UpsertOutcome};
use crate::queue::ClaimedMessage;
use crate::{inbox, lock, orders_repo, queue};
use crate::{OrderEventsError, Result};

const INGEST_QUEUE: &str = "ingest_events";
const OUTBOUND_QUEUE: &str = "shopify_outbound";
const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_MAX_WAIT: Duration = Duration::from_secs(5);

/// Drives one ingest-consumer worker (§4.5). Several of these can run
/// concurrently (`INGEST_CONSUMER_WORKERS`) since each message is claimed
/// with `FOR UPDATE SKIP LOCKED` and every write is additionally serialized
/// per order by the advisory lock, so workers never step on each other.
///
/// On `shutdown`, the loop stops claiming new messages but finishes whatever
/// it already claimed (§5): the cancellation only races the poll, never the
/// message-processing step.
pub async fn run(pool: PgPool, broadcaster: Broadcaster, worker_id: usize, max_read_count: i32, shutdown: CancellationToken) {
    tracing::info!(worker_id, "ingest consumer worker starting");

    loop {
        let claimed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!(worker_id, "ingest consumer worker shutting down");
                return;
            }
            result = queue::read_with_poll(&pool, INGEST_QUEUE, VISIBILITY_TIMEOUT, POLL_MAX_WAIT) => result,
        };

        match claimed {
            Ok(Some(msg)) => match process_message(&pool, &broadcaster, &msg).await {
                Err(OrderEventsError::MalformedMessage(reason)) => {
                    tracing::warn!(worker_id, queue_msg_id = msg.id, reason, "dropping malformed message permanently");
                    if let Err(del_err) = queue::delete(&pool, msg.id).await {
                        tracing::error!(worker_id, queue_msg_id = msg.id, error = %del_err, "failed to delete malformed message");
                    }
                }
                Err(err) => {
                    tracing::error!(worker_id, queue_msg_id = msg.id, error = %err, "ingest message processing failed");

                    if msg.read_count >= max_read_count {
                        if let Err(dlq_err) =
                            queue::move_to_dead_letter(&pool, INGEST_QUEUE, &msg, &err.to_string())
                                .await
                        {
                            tracing::error!(worker_id, queue_msg_id = msg.id, error = %dlq_err, "failed to dead-letter exhausted message");
                        }

                        if let Ok(ingest) = serde_json::from_value::<IngestMessage>(msg.message.clone()) {
                            if let Err(mark_err) = mark_inbox_failed(&pool, ingest.inbox_id).await {
                                tracing::error!(worker_id, inbox_id = ingest.inbox_id, error = %mark_err, "failed to mark inbox row FAILED after dead-lettering");
                            }
                        }
                    }
                }
                Ok(()) => {}
            },
            Ok(None) => {}
            Err(err) => {
                tracing::error!(worker_id, error = %err, "ingest consumer poll failed, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Mark an inbox row `FAILED` after its queue message has exhausted
/// `max_read_count` retries and been dead-lettered (§9 `FAILED` resolution).
/// Runs in its own transaction since the message's processing transaction
/// already rolled back.
async fn mark_inbox_failed(pool: &PgPool, inbox_id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    inbox::mark_status(&mut tx, inbox_id, inbox_status::FAILED).await?;
    tx.commit().await?;
    Ok(())
}

async fn process_message(pool: &PgPool, broadcaster: &Broadcaster, msg: &ClaimedMessage) -> Result<()> {
    let ingest: IngestMessage = serde_json::from_value(msg.message.clone())
        .map_err(|e| OrderEventsError::MalformedMessage(e.to_string()))?;

    let span = tracing::info_span!(
        "process_ingest_event",
        order_id = %ingest.order_id,
        event_type = %ingest.event_type,
        source = %ingest.source,
        inbox_id = ingest.inbox_id,
        queue_msg_id = msg.id,
    );

    async move {
        let mut tx = pool.begin().await?;
        lock::advisory_lock(&mut tx, &ingest.order_id).await?;

        let outcome = if ingest.source == "shopify" {
            let fields = order_fields_from_shopify_payload(&ingest.payload);
            orders_repo::upsert_order_from_event(&mut tx, &ingest.order_id, ingest.event_ts, &ingest.event_type, fields)
                .await?
        } else {
            orders_repo::upsert_order_for_courier_event(&mut tx, &ingest.order_id, ingest.event_ts)
                .await?
        };

        let order = match outcome {
            UpsertOutcome::Stale => {
                inbox::mark_status(&mut tx, ingest.inbox_id, inbox_status::IGNORED_STALE).await?;
                queue::delete_tx(&mut tx, msg.id).await?;
                tx.commit().await?;
                tracing::debug!("stale event ignored, a newer event already moved this order's clock forward");
                return Ok(());
            }
            UpsertOutcome::Created(order) => order,
            UpsertOutcome::Updated { order, .. } => order,
        };

        let changed_fields = if ingest.source == "courier" {
            let shipment_fields = shipment_fields_from_courier_payload(&ingest.payload);
            let shipment = orders_repo::upsert_shipment(&mut tx, &ingest.order_id, shipment_fields).await?;

            let changed_fields = serde_json::json!({
                "courier_status": shipment.courier_status,
                "tracking_number": shipment.tracking_number,
            });

            let outbound = OutboundMessage {
                order_id: ingest.order_id.clone(),
                changed_fields: changed_fields.clone(),
                snapshot: serde_json::to_value(&shipment).unwrap_or(serde_json::Value::Null),
            };
            queue::enqueue_tx(&mut tx, OUTBOUND_QUEUE, &outbound).await?;

            changed_fields
        } else {
            serde_json::to_value(&order).unwrap_or(serde_json::Value::Null)
        };

        inbox::mark_status(&mut tx, ingest.inbox_id, inbox_status::PROCESSED).await?;
        queue::delete_tx(&mut tx, msg.id).await?;
        tx.commit().await?;

        let summary = if ingest.source == "courier" {
            let status = changed_fields.get("courier_status").and_then(|v| v.as_str()).unwrap_or_default();
            format!("Shipment Update: {status}")
        } else if ingest.event_type == "SHOPIFY_CREATED" {
            "Order Created".to_string()
        } else {
            "Order Updated".to_string()
        };

        let update = ShipmentUpdateEvent {
            order_id: ingest.order_id.clone(),
            server_ts: Utc::now(),
            changed_fields,
            summary,
        };
        broadcaster.publish(&update).await;

        Ok(())
    }
    .instrument(span)
    .await
}

/// Extract the order-mutable fields from a Shopify-shaped order webhook
/// body. Money fields arrive as decimal strings; absent fields stay `None`
/// so [`orders_repo::upsert_order_from_event`] leaves the existing column
/// untouched rather than clobbering it with a default.
fn order_fields_from_shopify_payload(payload: &serde_json::Value) -> OrderFields {
    let customer_id = payload
        .get("customer")
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_str().map(String::from).or_else(|| v.as_i64().map(|n| n.to_string())));

    let status = payload
        .get("financial_status")
        .and_then(|v| v.as_str())
        .map(|s| s.to_uppercase());

    let total_amount = payload
        .get("total_price")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|f| (f * 100.0).round() as i64);

    let shipping_fee_cents = payload
        .get("total_shipping_price")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|f| (f * 100.0).round() as i64);

    let addr = payload.get("shipping_address");
    let address_field = |name: &str| {
        addr.and_then(|a| a.get(name))
            .and_then(|v| v.as_str())
            .map(String::from)
    };

    OrderFields {
        customer_id,
        status,
        total_amount,
        address_line1: address_field("address1"),
        address_line2: address_field("address2"),
        address_city: address_field("city"),
        address_province: address_field("province"),
        address_postal_code: address_field("zip"),
        address_country: address_field("country"),
        shipping_fee_cents,
    }
}

/// Extract the shipment-mutable fields from a courier status-update body.
fn shipment_fields_from_courier_payload(payload: &serde_json::Value) -> ShipmentFields {
    let courier_status = payload
        .get("status")
        .and_then(|v| v.as_str())
        .map(|s| s.to_uppercase());

    let tracking_number = payload
        .get("trackingNumber")
        .and_then(|v| v.as_str())
        .map(String::from);

    ShipmentFields {
        courier_status,
        tracking_number,
    }
}
