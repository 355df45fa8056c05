use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const STATUS_PENDING_PARTIAL: &str = "PENDING_PARTIAL";

pub mod inbox_status {
    pub const RECEIVED: &str = "RECEIVED";
    pub const PROCESSED: &str = "PROCESSED";
    pub const IGNORED_STALE: &str = "IGNORED_STALE";
    pub const DUPLICATE_IGNORED: &str = "DUPLICATE_IGNORED";
    pub const FAILED: &str = "FAILED";
}

/// The canonical order record (§3).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: i64,
    pub order_id: String,
    pub customer_id: String,
    pub status: String,
    pub total_amount: i64,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub address_city: Option<String>,
    pub address_province: Option<String>,
    pub address_postal_code: Option<String>,
    pub address_country: Option<String>,
    pub shipping_fee_cents: i64,
    pub last_event_ts: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Tracking state per order (§3).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Shipment {
    pub id: i64,
    pub order_id: String,
    pub courier_status: String,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `GET /orders/:id` response shape — order plus its shipments.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithShipments {
    #[serde(flatten)]
    pub order: Order,
    pub shipments: Vec<Shipment>,
}

/// `GET /orders` response shape — cursor pagination by business order id.
#[derive(Debug, Clone, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub next_cursor: Option<String>,
}

/// A row from `event_inbox` (§3, §4.2).
#[derive(Debug, Clone, FromRow)]
pub struct EventInboxRow {
    pub id: i64,
    pub dedupe_key: String,
    pub source: String,
    pub order_id: String,
    pub event_type: String,
    pub event_ts: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub status: String,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Body carried by an `ingest_events` queue message (§4.2 step 2).
///
/// `payload` is the raw ingress body verbatim — the consumer re-derives the
/// mutable fields from it, so no information is lost between the boundary
/// and the per-order-locked transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestMessage {
    pub inbox_id: i64,
    pub order_id: String,
    pub dedupe_key: String,
    pub event_type: String,
    pub event_ts: DateTime<Utc>,
    pub source: String,
    pub payload: serde_json::Value,
}

/// Body carried by a `shopify_outbound` queue message (§4.5 step 7, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub order_id: String,
    pub changed_fields: serde_json::Value,
    pub snapshot: serde_json::Value,
}

/// Change notification published on the Change Broadcaster (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentUpdateEvent {
    pub order_id: String,
    pub server_ts: DateTime<Utc>,
    pub changed_fields: serde_json::Value,
    pub summary: String,
}

/// Standard error envelope for the ingress/read HTTP surface.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// `{"status": "Accepted"|"Duplicate ignored", "id": ...}` (§4.8).
#[derive(Debug, Serialize)]
pub struct IngestAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl IngestAck {
    pub fn accepted(id: i64) -> Self {
        Self {
            status: "Accepted",
            id: Some(id),
        }
    }

    pub fn duplicate() -> Self {
        Self {
            status: "Duplicate ignored",
            id: None,
        }
    }
}
