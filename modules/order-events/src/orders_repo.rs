use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

use crate::models::{Order, Shipment, STATUS_PENDING_PARTIAL};

/// Optional field set carried by a merchant-platform event. `None` means
/// "not present in this payload, don't touch the column" — distinct from an
/// explicit empty string.
#[derive(Debug, Default)]
pub struct OrderFields {
    pub customer_id: Option<String>,
    pub status: Option<String>,
    pub total_amount: Option<i64>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub address_city: Option<String>,
    pub address_province: Option<String>,
    pub address_postal_code: Option<String>,
    pub address_country: Option<String>,
    pub shipping_fee_cents: Option<i64>,
}

#[derive(Debug, Default)]
pub struct ShipmentFields {
    pub courier_status: Option<String>,
    pub tracking_number: Option<String>,
}

pub enum UpsertOutcome {
    Created(Order),
    Updated { order: Order, was_partial: bool },
    Stale,
}

pub async fn find_order(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &str,
) -> sqlx::Result<Option<Order>> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_id = $1")
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn find_order_pool(
    pool: &sqlx::PgPool,
    order_id: &str,
) -> sqlx::Result<Option<Order>> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_orders(
    pool: &sqlx::PgPool,
    after_order_id: Option<&str>,
    limit: i64,
) -> sqlx::Result<Vec<Order>> {
    sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE ($1::text IS NULL OR order_id > $1)
        ORDER BY order_id
        LIMIT $2
        "#,
    )
    .bind(after_order_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn list_shipments(
    pool: &sqlx::PgPool,
    order_id: &str,
) -> sqlx::Result<Vec<Shipment>> {
    sqlx::query_as::<_, Shipment>(
        "SELECT * FROM shipments WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await
}

/// Create a `PENDING_PARTIAL` order (§4.4) when a non-create event is the
/// first thing this pipeline has seen for `order_id`. The create event, when
/// it eventually arrives, fills in the remaining fields via
/// [`upsert_order_from_event`].
pub async fn create_partial_order(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &str,
    event_ts: DateTime<Utc>,
) -> sqlx::Result<Order> {
    sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (order_id, customer_id, status, last_event_ts)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind("unknown")
    .bind(STATUS_PENDING_PARTIAL)
    .bind(event_ts)
    .fetch_one(&mut **tx)
    .await
}

async fn apply_order_update(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &str,
    event_ts: DateTime<Utc>,
    fields: OrderFields,
) -> sqlx::Result<Order> {
    sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders SET
            customer_id = COALESCE($2, customer_id),
            status = COALESCE($3, status),
            total_amount = COALESCE($4, total_amount),
            address_line1 = $5,
            address_line2 = $6,
            address_city = $7,
            address_province = $8,
            address_postal_code = $9,
            address_country = $10,
            shipping_fee_cents = COALESCE($11, shipping_fee_cents),
            last_event_ts = $12,
            updated_at = now()
        WHERE order_id = $1
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(fields.customer_id)
    .bind(fields.status)
    .bind(fields.total_amount)
    .bind(fields.address_line1)
    .bind(fields.address_line2)
    .bind(fields.address_city)
    .bind(fields.address_province)
    .bind(fields.address_postal_code)
    .bind(fields.address_country)
    .bind(fields.shipping_fee_cents)
    .bind(event_ts)
    .fetch_one(&mut **tx)
    .await
}

/// Apply a merchant-platform event to the order aggregate, enforcing
/// last-writer-wins by `event_ts` (§4.4, §5). `event_type` distinguishes a
/// genuine create from an update arriving as the first event this pipeline
/// has seen for `order_id`: a create inserts the order directly from its own
/// fields, while a first-seen update goes through the partial-create guard
/// (§4.5 step 5) so the order still lands as `PENDING_PARTIAL` rather than
/// skipping straight to a fully-formed row.
pub async fn upsert_order_from_event(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &str,
    event_ts: DateTime<Utc>,
    event_type: &str,
    fields: OrderFields,
) -> sqlx::Result<UpsertOutcome> {
    let existing = find_order(tx, order_id).await?;

    match existing {
        None if event_type == "SHOPIFY_CREATED" => {
            let order = sqlx::query_as::<_, Order>(
                r#"
                INSERT INTO orders (
                    order_id, customer_id, status, total_amount,
                    address_line1, address_line2, address_city, address_province,
                    address_postal_code, address_country, shipping_fee_cents, last_event_ts
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                RETURNING *
                "#,
            )
            .bind(order_id)
            .bind(fields.customer_id.unwrap_or_default())
            .bind(fields.status.unwrap_or_else(|| "OPEN".to_string()))
            .bind(fields.total_amount.unwrap_or(0))
            .bind(fields.address_line1)
            .bind(fields.address_line2)
            .bind(fields.address_city)
            .bind(fields.address_province)
            .bind(fields.address_postal_code)
            .bind(fields.address_country)
            .bind(fields.shipping_fee_cents.unwrap_or(0))
            .bind(event_ts)
            .fetch_one(&mut **tx)
            .await?;

            Ok(UpsertOutcome::Created(order))
        }
        None => {
            let epoch = DateTime::<Utc>::from_timestamp(0, 0).expect("unix epoch is representable");
            create_partial_order(tx, order_id, epoch).await?;
            let updated = apply_order_update(tx, order_id, event_ts, fields).await?;

            Ok(UpsertOutcome::Updated {
                order: updated,
                was_partial: true,
            })
        }
        Some(order) if event_ts <= order.last_event_ts => Ok(UpsertOutcome::Stale),
        Some(order) => {
            let was_partial = order.status == STATUS_PENDING_PARTIAL;
            let updated = apply_order_update(tx, order_id, event_ts, fields).await?;

            Ok(UpsertOutcome::Updated {
                order: updated,
                was_partial,
            })
        }
    }
}

/// Apply a courier event's order-level side effect: touch `last_event_ts`
/// under the same monotonicity rule as merchant events, creating a
/// `PENDING_PARTIAL` order if this is the first event this pipeline has
/// seen for `order_id` (§4.4). Courier events never carry order fields
/// (customer, address, totals), only shipment fields, so this never
/// overwrites anything besides the clock.
pub async fn upsert_order_for_courier_event(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &str,
    event_ts: DateTime<Utc>,
) -> sqlx::Result<UpsertOutcome> {
    match find_order(tx, order_id).await? {
        None => {
            let order = create_partial_order(tx, order_id, event_ts).await?;
            Ok(UpsertOutcome::Created(order))
        }
        Some(order) if event_ts <= order.last_event_ts => Ok(UpsertOutcome::Stale),
        Some(order) => {
            let was_partial = order.status == STATUS_PENDING_PARTIAL;
            let updated = sqlx::query_as::<_, Order>(
                r#"
                UPDATE orders SET last_event_ts = $2, updated_at = now()
                WHERE order_id = $1
                RETURNING *
                "#,
            )
            .bind(order_id)
            .bind(event_ts)
            .fetch_one(&mut **tx)
            .await?;

            Ok(UpsertOutcome::Updated {
                order: updated,
                was_partial,
            })
        }
    }
}

/// Apply a courier event to the order's shipment row (§4.4). One shipment
/// row per order: the first courier event inserts it, later ones update in
/// place. Last-writer-wins is enforced by the caller via the order's
/// `last_event_ts`, shared across both merchant and courier events for a
/// given order.
pub async fn upsert_shipment(
    tx: &mut Transaction<'_, Postgres>,
    order_id: &str,
    fields: ShipmentFields,
) -> sqlx::Result<Shipment> {
    let existing = sqlx::query_as::<_, Shipment>(
        "SELECT * FROM shipments WHERE order_id = $1 ORDER BY id LIMIT 1",
    )
    .bind(order_id)
    .fetch_optional(&mut **tx)
    .await?;

    match existing {
        None => {
            sqlx::query_as::<_, Shipment>(
                r#"
                INSERT INTO shipments (order_id, courier_status, tracking_number)
                VALUES ($1, $2, $3)
                RETURNING *
                "#,
            )
            .bind(order_id)
            .bind(fields.courier_status.unwrap_or_else(|| "UNKNOWN".to_string()))
            .bind(fields.tracking_number)
            .fetch_one(&mut **tx)
            .await
        }
        Some(shipment) => {
            sqlx::query_as::<_, Shipment>(
                r#"
                UPDATE shipments SET
                    courier_status = COALESCE($2, courier_status),
                    tracking_number = COALESCE($3, tracking_number),
                    updated_at = now()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(shipment.id)
            .bind(fields.courier_status)
            .bind(fields.tracking_number)
            .fetch_one(&mut **tx)
            .await
        }
    }
}
