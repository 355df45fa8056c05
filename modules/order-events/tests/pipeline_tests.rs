mod common;

use chrono::{Duration as ChronoDuration, Utc};
use order_events_rs::orders_repo::{OrderFields, ShipmentFields, UpsertOutcome};
use order_events_rs::{inbox, orders_repo, queue};
use serde_json::json;
use serial_test::serial;
use std::time::Duration;

fn order_id(tag: &str) -> String {
    format!("o-{tag}-{}", uuid::Uuid::new_v4())
}

/// §8 idempotency: two inserts with the same dedupe key collapse to one
/// inbox row, and the second returns `Ok(None)` rather than an error.
#[tokio::test]
#[serial]
async fn duplicate_dedupe_key_is_rejected_without_error() {
    let pool = common::setup_pool().await;
    let oid = order_id("dup");
    let payload = json!({"id": oid});

    let mut tx = pool.begin().await.unwrap();
    let first = inbox::insert_event(&mut tx, "shopify:w1", "shopify", &oid, "SHOPIFY_CREATED", Utc::now(), &payload)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert!(first.is_some());

    let mut tx = pool.begin().await.unwrap();
    let second = inbox::insert_event(&mut tx, "shopify:w1", "shopify", &oid, "SHOPIFY_UPDATED", Utc::now(), &payload)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert!(second.is_none(), "duplicate dedupe key must not insert a second row");

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM event_inbox WHERE dedupe_key = $1")
        .bind("shopify:w1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1);

    common::teardown_pool(pool).await;
}

/// §8 last-writer-wins / out-of-order: an event strictly older than
/// `last_event_ts` is reported stale and the caller must not apply it.
#[tokio::test]
#[serial]
async fn stale_event_is_not_applied() {
    let pool = common::setup_pool().await;
    let oid = order_id("stale");
    let base_ts = Utc::now();

    let mut tx = pool.begin().await.unwrap();
    let outcome = orders_repo::upsert_order_from_event(
        &mut tx,
        &oid,
        base_ts,
        "SHOPIFY_CREATED",
        OrderFields {
            customer_id: Some("c1".to_string()),
            status: Some("PAID".to_string()),
            address_city: Some("X".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    assert!(matches!(outcome, UpsertOutcome::Created(_)));

    let mut tx = pool.begin().await.unwrap();
    let stale_outcome = orders_repo::upsert_order_from_event(
        &mut tx,
        &oid,
        base_ts - ChronoDuration::seconds(60),
        "SHOPIFY_UPDATED",
        OrderFields {
            address_city: Some("Y".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
    assert!(matches!(stale_outcome, UpsertOutcome::Stale));

    let order = orders_repo::find_order_pool(&pool, &oid).await.unwrap().unwrap();
    assert_eq!(order.address_city.as_deref(), Some("X"), "stale event must not overwrite newer state");

    common::teardown_pool(pool).await;
}

/// §4.5 step 7: a newer update that omits an address field must null that
/// column rather than preserve the prior value — last-writer-wins applies to
/// absence, too.
#[tokio::test]
#[serial]
async fn update_with_absent_address_field_nulls_the_column() {
    let pool = common::setup_pool().await;
    let oid = order_id("null-addr");
    let base_ts = Utc::now();

    let mut tx = pool.begin().await.unwrap();
    orders_repo::upsert_order_from_event(
        &mut tx,
        &oid,
        base_ts,
        "SHOPIFY_CREATED",
        OrderFields {
            customer_id: Some("c1".to_string()),
            status: Some("PAID".to_string()),
            address_line1: Some("1 Main St".to_string()),
            address_city: Some("X".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    orders_repo::upsert_order_from_event(
        &mut tx,
        &oid,
        base_ts + ChronoDuration::seconds(60),
        "SHOPIFY_UPDATED",
        OrderFields {
            status: Some("PAID".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let order = orders_repo::find_order_pool(&pool, &oid).await.unwrap().unwrap();
    assert!(order.address_line1.is_none(), "address_line1 must be nulled when absent from a newer update");
    assert!(order.address_city.is_none(), "address_city must be nulled when absent from a newer update");

    common::teardown_pool(pool).await;
}

/// §8 atomicity: a courier event's shipment upsert happens under the same
/// transaction as the order's `last_event_ts` advance, so a committed order
/// is never left without its shipment.
#[tokio::test]
#[serial]
async fn courier_event_creates_order_and_linked_shipment_atomically() {
    let pool = common::setup_pool().await;
    let oid = order_id("courier");
    let ts = Utc::now();

    let mut tx = pool.begin().await.unwrap();
    let outcome = orders_repo::upsert_order_for_courier_event(&mut tx, &oid, ts).await.unwrap();
    assert!(matches!(outcome, UpsertOutcome::Created(_)));

    let shipment = orders_repo::upsert_shipment(
        &mut tx,
        &oid,
        ShipmentFields {
            courier_status: Some("SHIPPED".to_string()),
            tracking_number: Some("T1".to_string()),
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(shipment.order_id, oid);

    let order = orders_repo::find_order_pool(&pool, &oid).await.unwrap().unwrap();
    assert_eq!(order.status, order_events_rs::models::STATUS_PENDING_PARTIAL);

    let shipments = orders_repo::list_shipments(&pool, &oid).await.unwrap();
    assert_eq!(shipments.len(), 1);
    assert_eq!(shipments[0].tracking_number.as_deref(), Some("T1"));

    common::teardown_pool(pool).await;
}

/// §8 queue drainage: enqueue, claim, delete leaves the queue empty; a
/// claimed-then-not-deleted message becomes claimable again once its
/// visibility window elapses.
#[tokio::test]
#[serial]
async fn claimed_message_is_redelivered_after_visibility_expires() {
    let pool = common::setup_pool().await;

    let mut tx = pool.begin().await.unwrap();
    queue::enqueue_tx(&mut tx, "test_queue", &json!({"hello": "world"})).await.unwrap();
    tx.commit().await.unwrap();

    let claimed = queue::read_with_poll(&pool, "test_queue", Duration::from_millis(200), Duration::from_secs(2))
        .await
        .unwrap()
        .expect("message should be claimable");
    assert_eq!(claimed.read_count, 1);

    // Not deleted; visibility window is short, so it should reappear.
    let redelivered = queue::read_with_poll(&pool, "test_queue", Duration::from_secs(30), Duration::from_secs(2))
        .await
        .unwrap()
        .expect("message should be redelivered after visibility expiry");
    assert_eq!(redelivered.id, claimed.id);
    assert_eq!(redelivered.read_count, 2);

    let mut tx = pool.begin().await.unwrap();
    queue::delete_tx(&mut tx, redelivered.id).await.unwrap();
    tx.commit().await.unwrap();

    let empty = queue::read_with_poll(&pool, "test_queue", Duration::from_secs(30), Duration::from_millis(300))
        .await
        .unwrap();
    assert!(empty.is_none(), "queue must be empty after delete");

    common::teardown_pool(pool).await;
}

/// §9 `FAILED` resolution: a message that exhausts its read budget is
/// dead-lettered and removed from the live queue.
#[tokio::test]
#[serial]
async fn exhausted_message_is_dead_lettered() {
    let pool = common::setup_pool().await;

    let mut tx = pool.begin().await.unwrap();
    queue::enqueue_tx(&mut tx, "poison_queue", &json!({"bad": true})).await.unwrap();
    tx.commit().await.unwrap();

    let claimed = queue::read_with_poll(&pool, "poison_queue", Duration::from_millis(50), Duration::from_secs(2))
        .await
        .unwrap()
        .unwrap();

    queue::move_to_dead_letter(&pool, "poison_queue", &claimed, "simulated poison message")
        .await
        .unwrap();

    let remaining = queue::read_with_poll(&pool, "poison_queue", Duration::from_secs(30), Duration::from_millis(300))
        .await
        .unwrap();
    assert!(remaining.is_none(), "dead-lettered message must leave the live queue");

    let letters = order_events_rs::dlq::list(&pool, 10).await.unwrap();
    assert!(letters.iter().any(|l| l.id == claimed.id || l.queue == "poison_queue"));

    common::teardown_pool(pool).await;
}

/// §9 partial order: a courier event arriving before any merchant create
/// creates a `PENDING_PARTIAL` order, and a subsequent create fills it in
/// without losing the courier event's effect.
#[tokio::test]
#[serial]
async fn partial_order_is_promoted_by_a_later_create() {
    let pool = common::setup_pool().await;
    let oid = order_id("partial");
    let courier_ts = Utc::now();
    let create_ts = courier_ts + ChronoDuration::seconds(5);

    let mut tx = pool.begin().await.unwrap();
    let outcome = orders_repo::upsert_order_for_courier_event(&mut tx, &oid, courier_ts).await.unwrap();
    tx.commit().await.unwrap();
    let Some(partial) = (match outcome {
        UpsertOutcome::Created(order) => Some(order),
        _ => None,
    }) else {
        panic!("expected a freshly created partial order");
    };
    assert_eq!(partial.status, order_events_rs::models::STATUS_PENDING_PARTIAL);

    let mut tx = pool.begin().await.unwrap();
    let promoted = orders_repo::upsert_order_from_event(
        &mut tx,
        &oid,
        create_ts,
        "SHOPIFY_CREATED",
        OrderFields {
            customer_id: Some("c1".to_string()),
            status: Some("PAID".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let UpsertOutcome::Updated { order, was_partial } = promoted else {
        panic!("expected an update of the existing partial order");
    };
    assert!(was_partial);
    assert_eq!(order.status, "PAID");

    common::teardown_pool(pool).await;
}

/// §4.5 step 5: a `SHOPIFY_UPDATED` event arriving before any create for its
/// order must go through the partial-create guard, landing as
/// `PENDING_PARTIAL` with `customer_id = "unknown"` rather than being
/// inserted directly from the update's own fields.
#[tokio::test]
#[serial]
async fn update_arriving_before_create_creates_pending_partial() {
    let pool = common::setup_pool().await;
    let oid = order_id("update-first");
    let ts = Utc::now();

    let mut tx = pool.begin().await.unwrap();
    let outcome = orders_repo::upsert_order_from_event(
        &mut tx,
        &oid,
        ts,
        "SHOPIFY_UPDATED",
        OrderFields {
            address_city: Some("X".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let UpsertOutcome::Updated { order, was_partial } = outcome else {
        panic!("expected the partial-create guard to report an update");
    };
    assert!(was_partial);
    assert_eq!(order.status, order_events_rs::models::STATUS_PENDING_PARTIAL);
    assert_eq!(order.customer_id, "unknown");
    assert_eq!(order.address_city.as_deref(), Some("X"));
    assert!((order.last_event_ts - ts).num_milliseconds().abs() < 1, "last_event_ts must advance to the event's own timestamp");

    common::teardown_pool(pool).await;
}

/// Dead-letter replay (the `dlq_replay_drill` operator tool's core
/// operation): a replayed message reappears on its original queue with a
/// fresh read count and the dead-letter row is removed.
#[tokio::test]
#[serial]
async fn dead_letter_replay_requeues_with_fresh_read_count() {
    let pool = common::setup_pool().await;

    let mut tx = pool.begin().await.unwrap();
    queue::enqueue_tx(&mut tx, "replay_queue", &json!({"order_id": "o-replay"})).await.unwrap();
    tx.commit().await.unwrap();

    let claimed = queue::read_with_poll(&pool, "replay_queue", Duration::from_millis(50), Duration::from_secs(2))
        .await
        .unwrap()
        .unwrap();
    queue::move_to_dead_letter(&pool, "replay_queue", &claimed, "test failure").await.unwrap();

    let letters = order_events_rs::dlq::list(&pool, 10).await.unwrap();
    let letter = letters
        .into_iter()
        .find(|l| l.queue == "replay_queue")
        .expect("dead letter should exist");

    let replayed = order_events_rs::dlq::replay(&pool, letter.id).await.unwrap();
    assert!(replayed);

    let requeued = queue::read_with_poll(&pool, "replay_queue", Duration::from_secs(30), Duration::from_secs(2))
        .await
        .unwrap()
        .expect("replayed message should be claimable again");
    assert_eq!(requeued.read_count, 1);

    let gone = order_events_rs::dlq::find(&pool, letter.id).await.unwrap();
    assert!(gone.is_none());

    common::teardown_pool(pool).await;
}
