#![allow(dead_code)]

use axum::{body::Body, http::Response, Router};
use order_events_rs::broadcaster::Broadcaster;
use order_events_rs::routes::{router, AppState};
use sqlx::PgPool;

const TEST_BROADCAST_BUFFER: usize = 64;

/// Build the full HTTP router against a test pool, the same composition
/// `main.rs` performs, so ingress/read-path tests exercise real routing and
/// middleware rather than calling handlers directly.
pub fn app(pool: &PgPool) -> Router {
    router(AppState {
        db: pool.clone(),
        broadcaster: Broadcaster::new(TEST_BROADCAST_BUFFER),
    })
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("should read response body");
    serde_json::from_slice(&bytes).expect("response body should be valid JSON")
}

/// Connect to the integration test database and apply migrations.
///
/// Requires `TEST_DATABASE_URL` (falling back to `DATABASE_URL`) to point at
/// a throwaway Postgres instance. Tests that need this call `#[serial]`
/// (from `serial_test`) since they share one database across the suite.
pub async fn setup_pool() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .expect("TEST_DATABASE_URL or DATABASE_URL must be set to run integration tests");

    let pool = PgPool::connect(&database_url)
        .await
        .expect("failed to connect to test database");

    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations against test database");

    pool
}

pub async fn teardown_pool(pool: PgPool) {
    sqlx::query("TRUNCATE orders, shipments, event_inbox, queue_messages, dead_letters CASCADE")
        .execute(&pool)
        .await
        .ok();
    pool.close().await;
}
