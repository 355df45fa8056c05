pub mod ingress;
pub mod orders;
pub mod stream;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;

use crate::broadcaster::Broadcaster;
use crate::health;

/// Shared state handed to every handler: the connection pool plus the
/// in-process change broadcaster that the SSE endpoint subscribes to.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub broadcaster: Broadcaster,
}

/// Assemble the full HTTP surface (§6) on top of [`AppState`].
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhooks/shopify/orders", post(ingress::shopify_webhook))
        .route(
            "/events/courier/status_update",
            post(ingress::courier_status_update),
        )
        .route("/orders", get(orders::list_orders))
        .route("/orders/{id}", get(orders::get_order))
        .route("/stream/shipments", get(stream::shipment_stream))
        .with_state(state)
}
