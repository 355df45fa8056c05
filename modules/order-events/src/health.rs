use axum::Json;
use serde_json::Value;

/// Liveness/readiness handler, the same shape every service in this
/// platform exposes at `GET /health`.
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "order-events-rs",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
