/// Errors surfaced by the order/shipment event pipeline.
///
/// Business-level outcomes (duplicate, stale, partial-order creation) are
/// never represented here — they're handled locally per §7 and never reach
/// a caller as an error. This enum is for infrastructure failures only.
#[derive(Debug, thiserror::Error)]
pub enum OrderEventsError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed queue message: {0}")]
    MalformedMessage(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("broadcast error: {0}")]
    Broadcast(String),
}

pub type Result<T> = std::result::Result<T, OrderEventsError>;

impl axum::response::IntoResponse for OrderEventsError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;

        let (status, error, message) = match &self {
            OrderEventsError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            OrderEventsError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            OrderEventsError::MalformedMessage(msg) => {
                (StatusCode::BAD_REQUEST, "malformed_message", msg.clone())
            }
            OrderEventsError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                "Database error".to_string(),
            ),
            OrderEventsError::Upstream(_) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "Upstream request failed".to_string(),
            ),
            OrderEventsError::Broadcast(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "broadcast_error", msg.clone())
            }
        };

        (
            status,
            Json(crate::models::ErrorResponse::new(error, message)),
        )
            .into_response()
    }
}
