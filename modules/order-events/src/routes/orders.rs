use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::models::{OrderListResponse, OrderWithShipments};
use crate::orders_repo;
use crate::routes::AppState;
use crate::{OrderEventsError, Result};

const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

/// `GET /orders?limit=&cursor=` (§6). Cursor is the business `order_id` of
/// the last row seen by the caller; pagination reads strictly past it.
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 1000);

    let orders = orders_repo::list_orders(&state.db, query.cursor.as_deref(), limit).await?;

    let next_cursor = if orders.len() as i64 == limit {
        orders.last().map(|o| o.order_id.clone())
    } else {
        None
    };

    Ok(Json(OrderListResponse { orders, next_cursor }))
}

/// `GET /orders/:id` (§6) — one order with its nested shipments.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderWithShipments>> {
    let order = orders_repo::find_order_pool(&state.db, &order_id)
        .await?
        .ok_or_else(|| OrderEventsError::NotFound(format!("order {order_id} not found")))?;

    let shipments = orders_repo::list_shipments(&state.db, &order_id).await?;

    Ok(Json(OrderWithShipments { order, shipments }))
}
