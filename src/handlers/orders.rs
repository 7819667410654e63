use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::debug;

use super::common::ValidatedJson;
use crate::{
    errors::ServiceError,
    models::Actor,
    services::{
        dashboard::TodaysOrders,
        order_status::StatusChangeRequest,
        orders::{CreateOrderRequest, OrderReceipt, OrderSnapshot},
    },
    ApiResponse, AppState,
};

/// Record a new order
///
/// The response body carries the envelope fields `success` and `meta`
/// next to the receipt.
#[utoipa::path(
    post,
    path = "/orders",
    summary = "Create order",
    description = "Resolve the customer and record a new pending order. The declared total must match the items within 0.01.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created successfully", body = OrderReceipt,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data or total mismatch", body = crate::errors::ErrorResponse),
        (status = 409, description = "Write conflict after retry", body = crate::errors::ErrorResponse),
        (status = 503, description = "Storage unavailable", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderReceipt>>), ServiceError> {
    let receipt = state.services.order.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt))))
}

/// Look up an order by its public number
#[utoipa::path(
    get,
    path = "/orders/{order_number}",
    summary = "Get order",
    description = "Retrieve an order with its items and status timeline",
    params(("order_number" = String, Path, description = "Public order number, e.g. T1A2B3C4D")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = OrderSnapshot,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 503, description = "Storage unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<OrderSnapshot>>, ServiceError> {
    let order = state.services.order.get_order(&order_number).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Move an order along its lifecycle
#[utoipa::path(
    patch,
    path = "/orders/{order_number}/status",
    summary = "Update order status",
    description = "Staff-only. Moves an order forward or cancels it; completed and cancelled orders never change.",
    params(
        ("order_number" = String, Path, description = "Public order number"),
        ("x-staff-token" = Option<String>, Header, description = "Staff token, required when one is configured"),
        ("x-staff-id" = Option<String>, Header, description = "Recorded as the author of the change"),
    ),
    request_body = StatusChangeRequest,
    responses(
        (status = 200, description = "Status updated", body = OrderSnapshot),
        (status = 400, description = "Unknown status or invalid body", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal transition or write conflict", body = crate::errors::ErrorResponse),
        (status = 503, description = "Storage unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
    actor: Actor,
    ValidatedJson(change): ValidatedJson<StatusChangeRequest>,
) -> Result<Json<ApiResponse<OrderSnapshot>>, ServiceError> {
    debug!(actor = %actor.label(), "Status change requested");
    let order = state
        .services
        .order_status
        .transition(&order_number, change, &actor)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Orders created today with per-status counts
#[utoipa::path(
    get,
    path = "/orders/status/today",
    summary = "Today's orders",
    description = "Orders created since local midnight in the operating timezone, newest first",
    responses(
        (status = 200, description = "Dashboard data", body = TodaysOrders),
        (status = 503, description = "Storage unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Dashboard"
)]
pub async fn todays_orders(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<TodaysOrders>>, ServiceError> {
    let today = state.services.dashboard.todays_orders().await?;
    Ok(Json(ApiResponse::success(today)))
}
