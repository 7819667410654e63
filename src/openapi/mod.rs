use axum::response::Json;
use utoipa::OpenApi;

/// Path the generated document is served from
pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Order Intake API",
        description = r#"
# Order Intake API

Takes orders from the web storefront and chat channels, keeps one customer record per
person and platform, and tracks each order from `pending` to `completed` or `cancelled`.

## Envelope

Successful responses carry `success: true`, the payload fields at the top level and
`meta { request_id, timestamp }`.

## Errors

Failures share one body:

```json
{
  "error": "Bad Request",
  "code": "total_mismatch",
  "message": "Total mismatch: declared 399 but items add up to 398",
  "details": "declared=399 computed=398",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

## Staff actions

Status changes are restricted to staff. When the service is configured with a staff
token, send it in `x-staff-token`; `x-staff-id` is recorded as the author.
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order intake and lifecycle"),
        (name = "Dashboard", description = "Counter dashboard"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::todays_orders,
        crate::health::liveness_check,
        crate::health::readiness_check,
    ),
    components(
        schemas(
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderItemRequest,
            crate::services::orders::OrderReceipt,
            crate::services::orders::OrderSnapshot,
            crate::services::orders::OrderLine,
            crate::services::order_status::StatusChangeRequest,
            crate::services::dashboard::TodaysOrders,
            crate::services::dashboard::StatusCounts,
            crate::models::OrderStatus,
            crate::models::OrderType,
            crate::models::PaymentMethod,
            crate::models::Platform,
            crate::models::TimelineStep,
            crate::health::LivenessReport,
            crate::health::ReadinessReport,
            crate::health::HealthStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDoc;

/// Serves the generated OpenAPI document
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
