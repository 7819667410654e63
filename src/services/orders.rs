use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        order_status_history,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        OrderStatus, OrderType, PaymentMethod, Platform, TimelineStep, PAYMENT_STATUS_UNPAID,
    },
    services::{
        customers::{CustomerIdentity, IdentityResolver, ResolvedCustomer},
        order_number::{self, OrderNumberGenerator, RandomHexGenerator},
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Largest difference tolerated between a declared amount and the computed one.
pub const TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Largest amount a `DECIMAL(12,2)` column holds.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Money is kept to the cent.
pub const MAX_AMOUNT_SCALE: u32 = 2;

/// `changed_by` recorded for the history row written at creation.
pub const SYSTEM_ACTOR: &str = "system";

/// Request/Response types for the order service
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 100, message = "customer_name must be 1-100 characters"))]
    pub customer_name: String,
    #[validate(length(min = 10, max = 15, message = "customer_phone must be 10-15 characters"))]
    pub customer_phone: String,
    pub order_type: OrderType,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[validate(length(max = 1000, message = "notes must be at most 1000 characters"))]
    pub notes: Option<String>,
    #[validate(custom = "validate_amount")]
    #[schema(value_type = f64, example = 398.0)]
    pub total_amount: Decimal,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub platform: Platform,
    #[validate(length(max = 128, message = "platform_user_id must be at most 128 characters"))]
    pub platform_user_id: Option<String>,
    /// Accepted for compatibility and ignored: new orders always start pending.
    #[serde(default, rename = "status")]
    pub requested_status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct OrderItemRequest {
    /// Menu identifier; numbers are accepted and kept as text
    #[serde(default, deserialize_with = "deserialize_catalog_id")]
    #[schema(value_type = Option<String>)]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,
    #[validate(custom = "validate_unit_price")]
    #[schema(value_type = f64, example = 119.0)]
    pub price: Decimal,
    #[validate(range(min = 1, max = 99, message = "quantity must be between 1 and 99"))]
    pub quantity: i32,
    /// Optional line total; when present it must equal price × quantity
    #[validate(custom = "validate_amount")]
    #[schema(value_type = Option<f64>)]
    pub total: Option<Decimal>,
    #[validate(length(max = 500, message = "notes must be at most 500 characters"))]
    pub notes: Option<String>,
}

fn deserialize_catalog_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CatalogId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<CatalogId>::deserialize(deserializer)?.map(|id| match id {
        CatalogId::Text(text) => text,
        CatalogId::Number(number) => number.to_string(),
    }))
}

fn check_money(amount: &Decimal, code: &'static str) -> Result<(), ValidationError> {
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        let mut err = ValidationError::new(code);
        err.message = Some(format!("{code} must have at most two decimal places").into());
        return Err(err);
    }
    if amount.abs() > MAX_AMOUNT {
        let mut err = ValidationError::new(code);
        err.message = Some(format!("{code} must not exceed {MAX_AMOUNT}").into());
        return Err(err);
    }
    Ok(())
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        let mut err = ValidationError::new("amount");
        err.message = Some("amount cannot be negative".into());
        return Err(err);
    }
    check_money(amount, "amount")
}

fn validate_unit_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price <= Decimal::ZERO {
        let mut err = ValidationError::new("price");
        err.message = Some("price must be greater than zero".into());
        return Err(err);
    }
    check_money(price, "price")
}

/// What the caller gets back after a successful creation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderReceipt {
    #[schema(example = "T1A2B3C4D")]
    pub order_number: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_amount: Decimal,
    pub status: OrderStatus,
}

/// One priced line of an order snapshot
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderLine {
    /// Menu identifier supplied at creation
    pub id: Option<String>,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total: Decimal,
    pub notes: Option<String>,
}

/// An order as the counter and the customer see it
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OrderSnapshot {
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_phone: String,
    pub platform: Platform,
    pub order_type: OrderType,
    pub payment_method: PaymentMethod,
    pub payment_status: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub items: Vec<OrderLine>,
    pub status_history: Vec<TimelineStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderSnapshot {
    pub(crate) fn from_models(order: order::Model, mut items: Vec<order_item::Model>) -> Self {
        items.sort_by_key(|item| item.position);
        Self {
            status_history: order.status.timeline(),
            items: items
                .into_iter()
                .map(|item| OrderLine {
                    id: item.catalog_item_id,
                    name: item.name,
                    price: item.unit_price,
                    quantity: item.quantity,
                    total: item.line_total,
                    notes: item.notes,
                })
                .collect(),
            order_number: order.order_number,
            status: order.status,
            customer_id: order.customer_id,
            customer_name: order.customer_name,
            customer_phone: order.customer_phone,
            platform: order.platform,
            order_type: order.order_type,
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            notes: order.notes,
            cancelled_reason: order.cancelled_reason,
            completed_at: order.completed_at,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// A line after its total has been computed and checked
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub position: i32,
    pub catalog_item_id: Option<String>,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    pub notes: Option<String>,
}

/// Prices every line and checks the declared order total against their sum.
pub fn price_lines(
    items: &[OrderItemRequest],
    declared_total: Decimal,
) -> Result<Vec<PricedLine>, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "Order must contain at least one item".to_string(),
        ));
    }

    let mut lines = Vec::with_capacity(items.len());
    let mut computed = Decimal::ZERO;

    for (index, item) in items.iter().enumerate() {
        item.validate()
            .map_err(|e| ServiceError::ValidationError(format!("items[{index}]: {e}")))?;

        let line_total = item
            .price
            .checked_mul(Decimal::from(item.quantity))
            .filter(|total| *total <= MAX_AMOUNT)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "items[{index}]: line total exceeds {MAX_AMOUNT}"
                ))
            })?;
        if let Some(claimed) = item.total {
            if (claimed - line_total).abs() > TOTAL_TOLERANCE {
                return Err(ServiceError::ValidationError(format!(
                    "items[{index}]: total {} does not equal price x quantity ({})",
                    claimed.normalize(),
                    line_total.normalize()
                )));
            }
        }

        computed = computed
            .checked_add(line_total)
            .filter(|total| *total <= MAX_AMOUNT)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("order total exceeds {MAX_AMOUNT}"))
            })?;
        lines.push(PricedLine {
            position: index as i32,
            catalog_item_id: item.id.clone(),
            name: item.name.trim().to_string(),
            unit_price: item.price,
            quantity: item.quantity,
            line_total,
            notes: item.notes.clone(),
        });
    }

    if (computed - declared_total).abs() > TOTAL_TOLERANCE {
        return Err(ServiceError::TotalMismatch {
            declared: declared_total,
            computed,
        });
    }

    Ok(lines)
}

/// Loads an order with its lines in a single query.
pub(crate) async fn load_snapshot<C: ConnectionTrait>(
    conn: &C,
    order_number: &str,
) -> Result<Option<OrderSnapshot>, DbErr> {
    let rows = OrderEntity::find()
        .filter(order::Column::OrderNumber.eq(order_number))
        .find_with_related(OrderItemEntity)
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .next()
        .map(|(order, items)| OrderSnapshot::from_models(order, items)))
}

/// Trims and upper-cases an order number as typed by a person.
pub(crate) fn canonical_order_number(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

struct CreatedOrder {
    order: order::Model,
    customer: ResolvedCustomer,
}

/// Service for the order ledger
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    identity: IdentityResolver,
    numbers: Arc<dyn OrderNumberGenerator>,
    max_number_attempts: u32,
}

impl OrderService {
    /// Creates a new order service instance
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        max_number_attempts: u32,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(db_pool.clone()),
            db_pool,
            event_sender,
            numbers: Arc::new(RandomHexGenerator),
            max_number_attempts: max_number_attempts.max(1),
        }
    }

    /// Replaces the order number source
    pub fn with_number_generator(mut self, numbers: Arc<dyn OrderNumberGenerator>) -> Self {
        self.numbers = numbers;
        self
    }

    /// Records a new order for a resolved customer.
    ///
    /// Identity resolution, number allocation and every insert share one transaction;
    /// nothing is visible unless all of it commits. A write conflict is retried once.
    #[instrument(skip(self, request), fields(platform = %request.platform, items = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderReceipt, ServiceError> {
        request.validate()?;

        if let Some(status) = request
            .requested_status
            .filter(|status| *status != OrderStatus::initial())
        {
            debug!(requested = %status, "Ignoring requested status on a new order");
        }

        let lines = price_lines(&request.items, request.total_amount)?;
        let identity = CustomerIdentity::new(
            request.platform,
            request.platform_user_id.clone(),
            &request.customer_name,
            &request.customer_phone,
        );
        if identity.name.is_empty() {
            return Err(ServiceError::ValidationError(
                "customer_name cannot be blank".to_string(),
            ));
        }
        if identity.phone.is_empty() {
            return Err(ServiceError::ValidationError(
                "customer_phone must contain digits".to_string(),
            ));
        }

        let created = match self.insert_order(&request, &identity, &lines).await {
            Err(err @ (ServiceError::Conflict(_) | ServiceError::WriteContention(_))) => {
                warn!(error = %err, "Order creation hit a write conflict; retrying once");
                counter!("order_intake_write_conflicts_total", 1, "operation" => "create_order");
                self.insert_order(&request, &identity, &lines).await?
            }
            other => other?,
        };

        let order = created.order;
        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            customer_id = %order.customer_id,
            via = ?created.customer.via,
            "Order created successfully"
        );

        if let Some(event_sender) = &self.event_sender {
            if created.customer.was_created() {
                event_sender
                    .send_or_log(Event::CustomerCreated {
                        customer_id: created.customer.customer.id,
                        platform: created.customer.customer.platform,
                    })
                    .await;
            }
            event_sender
                .send_or_log(Event::OrderCreated {
                    order_id: order.id,
                    order_number: order.order_number.clone(),
                    customer_id: order.customer_id,
                    platform: order.platform,
                    total_amount: order.total_amount,
                })
                .await;
        }

        Ok(OrderReceipt {
            order_number: order.order_number,
            total_amount: order.total_amount,
            status: order.status,
        })
    }

    async fn insert_order(
        &self,
        request: &CreateOrderRequest,
        identity: &CustomerIdentity,
        lines: &[PricedLine],
    ) -> Result<CreatedOrder, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::from(e)
        })?;

        let customer = self.identity.resolve_in(&txn, identity).await?;
        let order_number = self.allocate_order_number(&txn).await?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_id: Set(customer.customer.id),
            customer_name: Set(identity.name.clone()),
            customer_phone: Set(identity.phone.clone()),
            platform: Set(identity.platform),
            order_type: Set(request.order_type),
            payment_method: Set(request.payment_method),
            payment_status: Set(PAYMENT_STATUS_UNPAID.to_string()),
            status: Set(OrderStatus::initial()),
            total_amount: Set(request.total_amount),
            notes: Set(request.notes.clone()),
            cancelled_reason: Set(None),
            completed_at: Set(None),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_number = %order_number, "Failed to insert order");
            ServiceError::from(e)
        })?;

        let items = lines.iter().map(|line| order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            position: Set(line.position),
            catalog_item_id: Set(line.catalog_item_id.clone()),
            name: Set(line.name.clone()),
            unit_price: Set(line.unit_price),
            quantity: Set(line.quantity),
            line_total: Set(line.line_total),
            notes: Set(line.notes.clone()),
            created_at: Set(now),
        });
        OrderItemEntity::insert_many(items)
            .exec_without_returning(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_number = %order_number, "Failed to insert order items");
                ServiceError::from(e)
            })?;

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            old_status: Set(None),
            new_status: Set(OrderStatus::initial()),
            changed_by: Set(SYSTEM_ACTOR.to_string()),
            note: Set(Some("Order created".to_string())),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_number = %order_number, "Failed to commit order creation");
            ServiceError::from(e)
        })?;

        Ok(CreatedOrder { order, customer })
    }

    /// Draws candidates until one is unused, up to the configured number of attempts.
    async fn allocate_order_number<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<String, ServiceError> {
        for attempt in 1..=self.max_number_attempts {
            let candidate = self.numbers.next_candidate();
            let taken = OrderEntity::find()
                .filter(order::Column::OrderNumber.eq(candidate.as_str()))
                .count(conn)
                .await?
                > 0;
            if !taken {
                return Ok(candidate);
            }
            warn!(attempt, order_number = %candidate, "Order number already taken");
            counter!("order_intake_order_number_collisions_total", 1);
        }

        Err(ServiceError::Conflict(format!(
            "could not allocate a unique order number after {} attempts",
            self.max_number_attempts
        )))
    }

    /// Retrieves an order by its public number
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_number: &str) -> Result<OrderSnapshot, ServiceError> {
        let order_number = canonical_order_number(order_number);
        if !order_number::is_well_formed(&order_number) {
            return Err(ServiceError::NotFound(format!(
                "Order {order_number} not found"
            )));
        }

        load_snapshot(&*self.db_pool, &order_number)
            .await
            .map_err(|e| {
                error!(error = %e, order_number = %order_number, "Failed to fetch order");
                ServiceError::from(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_number} not found")))
    }
}
