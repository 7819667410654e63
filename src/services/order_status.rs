use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        order_status_history,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::{check_transition, Actor, OrderStatus},
    services::orders::{canonical_order_number, load_snapshot, OrderSnapshot},
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct StatusChangeRequest {
    pub status: OrderStatus,
    /// Free-text note; stored as the cancellation reason when cancelling
    #[serde(default, alias = "note")]
    #[validate(length(max = 500, message = "reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

struct Transitioned {
    order_id: Uuid,
    from: OrderStatus,
}

#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderStatusService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Moves an order to a new status and returns the updated snapshot.
    ///
    /// The update is a compare-and-set on the order's version; a concurrent change makes
    /// it match nothing, in which case the whole check is repeated once against fresh state.
    #[instrument(skip(self, change, actor), fields(order_number = %order_number, target = %change.status))]
    pub async fn transition(
        &self,
        order_number: &str,
        change: StatusChangeRequest,
        actor: &Actor,
    ) -> Result<OrderSnapshot, ServiceError> {
        change.validate()?;
        let order_number = canonical_order_number(order_number);
        let reason = change
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);

        let outcome = match self
            .try_transition(&order_number, change.status, reason.as_deref(), actor)
            .await
        {
            Err(err @ (ServiceError::Conflict(_) | ServiceError::WriteContention(_))) => {
                warn!(error = %err, "Status change raced another writer; retrying once");
                counter!("order_intake_write_conflicts_total", 1, "operation" => "transition");
                self.try_transition(&order_number, change.status, reason.as_deref(), actor)
                    .await?
            }
            other => other?,
        };

        info!(
            order_id = %outcome.order_id,
            from = %outcome.from,
            to = %change.status,
            changed_by = %actor.label(),
            "Order status updated successfully"
        );
        counter!("order_intake_status_transitions_total", 1, "to" => change.status.to_string());

        if let Some(event_sender) = &self.event_sender {
            event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: outcome.order_id,
                    order_number: order_number.clone(),
                    old_status: outcome.from,
                    new_status: change.status,
                    changed_by: actor.label(),
                })
                .await;
        }

        load_snapshot(&*self.db, &order_number)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_number} not found")))
    }

    async fn try_transition(
        &self,
        order_number: &str,
        target: OrderStatus,
        reason: Option<&str>,
        actor: &Actor,
    ) -> Result<Transitioned, ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::from(e)
        })?;

        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_number} not found")))?;

        let from = order.status;
        check_transition(from, target, actor).map_err(|rejection| {
            warn!(from = %from, to = %target, %rejection, "Status change refused");
            ServiceError::IllegalTransition(rejection.to_string())
        })?;

        let now = Utc::now();
        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(target))
            .col_expr(order::Column::Version, Expr::value(order.version + 1))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version));
        match target {
            OrderStatus::Completed => {
                update = update.col_expr(order::Column::CompletedAt, Expr::value(Some(now)));
            }
            OrderStatus::Cancelled => {
                if let Some(reason) = reason {
                    update = update.col_expr(
                        order::Column::CancelledReason,
                        Expr::value(Some(reason.to_string())),
                    );
                }
            }
            _ => {}
        }

        let updated = update.exec(&txn).await?.rows_affected;
        if updated == 0 {
            return Err(ServiceError::Conflict(format!(
                "order {order_number} changed while being updated"
            )));
        }

        order_status_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            old_status: Set(Some(from)),
            new_status: Set(target),
            changed_by: Set(actor.label()),
            note: Set(reason.map(str::to_string)),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_number = %order_number, "Failed to commit status change");
            ServiceError::from(e)
        })?;

        Ok(Transitioned {
            order_id: order.id,
            from,
        })
    }
}
