use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
    },
    errors::ServiceError,
    models::OrderStatus,
    services::orders::OrderSnapshot,
};

/// The half-open UTC interval covering one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Local day containing `now` in `tz`, from local midnight to the next local midnight.
pub fn today_window(now: DateTime<Utc>, tz: Tz) -> DayWindow {
    let date = now.with_timezone(&tz).date_naive();
    let start = local_midnight(date, tz);
    let end = date
        .succ_opt()
        .map(|next| local_midnight(next, tz))
        .unwrap_or_else(|| start + chrono::Duration::days(1));
    DayWindow { date, start, end }
}

/// First instant of `date` in `tz`. Zones that skip midnight start the day at the
/// first local time that exists.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..=2)
        .find_map(|hours| {
            tz.from_local_datetime(&(midnight + chrono::Duration::hours(hours)))
                .earliest()
        })
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Orders per status; every status is always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct StatusCounts {
    pub pending: usize,
    pub confirmed: usize,
    pub preparing: usize,
    pub ready: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    fn slot(&mut self, status: OrderStatus) -> &mut usize {
        match status {
            OrderStatus::Pending => &mut self.pending,
            OrderStatus::Confirmed => &mut self.confirmed,
            OrderStatus::Preparing => &mut self.preparing,
            OrderStatus::Ready => &mut self.ready,
            OrderStatus::Completed => &mut self.completed,
            OrderStatus::Cancelled => &mut self.cancelled,
        }
    }

    pub fn get(&self, status: OrderStatus) -> usize {
        match status {
            OrderStatus::Pending => self.pending,
            OrderStatus::Confirmed => self.confirmed,
            OrderStatus::Preparing => self.preparing,
            OrderStatus::Ready => self.ready,
            OrderStatus::Completed => self.completed,
            OrderStatus::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> usize {
        OrderStatus::ALL.iter().map(|status| self.get(*status)).sum()
    }
}

impl<'a> FromIterator<&'a OrderSnapshot> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = &'a OrderSnapshot>>(iter: I) -> Self {
        iter.into_iter().fold(StatusCounts::default(), |mut counts, order| {
            *counts.slot(order.status) += 1;
            counts
        })
    }
}

/// Today's orders for the counter dashboard
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TodaysOrders {
    pub orders: Vec<OrderSnapshot>,
    pub counts: StatusCounts,
    pub total: usize,
    /// Local calendar date the window covers
    #[schema(value_type = String, example = "2024-03-01")]
    pub date: NaiveDate,
    #[schema(example = "Asia/Bangkok")]
    pub timezone: String,
}

#[derive(Clone)]
pub struct DashboardService {
    db: Arc<DbPool>,
    timezone: Tz,
}

impl DashboardService {
    pub fn new(db: Arc<DbPool>, timezone: Tz) -> Self {
        Self { db, timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Orders created since local midnight, newest first.
    pub async fn todays_orders(&self) -> Result<TodaysOrders, ServiceError> {
        self.todays_orders_at(Utc::now()).await
    }

    /// Same as [`todays_orders`](Self::todays_orders) for the day containing `now`.
    #[instrument(skip(self))]
    pub async fn todays_orders_at(&self, now: DateTime<Utc>) -> Result<TodaysOrders, ServiceError> {
        let window = today_window(now, self.timezone);
        debug!(start = %window.start, end = %window.end, "Loading dashboard window");

        let rows = OrderEntity::find()
            .filter(order::Column::CreatedAt.gte(window.start))
            .filter(order::Column::CreatedAt.lt(window.end))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .find_with_related(OrderItemEntity)
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load today's orders");
                ServiceError::from(e)
            })?;

        let mut orders: Vec<(DateTime<Utc>, uuid::Uuid, OrderSnapshot)> = rows
            .into_iter()
            .map(|(order, items)| {
                let (created_at, id) = (order.created_at, order.id);
                (created_at, id, OrderSnapshot::from_models(order, items))
            })
            .collect();
        orders.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let orders: Vec<OrderSnapshot> = orders.into_iter().map(|(_, _, order)| order).collect();

        let counts: StatusCounts = orders.iter().collect();
        Ok(TodaysOrders {
            total: orders.len(),
            counts,
            orders,
            date: window.date,
            timezone: self.timezone.name().to_string(),
        })
    }
}
