pub mod common;
pub mod orders;

use crate::{
    config::{AppConfig, AppConfigError},
    db::DbPool,
    events::EventSender,
    services::{
        dashboard::DashboardService, order_status::OrderStatusService, orders::OrderService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub order: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub dashboard: Arc<DashboardService>,
}

impl AppServices {
    /// Builds every service over one shared pool and event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Result<Self, AppConfigError> {
        let timezone = config.operating_timezone()?;

        let order = Arc::new(OrderService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
            config.order_number_max_attempts,
        ));
        let order_status = Arc::new(OrderStatusService::new(
            db_pool.clone(),
            Some(event_sender),
        ));
        let dashboard = Arc::new(DashboardService::new(db_pool, timezone));

        Ok(Self {
            order,
            order_status,
            dashboard,
        })
    }

    /// Swaps the order service, e.g. for one with a different number generator.
    pub fn with_order_service(mut self, order: OrderService) -> Self {
        self.order = Arc::new(order);
        self
    }
}
