use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle of an order.
///
/// The main line runs pending → confirmed → preparing → ready → completed and only
/// moves forward. Any non-terminal order may also be cancelled.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "ready")]
    Ready,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Forward-only main line, in order.
    pub const MAIN_LINE: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Completed,
    ];

    /// Every status, in the order the dashboard reports them.
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    /// Status every new order starts in.
    pub fn initial() -> Self {
        OrderStatus::Pending
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Position on the main line; `None` for cancelled.
    pub fn stage(self) -> Option<usize> {
        Self::MAIN_LINE.iter().position(|status| *status == self)
    }

    /// Whether the state machine permits moving from `self` to `target`.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.stage(), target.stage()) {
            (_, None) => true,
            (Some(from), Some(to)) => to > from,
            (None, Some(_)) => false,
        }
    }

    /// Human-facing label shown on the order timeline.
    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Order received",
            OrderStatus::Confirmed => "Order confirmed",
            OrderStatus::Preparing => "Preparing",
            OrderStatus::Ready => "Ready for pickup",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Timeline of main-line steps with the ones already reached marked completed.
    /// A cancelled order keeps only the first step completed and ends with a cancelled step.
    pub fn timeline(self) -> Vec<TimelineStep> {
        let reached = self.stage();
        let mut steps: Vec<TimelineStep> = Self::MAIN_LINE
            .iter()
            .enumerate()
            .map(|(index, status)| TimelineStep {
                status: *status,
                text: status.label(),
                completed: match reached {
                    Some(stage) => index <= stage,
                    None => index == 0,
                },
            })
            .collect();

        if self == OrderStatus::Cancelled {
            steps.push(TimelineStep {
                status: OrderStatus::Cancelled,
                text: OrderStatus::Cancelled.label(),
                completed: true,
            });
        }
        steps
    }
}

/// One step of an order's status timeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct TimelineStep {
    pub status: OrderStatus,
    pub text: &'static str,
    pub completed: bool,
}

/// Storefront an order or customer came from.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(8))")]
pub enum Platform {
    #[default]
    #[serde(rename = "WEB")]
    #[strum(serialize = "WEB")]
    #[sea_orm(string_value = "WEB")]
    Web,
    #[serde(rename = "LINE")]
    #[strum(serialize = "LINE")]
    #[sea_orm(string_value = "LINE")]
    Line,
    #[serde(rename = "FB")]
    #[strum(serialize = "FB")]
    #[sea_orm(string_value = "FB")]
    Facebook,
    #[serde(rename = "IG")]
    #[strum(serialize = "IG")]
    #[sea_orm(string_value = "IG")]
    Instagram,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderType {
    #[sea_orm(string_value = "pickup")]
    Pickup,
    #[sea_orm(string_value = "delivery")]
    Delivery,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    #[sea_orm(string_value = "cash")]
    Cash,
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "qr")]
    Qr,
    #[sea_orm(string_value = "bank_transfer")]
    BankTransfer,
}

/// Payment state recorded on new orders. Settlement happens outside this service.
pub const PAYMENT_STATUS_UNPAID: &str = "unpaid";

/// Who is asking for a status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Actor {
    Staff { staff_id: Option<String> },
    Customer,
}

impl Actor {
    pub fn is_staff(&self) -> bool {
        matches!(self, Actor::Staff { .. })
    }

    /// Value recorded as `changed_by` in the status history.
    pub fn label(&self) -> String {
        match self {
            Actor::Staff {
                staff_id: Some(id),
            } => format!("staff:{id}"),
            Actor::Staff { staff_id: None } => "staff".to_string(),
            Actor::Customer => "customer".to_string(),
        }
    }
}

/// Why a requested status change was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransitionRejection {
    #[error("only staff may change the status of an order")]
    NotStaff,
    #[error("order is already {0}")]
    Unchanged(OrderStatus),
    #[error("order is {0} and can no longer change")]
    Terminal(OrderStatus),
    #[error("order cannot move from {from} back to {to}")]
    Backwards { from: OrderStatus, to: OrderStatus },
}

/// Checks a requested status change against the state machine and the caller's role.
pub fn check_transition(
    from: OrderStatus,
    to: OrderStatus,
    actor: &Actor,
) -> Result<(), TransitionRejection> {
    if !actor.is_staff() {
        return Err(TransitionRejection::NotStaff);
    }
    if from == to {
        return Err(TransitionRejection::Unchanged(from));
    }
    if from.is_terminal() {
        return Err(TransitionRejection::Terminal(from));
    }
    if !from.can_transition_to(to) {
        return Err(TransitionRejection::Backwards { from, to });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff() -> Actor {
        Actor::Staff { staff_id: None }
    }

    #[test]
    fn main_line_moves_forward_and_may_skip() {
        assert!(check_transition(OrderStatus::Pending, OrderStatus::Confirmed, &staff()).is_ok());
        assert!(check_transition(OrderStatus::Pending, OrderStatus::Ready, &staff()).is_ok());
        assert!(check_transition(OrderStatus::Ready, OrderStatus::Completed, &staff()).is_ok());
    }

    #[test]
    fn backwards_moves_are_rejected() {
        assert_eq!(
            check_transition(OrderStatus::Preparing, OrderStatus::Confirmed, &staff()),
            Err(TransitionRejection::Backwards {
                from: OrderStatus::Preparing,
                to: OrderStatus::Confirmed
            })
        );
    }

    #[test]
    fn any_open_order_can_be_cancelled() {
        for from in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
        ] {
            assert!(check_transition(from, OrderStatus::Cancelled, &staff()).is_ok());
        }
    }

    #[test]
    fn terminal_states_never_change() {
        for target in OrderStatus::ALL {
            assert!(!OrderStatus::Completed.can_transition_to(target));
            assert!(!OrderStatus::Cancelled.can_transition_to(target));
        }
        assert_eq!(
            check_transition(OrderStatus::Completed, OrderStatus::Cancelled, &staff()),
            Err(TransitionRejection::Terminal(OrderStatus::Completed))
        );
    }

    #[test]
    fn same_status_is_not_a_transition() {
        assert_eq!(
            check_transition(OrderStatus::Ready, OrderStatus::Ready, &staff()),
            Err(TransitionRejection::Unchanged(OrderStatus::Ready))
        );
    }

    #[test]
    fn customers_cannot_transition() {
        assert_eq!(
            check_transition(OrderStatus::Pending, OrderStatus::Cancelled, &Actor::Customer),
            Err(TransitionRejection::NotStaff)
        );
    }

    #[test]
    fn timeline_marks_reached_steps() {
        let steps = OrderStatus::Preparing.timeline();
        let completed: Vec<bool> = steps.iter().map(|s| s.completed).collect();
        assert_eq!(completed, vec![true, true, true, false, false]);
    }

    #[test]
    fn cancelled_timeline_ends_with_cancellation() {
        let steps = OrderStatus::Cancelled.timeline();
        assert_eq!(steps.len(), 6);
        assert!(steps[0].completed);
        assert!(steps[1..5].iter().all(|s| !s.completed));
        assert_eq!(steps[5].status, OrderStatus::Cancelled);
        assert!(steps[5].completed);
    }

    #[test]
    fn wire_names() {
        assert_eq!(
            serde_json::to_value(Platform::Facebook).unwrap(),
            serde_json::json!("FB")
        );
        assert_eq!(Platform::Line.to_string(), "LINE");
        assert_eq!(
            serde_json::from_value::<PaymentMethod>(serde_json::json!("bank_transfer")).unwrap(),
            PaymentMethod::BankTransfer
        );
        assert_eq!(OrderStatus::Ready.to_string(), "ready");
        assert_eq!(Actor::Staff { staff_id: Some("42".into()) }.label(), "staff:42");
    }
}
