pub mod order;

pub use order::{
    check_transition, Actor, OrderStatus, OrderType, PaymentMethod, Platform, TimelineStep,
    TransitionRejection, PAYMENT_STATUS_UNPAID,
};
