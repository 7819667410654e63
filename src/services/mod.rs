pub mod customers;
pub mod dashboard;
pub mod order_number;
pub mod order_status;
pub mod orders;
