//! Orders domain module.
//!
//! Order and order-line state plus the pure planning half of the order
//! protocols: request validation, price snapshotting and the stock
//! release/reserve sets each protocol needs. No IO, no locking, no storage.

pub mod order;
pub mod plan;

pub use order::{LineRequest, Order, OrderLine, OrderStatus};
pub use plan::{validate_lines, ReservationPlan, ValidatedLines};
