//! Inventory domain module.
//!
//! Stock arithmetic and availability rules, implemented as deterministic domain
//! logic (no IO, no locking, no storage). The ledger adapters in
//! `stockorder-infra` apply these rules transactionally.

pub mod stock;

pub use stock::{check_availability, AvailabilityError, StockEntry, StockUpdates};
