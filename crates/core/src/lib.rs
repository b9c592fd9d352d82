//! `stockorder-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;

pub use error::{DomainError, DomainResult};
pub use id::{OrderId, OrderLineId, ProductId, UserId};
pub use money::Money;
