//! Inventory ledger port: per-product stock counts.
//!
//! Bulk changes are all-or-nothing. A decrease is guarded row by row
//! (`stock >= qty`), so even a caller that skipped the availability check can
//! never drive stock negative; the first row that fails the guard aborts the
//! whole batch.

pub mod in_memory;
pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use stockorder_core::ProductId;
use stockorder_inventory::{StockEntry, StockUpdates};

pub use in_memory::InMemoryInventory;
pub use postgres::PostgresInventoryLedger;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The guarded decrease matched no row: stock would have gone negative
    /// (or the product has no inventory record).
    #[error("insufficient stock for product {product_id} (requested {requested})")]
    InsufficientStock { product_id: ProductId, requested: u32 },

    #[error("product {0} has no inventory record")]
    UnknownProduct(ProductId),

    #[error("ledger store error: {0}")]
    Store(String),
}

#[async_trait::async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Stock and product data for each id that has an inventory record.
    /// Ids without one are simply absent from the map.
    async fn get_many(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, StockEntry>, LedgerError>;

    /// Subtract every quantity, or nothing.
    async fn decrease_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError>;

    /// Add every quantity back, or nothing.
    async fn increase_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError>;
}

#[async_trait::async_trait]
impl<S> InventoryLedger for Arc<S>
where
    S: InventoryLedger + ?Sized,
{
    async fn get_many(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, StockEntry>, LedgerError> {
        (**self).get_many(product_ids).await
    }

    async fn decrease_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError> {
        (**self).decrease_bulk(updates).await
    }

    async fn increase_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError> {
        (**self).increase_bulk(updates).await
    }
}
