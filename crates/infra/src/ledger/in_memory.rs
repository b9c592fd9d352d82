use std::collections::HashMap;
use std::sync::RwLock;

use stockorder_core::ProductId;
use stockorder_inventory::{StockEntry, StockUpdates};
use stockorder_products::Product;

use super::{InventoryLedger, LedgerError};
use crate::catalog::{CatalogError, ProductCatalog};

/// In-memory inventory: products plus their stock rows.
///
/// Intended for tests/dev. Serves as both ledger and catalog so the two views
/// always agree.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    rows: RwLock<HashMap<ProductId, StockEntry>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a product with the given stock.
    pub fn seed(&self, product: Product, stock: i64) -> Result<(), LedgerError> {
        let mut rows = self.write()?;
        rows.insert(product.id, StockEntry { product, stock });
        Ok(())
    }

    /// Current stock for a product, if it has a record.
    pub fn stock_of(&self, product_id: ProductId) -> Option<i64> {
        self.rows
            .read()
            .ok()
            .and_then(|rows| rows.get(&product_id).map(|e| e.stock))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ProductId, StockEntry>>, LedgerError> {
        self.rows
            .write()
            .map_err(|_| LedgerError::Store("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl InventoryLedger for InMemoryInventory {
    async fn get_many(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, StockEntry>, LedgerError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| LedgerError::Store("lock poisoned".to_string()))?;
        Ok(product_ids
            .iter()
            .filter_map(|id| rows.get(id).map(|e| (*id, e.clone())))
            .collect())
    }

    async fn decrease_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError> {
        let mut rows = self.write()?;

        // Validate the whole batch before touching anything.
        let mut next = Vec::with_capacity(updates.len());
        for (product_id, quantity) in updates.iter() {
            let remaining = rows
                .get(&product_id)
                .and_then(|e| e.after_decrease(quantity))
                .ok_or(LedgerError::InsufficientStock {
                    product_id,
                    requested: quantity,
                })?;
            next.push((product_id, remaining));
        }

        for (product_id, stock) in next {
            if let Some(entry) = rows.get_mut(&product_id) {
                entry.stock = stock;
            }
        }
        Ok(())
    }

    async fn increase_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError> {
        let mut rows = self.write()?;

        if let Some(missing) = updates.product_ids().into_iter().find(|id| !rows.contains_key(id)) {
            return Err(LedgerError::UnknownProduct(missing));
        }

        for (product_id, quantity) in updates.iter() {
            if let Some(entry) = rows.get_mut(&product_id) {
                entry.stock = entry.stock.saturating_add(i64::from(quantity));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProductCatalog for InMemoryInventory {
    async fn get_products(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, CatalogError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| CatalogError::Store("lock poisoned".to_string()))?;
        Ok(product_ids
            .iter()
            .filter_map(|id| rows.get(id).map(|e| (*id, e.product.clone())))
            .collect())
    }
}
