use std::collections::btree_map;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockorder_core::{DomainError, ProductId};
use stockorder_products::Product;

/// One inventory record joined with its catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub product: Product,
    /// Units on hand. Never negative once committed.
    pub stock: i64,
}

impl StockEntry {
    /// Stock left after taking `quantity`, or `None` if that would go negative.
    pub fn after_decrease(&self, quantity: u32) -> Option<i64> {
        let next = self.stock.checked_sub(i64::from(quantity))?;
        (next >= 0).then_some(next)
    }
}

/// Per-product quantities for one bulk ledger operation.
///
/// Keyed by product so that repeated products collapse into one row update, and
/// ordered so every adapter touches rows (and takes locks) in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdates(BTreeMap<ProductId, u32>);

impl StockUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` for `product_id`, summing with any existing entry.
    pub fn add(&mut self, product_id: ProductId, quantity: u32) -> Result<(), DomainError> {
        let slot = self.0.entry(product_id).or_insert(0);
        *slot = slot
            .checked_add(quantity)
            .ok_or_else(|| DomainError::validation(format!("quantity overflow for product {product_id}")))?;
        Ok(())
    }

    pub fn get(&self, product_id: &ProductId) -> u32 {
        self.0.get(product_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Product ids in ascending order.
    pub fn product_ids(&self) -> Vec<ProductId> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProductId, u32)> + '_ {
        self.0.iter().map(|(id, qty)| (*id, *qty))
    }
}

impl FromIterator<(ProductId, u32)> for StockUpdates {
    /// Collects pairs, summing duplicates. Saturates instead of failing; use
    /// [`StockUpdates::add`] where overflow must be reported.
    fn from_iter<I: IntoIterator<Item = (ProductId, u32)>>(iter: I) -> Self {
        let mut map = BTreeMap::new();
        for (id, qty) in iter {
            let slot: &mut u32 = map.entry(id).or_insert(0);
            *slot = slot.saturating_add(qty);
        }
        Self(map)
    }
}

impl IntoIterator for StockUpdates {
    type Item = (ProductId, u32);
    type IntoIter = btree_map::IntoIter<ProductId, u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvailabilityError {
    #[error("product {0} has no inventory record")]
    UnknownProduct(ProductId),

    #[error("not enough stock for product {product_id} (requested {requested}, available {available})")]
    Insufficient {
        product_id: ProductId,
        requested: u32,
        available: i64,
    },
}

/// Check that every requested quantity fits in the snapshot.
///
/// `held` is what the caller's own order already reserves; it is returned to the
/// pool before comparing, so an update may re-use its existing reservation.
/// Products are checked in ascending id order; the first failure wins.
pub fn check_availability(
    requested: &StockUpdates,
    snapshot: &HashMap<ProductId, StockEntry>,
    held: &StockUpdates,
) -> Result<(), AvailabilityError> {
    for (product_id, quantity) in requested.iter() {
        let entry = snapshot
            .get(&product_id)
            .ok_or(AvailabilityError::UnknownProduct(product_id))?;
        let available = entry.stock.saturating_add(i64::from(held.get(&product_id)));
        if available < i64::from(quantity) {
            return Err(AvailabilityError::Insufficient {
                product_id,
                requested: quantity,
                available,
            });
        }
    }
    Ok(())
}
