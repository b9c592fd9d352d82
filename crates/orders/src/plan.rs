//! Stock planning for the create/update/delete protocols.
//!
//! ```text
//! create:  release = {}              reserve = requested
//! update:  release = order.reserved  reserve = requested
//! delete:  release = order.reserved  reserve = {}
//! ```
//!
//! The lock set is the sorted union of both sides, so every protocol acquires
//! product locks in the same canonical order.

use std::collections::{BTreeSet, HashMap};

use stockorder_core::{DomainError, DomainResult, ProductId};
use stockorder_inventory::{check_availability, AvailabilityError, StockEntry, StockUpdates};

use crate::order::{LineRequest, Order, OrderLine};

/// Caller lines that passed shape validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLines {
    items: Vec<(ProductId, u32)>,
    totals: StockUpdates,
}

impl ValidatedLines {
    /// Requested quantity per product (repeated products summed).
    pub fn totals(&self) -> &StockUpdates {
        &self.totals
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Build order lines priced from the snapshot's current catalog price.
    pub fn price(
        &self,
        snapshot: &HashMap<ProductId, StockEntry>,
    ) -> Result<Vec<OrderLine>, AvailabilityError> {
        self.items
            .iter()
            .map(|(product_id, quantity)| {
                let entry = snapshot
                    .get(product_id)
                    .ok_or(AvailabilityError::UnknownProduct(*product_id))?;
                Ok(OrderLine::new(*product_id, *quantity, entry.product.unit_price))
            })
            .collect()
    }
}

/// Validate request shape: at least one line, every quantity positive.
///
/// Lines keep their submitted order; quantities for a repeated product are
/// summed into [`ValidatedLines::totals`].
pub fn validate_lines(lines: &[LineRequest]) -> DomainResult<ValidatedLines> {
    if lines.is_empty() {
        return Err(DomainError::validation("items must not be empty"));
    }

    let mut items = Vec::with_capacity(lines.len());
    let mut totals = StockUpdates::new();
    for (idx, line) in lines.iter().enumerate() {
        if line.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "items[{idx}]: quantity must be positive"
            )));
        }
        let quantity = u32::try_from(line.quantity).map_err(|_| {
            DomainError::validation(format!("items[{idx}]: quantity too large"))
        })?;
        totals.add(line.product_id, quantity)?;
        items.push((line.product_id, quantity));
    }

    Ok(ValidatedLines { items, totals })
}

/// What one protocol run gives back to and takes from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPlan {
    /// Quantities returned to stock (the order's existing hold).
    pub release: StockUpdates,
    /// Quantities taken from stock (the new hold).
    pub reserve: StockUpdates,
}

impl ReservationPlan {
    pub fn for_create(lines: &ValidatedLines) -> Self {
        Self {
            release: StockUpdates::new(),
            reserve: lines.totals().clone(),
        }
    }

    pub fn for_update(existing: &Order, lines: &ValidatedLines) -> Self {
        Self {
            release: existing.reserved(),
            reserve: lines.totals().clone(),
        }
    }

    pub fn for_delete(existing: &Order) -> Self {
        Self {
            release: existing.reserved(),
            reserve: StockUpdates::new(),
        }
    }

    /// Distinct products touched by the plan, ascending.
    pub fn lock_set(&self) -> Vec<ProductId> {
        self.release
            .iter()
            .chain(self.reserve.iter())
            .map(|(id, _)| id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Check the reserve side against a snapshot, crediting the release side.
    pub fn check(&self, snapshot: &HashMap<ProductId, StockEntry>) -> Result<(), AvailabilityError> {
        check_availability(&self.reserve, snapshot, &self.release)
    }
}
