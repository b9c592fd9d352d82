use std::collections::HashMap;
use std::sync::RwLock;

use stockorder_core::OrderId;
use stockorder_orders::Order;

use super::{OrderRepository, RepositoryError};

/// In-memory order store.
///
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored order.
    pub fn all(&self) -> Vec<Order> {
        self.orders
            .read()
            .map(|orders| orders.values().cloned().collect())
            .unwrap_or_default()
    }

    fn poisoned() -> RepositoryError {
        RepositoryError::Store("lock poisoned".to_string())
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().map_err(|_| Self::poisoned())?;
        if orders.contains_key(&order.id) {
            return Err(RepositoryError::Conflict(order.id));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().map_err(|_| Self::poisoned())?;
        Ok(orders.get(&id).cloned())
    }

    async fn replace_lines(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().map_err(|_| Self::poisoned())?;
        let stored = orders
            .get_mut(&order.id)
            .ok_or(RepositoryError::NotFound(order.id))?;
        stored.lines = order.lines.clone();
        stored.updated_at = order.updated_at;
        Ok(())
    }

    async fn delete(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let mut orders = self.orders.write().map_err(|_| Self::poisoned())?;
        Ok(orders.remove(&id).is_some())
    }

    async fn fetch_page(&self, limit: u32, offset: u64) -> Result<Vec<Order>, RepositoryError> {
        let orders = self.orders.read().map_err(|_| Self::poisoned())?;
        let mut page: Vec<Order> = orders.values().cloned().collect();
        page.sort_by_key(|o| (o.created_at, o.id));
        Ok(page
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect())
    }
}
