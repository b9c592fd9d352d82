//! Order repository port: orders and their lines, persisted together.
//!
//! Each write is one transaction; no partially-written order is ever visible.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use thiserror::Error;

use stockorder_core::OrderId;
use stockorder_orders::Order;

pub use in_memory::InMemoryOrderRepository;
pub use postgres::PostgresOrderRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("order {0} already exists")]
    Conflict(OrderId),

    #[error("order store error: {0}")]
    Store(String),
}

#[async_trait::async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert the order row and all its lines.
    async fn create(&self, order: &Order) -> Result<(), RepositoryError>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Replace the order's lines wholesale and store its new `updated_at`.
    async fn replace_lines(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Remove the order and its lines. Returns `false` if it did not exist.
    async fn delete(&self, id: OrderId) -> Result<bool, RepositoryError>;

    /// Orders by ascending creation time, for index backfill.
    async fn fetch_page(&self, limit: u32, offset: u64) -> Result<Vec<Order>, RepositoryError>;
}

#[async_trait::async_trait]
impl<S> OrderRepository for Arc<S>
where
    S: OrderRepository + ?Sized,
{
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        (**self).create(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        (**self).get(id).await
    }

    async fn replace_lines(&self, order: &Order) -> Result<(), RepositoryError> {
        (**self).replace_lines(order).await
    }

    async fn delete(&self, id: OrderId) -> Result<bool, RepositoryError> {
        (**self).delete(id).await
    }

    async fn fetch_page(&self, limit: u32, offset: u64) -> Result<Vec<Order>, RepositoryError> {
        (**self).fetch_page(limit, offset).await
    }
}
