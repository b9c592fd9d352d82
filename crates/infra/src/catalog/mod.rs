//! Read-only product catalog port.
//!
//! Products are maintained elsewhere; order processing reads them to build
//! search documents (name and description) when it has no ledger snapshot at hand.

pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use stockorder_core::ProductId;
use stockorder_products::Product;

pub use postgres::PostgresProductCatalog;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog store error: {0}")]
    Store(String),
}

#[async_trait::async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Products for the given ids. Unknown ids are absent from the map.
    async fn get_products(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, CatalogError>;
}

#[async_trait::async_trait]
impl<S> ProductCatalog for Arc<S>
where
    S: ProductCatalog + ?Sized,
{
    async fn get_products(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, CatalogError> {
        (**self).get_products(product_ids).await
    }
}
