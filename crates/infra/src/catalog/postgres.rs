use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use stockorder_core::{Money, ProductId};
use stockorder_products::Product;

use super::{CatalogError, ProductCatalog};
use crate::pg;

#[derive(Debug, Clone)]
pub struct PostgresProductCatalog {
    pool: Arc<PgPool>,
}

impl PostgresProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

/// `products` row.
pub(crate) struct ProductRow(pub(crate) Product);

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let id: uuid::Uuid = row.try_get("id")?;
        let price_cents: i64 = row.try_get("price_cents")?;
        Ok(Self(Product {
            id: ProductId::from_uuid(id),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            unit_price: Money::from_minor(price_cents),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

#[async_trait::async_trait]
impl ProductCatalog for PostgresProductCatalog {
    #[instrument(skip(self, product_ids), fields(products = product_ids.len()), err)]
    async fn get_products(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, CatalogError> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, name, description, price_cents, created_at, updated_at
            FROM products
            WHERE id = ANY($1)
            "#,
        )
        .bind(pg::uuids(product_ids))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CatalogError::Store(pg::describe("get_products", &e)))?;

        let mut products = HashMap::with_capacity(rows.len());
        for row in rows {
            let ProductRow(product) = ProductRow::from_row(&row)
                .map_err(|e| CatalogError::Store(format!("failed to decode product row: {}", e)))?;
            products.insert(product.id, product);
        }
        Ok(products)
    }
}
