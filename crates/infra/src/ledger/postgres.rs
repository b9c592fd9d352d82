//! Postgres inventory ledger.
//!
//! Stock lives in `inventories (product_id, stock)`, joined to `products` for
//! reads. Each bulk change runs in one transaction with one guarded `UPDATE` per
//! product, issued in ascending product-id order; a zero row count rolls the
//! transaction back.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{instrument, warn, Span};

use stockorder_core::ProductId;
use stockorder_inventory::{StockEntry, StockUpdates};

use super::{InventoryLedger, LedgerError};
use crate::catalog::postgres::ProductRow;
use crate::pg;

#[derive(Debug, Clone)]
pub struct PostgresInventoryLedger {
    pool: Arc<PgPool>,
}

impl PostgresInventoryLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, LedgerError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

struct StockRow(StockEntry);

impl<'r> FromRow<'r, PgRow> for StockRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let ProductRow(product) = ProductRow::from_row(row)?;
        Ok(Self(StockEntry {
            product,
            stock: row.try_get("stock")?,
        }))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    LedgerError::Store(pg::describe(operation, &err))
}

async fn rollback(tx: Transaction<'static, Postgres>, operation: &str) {
    if let Err(err) = tx.rollback().await {
        warn!(operation, error = %err, "ledger rollback failed");
    }
}

#[async_trait::async_trait]
impl InventoryLedger for PostgresInventoryLedger {
    #[instrument(skip(self, product_ids), fields(products = product_ids.len()), err)]
    async fn get_many(
        &self,
        product_ids: &[ProductId],
    ) -> Result<HashMap<ProductId, StockEntry>, LedgerError> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT
                p.id,
                p.name,
                p.description,
                p.price_cents,
                p.created_at,
                p.updated_at,
                i.stock
            FROM inventories i
            JOIN products p ON p.id = i.product_id
            WHERE i.product_id = ANY($1)
            "#,
        )
        .bind(pg::uuids(product_ids))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_many", e))?;

        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            let StockRow(entry) = StockRow::from_row(&row)
                .map_err(|e| LedgerError::Store(format!("failed to decode stock row: {}", e)))?;
            entries.insert(entry.product.id, entry);
        }
        Ok(entries)
    }

    #[instrument(skip(self, updates), fields(products = updates.len(), failed_product), err)]
    async fn decrease_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.begin("decrease_bulk").await?;
        for (product_id, quantity) in updates.iter() {
            let result = sqlx::query(
                r#"
                UPDATE inventories
                SET stock = stock - $2
                WHERE product_id = $1 AND stock >= $2
                "#,
            )
            .bind(product_id.as_uuid())
            .bind(i64::from(quantity))
            .execute(&mut *tx)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 1 => {}
                Ok(_) => {
                    Span::current().record("failed_product", tracing::field::display(product_id));
                    rollback(tx, "decrease_bulk").await;
                    return Err(LedgerError::InsufficientStock {
                        product_id,
                        requested: quantity,
                    });
                }
                Err(err) => {
                    rollback(tx, "decrease_bulk").await;
                    return Err(map_sqlx_error("decrease_bulk", err));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("decrease_bulk", e))
    }

    #[instrument(skip(self, updates), fields(products = updates.len()), err)]
    async fn increase_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.begin("increase_bulk").await?;
        for (product_id, quantity) in updates.iter() {
            let result = sqlx::query(
                r#"
                UPDATE inventories
                SET stock = stock + $2
                WHERE product_id = $1
                "#,
            )
            .bind(product_id.as_uuid())
            .bind(i64::from(quantity))
            .execute(&mut *tx)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 1 => {}
                Ok(_) => {
                    rollback(tx, "increase_bulk").await;
                    return Err(LedgerError::UnknownProduct(product_id));
                }
                Err(err) => {
                    rollback(tx, "increase_bulk").await;
                    return Err(map_sqlx_error("increase_bulk", err));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("increase_bulk", e))
    }
}
