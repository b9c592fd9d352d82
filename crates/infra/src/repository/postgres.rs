//! Postgres order repository.
//!
//! Tables: `orders (id, user_id, status, created_at, updated_at)` and
//! `order_lines (id, order_id, line_no, product_id, quantity, unit_price_cents)`.
//! `line_no` keeps lines in submitted order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};
use uuid::Uuid;

use stockorder_core::{Money, OrderId, OrderLineId, ProductId, UserId};
use stockorder_orders::{Order, OrderLine, OrderStatus};

use super::{OrderRepository, RepositoryError};
use crate::pg;

#[derive(Debug, Clone)]
pub struct PostgresOrderRepository {
    pool: Arc<PgPool>,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, RepositoryError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    async fn lines_for(
        &self,
        order_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<OrderLine>>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, quantity, unit_price_cents
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_lines", e))?;

        let mut by_order: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in rows {
            let line = LineRow::from_row(&row).map_err(decode_error)?;
            by_order.entry(line.order_id).or_default().push(line.line);
        }
        Ok(by_order)
    }
}

struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for OrderRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLine>) -> Result<Order, RepositoryError> {
        let status: OrderStatus = self
            .status
            .parse()
            .map_err(|e| RepositoryError::Store(format!("order {}: {}", self.id, e)))?;
        Ok(Order {
            id: OrderId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            lines,
        })
    }
}

struct LineRow {
    order_id: Uuid,
    line: OrderLine,
}

impl<'r> FromRow<'r, PgRow> for LineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity).map_err(|e| sqlx::Error::ColumnDecode {
            index: "quantity".to_string(),
            source: Box::new(e),
        })?;
        Ok(Self {
            order_id: row.try_get("order_id")?,
            line: OrderLine {
                id: OrderLineId::from_uuid(row.try_get("id")?),
                product_id: ProductId::from_uuid(row.try_get("product_id")?),
                quantity,
                unit_price: Money::from_minor(row.try_get("unit_price_cents")?),
            },
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    RepositoryError::Store(pg::describe(operation, &err))
}

fn decode_error(err: sqlx::Error) -> RepositoryError {
    RepositoryError::Store(format!("failed to decode order row: {}", err))
}

async fn insert_lines(
    tx: &mut Transaction<'static, Postgres>,
    order: &Order,
) -> Result<(), sqlx::Error> {
    for (line_no, line) in order.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_lines (id, order_id, line_no, product_id, quantity, unit_price_cents)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(line.id.as_uuid())
        .bind(order.id.as_uuid())
        .bind(i32::try_from(line_no).unwrap_or(i32::MAX))
        .bind(line.product_id.as_uuid())
        .bind(i64::from(line.quantity))
        .bind(line.unit_price.minor_units())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[instrument(skip(self, order), fields(order_id = %order.id, lines = order.lines.len()), err)]
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut tx = self.begin("create_order").await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if pg::is_unique_violation(&e) {
                RepositoryError::Conflict(order.id)
            } else {
                map_sqlx_error("create_order", e)
            }
        })?;

        insert_lines(&mut tx, order)
            .await
            .map_err(|e| map_sqlx_error("create_order_lines", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_order", e))
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_order", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let order_row = OrderRow::from_row(&row).map_err(decode_error)?;
        let lines = self
            .lines_for(&[order_row.id])
            .await?
            .remove(&order_row.id)
            .unwrap_or_default();
        order_row.into_order(lines).map(Some)
    }

    #[instrument(skip(self, order), fields(order_id = %order.id, lines = order.lines.len()), err)]
    async fn replace_lines(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut tx = self.begin("replace_lines").await?;

        let touched = sqlx::query("UPDATE orders SET updated_at = $2 WHERE id = $1")
            .bind(order.id.as_uuid())
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_lines", e))?;
        if touched.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(order.id));
        }

        sqlx::query("DELETE FROM order_lines WHERE order_id = $1")
            .bind(order.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_lines", e))?;

        insert_lines(&mut tx, order)
            .await
            .map_err(|e| map_sqlx_error("replace_lines", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("replace_lines", e))
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn delete(&self, id: OrderId) -> Result<bool, RepositoryError> {
        let mut tx = self.begin("delete_order").await?;

        sqlx::query("DELETE FROM order_lines WHERE order_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order", e))?;

        let deleted = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("delete_order", e))?;
        Ok(deleted.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(order_count), err)]
    async fn fetch_page(&self, limit: u32, offset: u64) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, status, created_at, updated_at
            FROM orders
            ORDER BY created_at ASC, id ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_page", e))?;

        let order_rows = rows
            .iter()
            .map(OrderRow::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?;
        let ids: Vec<Uuid> = order_rows.iter().map(|r| r.id).collect();
        let mut lines = self.lines_for(&ids).await?;

        let orders = order_rows
            .into_iter()
            .map(|r| {
                let order_lines = lines.remove(&r.id).unwrap_or_default();
                r.into_order(order_lines)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("order_count", orders.len());
        Ok(orders)
    }
}
