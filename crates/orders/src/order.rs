use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockorder_core::{DomainError, DomainResult, Money, OrderId, OrderLineId, ProductId, UserId};
use stockorder_inventory::StockUpdates;

/// Order status lifecycle. Orders are created `pending`; the orchestration
/// protocols never move them anywhere else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
        }
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            other => Err(DomainError::validation(format!("unknown order status '{other}'"))),
        }
    }
}

/// Requested line as received from the caller (not yet priced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl LineRequest {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self { product_id, quantity }
    }
}

/// Order line: product, quantity, unit price captured when the line was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: u32, unit_price: Money) -> Self {
        Self {
            id: OrderLineId::new(),
            product_id,
            quantity,
            unit_price,
        }
    }

    pub fn line_total(&self) -> DomainResult<Money> {
        self.unit_price.times(self.quantity)
    }
}

/// An order and the lines it exclusively owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Build a new pending order. At least one line is required.
    pub fn place(user_id: UserId, lines: Vec<OrderLine>) -> DomainResult<Self> {
        ensure_lines(&lines)?;
        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            user_id,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            lines,
        })
    }

    /// Replace all lines wholesale and bump `updated_at`.
    pub fn replace_lines(&mut self, lines: Vec<OrderLine>) -> DomainResult<()> {
        ensure_lines(&lines)?;
        self.lines = lines;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Stock currently held by this order, per product.
    pub fn reserved(&self) -> StockUpdates {
        self.lines.iter().map(|l| (l.product_id, l.quantity)).collect()
    }

    pub fn total(&self) -> DomainResult<Money> {
        self.lines
            .iter()
            .try_fold(Money::ZERO, |acc, line| acc.checked_add(line.line_total()?))
    }
}

fn ensure_lines(lines: &[OrderLine]) -> DomainResult<()> {
    if lines.is_empty() {
        return Err(DomainError::validation("an order needs at least one line"));
    }
    if lines.iter().any(|l| l.quantity == 0) {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(())
}
