//! Order search index port.
//!
//! The index holds one denormalized document per order, keyed by order id,
//! with product name and description nested under each item so free text
//! matches what was ordered. It is eventually consistent with the repository.

pub mod in_memory;
pub mod meilisearch;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockorder_core::{Money, OrderId, ProductId, UserId};
use stockorder_orders::{Order, OrderStatus};
use stockorder_products::ProductSummary;

pub use in_memory::InMemorySearchIndex;
pub use meilisearch::MeilisearchIndex;

/// Field range filters apply to.
pub const CREATED_AT_MS: &str = "created_at_ms";

pub const DEFAULT_SEARCH_LIMIT: u32 = 20;
pub const MAX_SEARCH_LIMIT: u32 = 1000;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search backend unreachable: {0}")]
    Transport(String),

    #[error("search backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("search index not configured: {0}")]
    NotConfigured(String),

    #[error("invalid search document: {0}")]
    Decode(String),
}

/// Attribute declarations the index needs before it can serve queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSettings {
    pub filterable_attributes: Vec<String>,
    pub searchable_attributes: Vec<String>,
    pub sortable_attributes: Vec<String>,
}

impl IndexSettings {
    pub fn for_orders() -> Self {
        Self {
            filterable_attributes: vec![CREATED_AT_MS.to_string()],
            searchable_attributes: vec![
                "items.product.name".to_string(),
                "items.product.description".to_string(),
            ],
            sortable_attributes: vec![CREATED_AT_MS.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemDocument {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub product: ProductSummary,
}

/// Indexed shape of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDocument {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_at_ms: i64,
    pub items: Vec<OrderItemDocument>,
}

impl OrderDocument {
    /// Denormalize an order. Products missing from `products` get an empty summary.
    pub fn from_order(order: &Order, products: &HashMap<ProductId, ProductSummary>) -> Self {
        let items = order
            .lines
            .iter()
            .map(|line| OrderItemDocument {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                product: products.get(&line.product_id).cloned().unwrap_or_default(),
            })
            .collect();

        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            created_at: order.created_at,
            updated_at: order.updated_at,
            created_at_ms: order.created_at.timestamp_millis(),
            items,
        }
    }
}

/// A list query: free text plus an optional inclusive creation-time window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub input: String,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            input: String::new(),
            created_from: None,
            created_to: None,
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
        }
    }
}

impl SearchQuery {
    pub fn text(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.created_from = from;
        self.created_to = to;
        self
    }

    /// Set paging; `limit` is clamped to `1..=MAX_SEARCH_LIMIT`.
    pub fn page(mut self, limit: Option<u32>, offset: Option<u32>) -> Self {
        self.limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);
        self.offset = offset.unwrap_or(0);
        self
    }

    /// Filter on `created_at_ms`, or `None` when the query is unbounded.
    pub fn filter_expression(&self) -> Option<String> {
        let lower = self
            .created_from
            .map(|t| format!("{} >= {}", CREATED_AT_MS, t.timestamp_millis()));
        let upper = self
            .created_to
            .map(|t| format!("{} <= {}", CREATED_AT_MS, t.timestamp_millis()));
        match (lower, upper) {
            (Some(l), Some(u)) => Some(format!("{l} AND {u}")),
            (l, u) => l.or(u),
        }
    }

    /// Whether a creation time falls inside the window.
    pub fn in_window(&self, created_at_ms: i64) -> bool {
        self.created_from
            .is_none_or(|from| created_at_ms >= from.timestamp_millis())
            && self
                .created_to
                .is_none_or(|to| created_at_ms <= to.timestamp_millis())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub hits: Vec<OrderDocument>,
    pub estimated_total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[async_trait::async_trait]
pub trait SearchIndex: Send + Sync {
    /// Declare attribute settings. Idempotent.
    async fn ensure_settings(&self, settings: &IndexSettings) -> Result<(), SearchError>;

    async fn document_count(&self) -> Result<u64, SearchError>;

    /// Insert or replace documents by id.
    async fn upsert(&self, documents: &[OrderDocument]) -> Result<(), SearchError>;

    async fn delete(&self, id: OrderId) -> Result<(), SearchError>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SearchError>;
}

#[async_trait::async_trait]
impl<S> SearchIndex for Arc<S>
where
    S: SearchIndex + ?Sized,
{
    async fn ensure_settings(&self, settings: &IndexSettings) -> Result<(), SearchError> {
        (**self).ensure_settings(settings).await
    }

    async fn document_count(&self) -> Result<u64, SearchError> {
        (**self).document_count().await
    }

    async fn upsert(&self, documents: &[OrderDocument]) -> Result<(), SearchError> {
        (**self).upsert(documents).await
    }

    async fn delete(&self, id: OrderId) -> Result<(), SearchError> {
        (**self).delete(id).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SearchError> {
        (**self).search(query).await
    }
}
