use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockorder_core::{OrderId, ProductId, UserId};
use stockorder_infra::{OrderDocument, SearchPage, SearchQuery};
use stockorder_orders::{LineRequest, Order};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersParams {
    pub input: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub id: String,
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_cents: Option<i64>,
    pub items: Vec<OrderItemResponse>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.to_string(),
            status: order.status.as_str().to_string(),
            created_at: order.created_at,
            updated_at: order.updated_at,
            total_cents: order.total().ok().map(|m| m.minor_units()),
            items: order
                .lines
                .iter()
                .map(|l| OrderItemResponse {
                    id: l.id.to_string(),
                    product_id: l.product_id.to_string(),
                    quantity: l.quantity,
                    unit_price_cents: l.unit_price.minor_units(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListOrdersResponse {
    pub hits: Vec<OrderDocument>,
    pub estimated_total: u64,
    pub limit: u32,
    pub offset: u32,
}

impl From<SearchPage> for ListOrdersResponse {
    fn from(page: SearchPage) -> Self {
        Self {
            hits: page.hits,
            estimated_total: page.estimated_total,
            limit: page.limit,
            offset: page.offset,
        }
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_order_id(raw: &str) -> Result<OrderId, axum::response::Response> {
    raw.parse().map_err(|_| errors::invalid_id("invalid order id"))
}

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    raw.parse().map_err(|_| errors::invalid_id("invalid user id"))
}

pub fn parse_items(items: &[OrderItemRequest]) -> Result<Vec<LineRequest>, axum::response::Response> {
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let product_id: ProductId = item
                .product_id
                .parse()
                .map_err(|_| errors::invalid_id(format!("items[{idx}]: invalid product id")))?;
            Ok(LineRequest::new(product_id, item.quantity))
        })
        .collect()
}

fn parse_date(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, axum::response::Response> {
    match raw.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| errors::bad_request(format!("{name} must be RFC 3339: {e}"))),
    }
}

fn parse_count(name: &str, raw: Option<&str>) -> Result<Option<u32>, axum::response::Response> {
    match raw.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| errors::bad_request(format!("{name} must be a non-negative integer"))),
    }
}

impl ListOrdersParams {
    pub fn into_query(self) -> Result<SearchQuery, axum::response::Response> {
        let from = parse_date("start_date", self.start_date.as_deref())?;
        let to = parse_date("end_date", self.end_date.as_deref())?;
        let limit = parse_count("limit", self.limit.as_deref())?;
        let offset = parse_count("offset", self.offset.as_deref())?;

        Ok(SearchQuery::text(self.input.unwrap_or_default())
            .between(from, to)
            .page(limit, offset))
    }
}
