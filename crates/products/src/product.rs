use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockorder_core::{Money, ProductId};

/// Catalog product as seen by order processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    /// Current catalog price; copied into order lines, never referenced live.
    pub unit_price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        id: ProductId,
        name: impl Into<String>,
        description: impl Into<String>,
        unit_price: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: description.into(),
            unit_price,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn summary(&self) -> ProductSummary {
        ProductSummary {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Searchable text of a product, nested into indexed order documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub name: String,
    pub description: String,
}
