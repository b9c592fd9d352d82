//! Products module (read-only catalog view).
//!
//! Products are owned by the catalog collaborator. Order processing only reads
//! them: the unit price is snapshotted into order lines and name/description feed
//! the search index.

pub mod product;

pub use product::{Product, ProductSummary};
