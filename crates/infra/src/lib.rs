//! Infrastructure layer: Redis leases, Postgres stores, search index, config,
//! and the order orchestrator that composes them.

pub mod catalog;
pub mod config;
pub mod ledger;
pub mod lock;
pub mod orchestrator;
mod pg;
pub mod repository;
pub mod search;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use catalog::{CatalogError, PostgresProductCatalog, ProductCatalog};
pub use config::{Config, ConfigError, MeilisearchConfig};
pub use ledger::{InMemoryInventory, InventoryLedger, LedgerError, PostgresInventoryLedger};
pub use lock::{
    acquire_all, lock_key, InMemoryLockCoordinator, Lease, LeaseSet, LockCoordinator, LockError,
    RedisLockCoordinator,
};
pub use orchestrator::{OrchestratorConfig, OrderError, OrderOrchestrator};
pub use repository::{
    InMemoryOrderRepository, OrderRepository, PostgresOrderRepository, RepositoryError,
};
pub use search::{
    InMemorySearchIndex, MeilisearchIndex, OrderDocument, SearchError, SearchIndex, SearchPage,
    SearchQuery,
};
pub use workers::{ProjectorHandle, SearchProjector};
