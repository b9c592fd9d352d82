//! Order orchestration: the create, update and delete protocols.
//!
//! Each protocol composes the lock coordinator, inventory ledger and order
//! repository:
//!
//! ```text
//! validate
//!   ↓
//! lock every touched product (sorted, fail-fast)
//!   ↓
//! read stock under the locks, check availability
//!   ↓
//! ledger bulk changes (all-or-nothing each)
//!   ↓
//! persist order (compensate ledger on failure)
//!   ↓
//! enqueue search projection, release locks
//! ```
//!
//! Locks are released on every exit path before the result is returned. The
//! projection is queued while the locks are still held, so index updates for
//! one order are enqueued in commit order.
//! Compensating ledger writes that fail are logged at `error` with the product
//! deltas; they are not retried.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn, Instrument};

use stockorder_core::{DomainError, OrderId, ProductId, UserId};
use stockorder_inventory::{AvailabilityError, StockEntry, StockUpdates};
use stockorder_orders::{validate_lines, LineRequest, Order, ReservationPlan, ValidatedLines};

use crate::ledger::{InventoryLedger, LedgerError};
use crate::lock::{acquire_all, AcquireError, LeaseSet, LockCoordinator, LockError};
use crate::repository::{OrderRepository, RepositoryError};
use crate::search::{SearchError, SearchPage, SearchQuery};
use crate::workers::SearchProjector;

#[derive(Debug, Error)]
pub enum OrderError {
    /// Another stock update holds one of the products; retry later.
    #[error("stock update in progress for product {product_id}")]
    StockUpdateInProgress { product_id: ProductId },

    /// `available` is unknown when the storage guard (not the pre-check) refused.
    #[error("no stock available for product {product_id} (requested {requested})")]
    NoStockAvailable {
        product_id: ProductId,
        requested: u32,
        available: Option<i64>,
    },

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// The order's lines changed between loading it and locking its products.
    #[error("order {0} was modified concurrently")]
    OrderChanged(OrderId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Ledger(LedgerError),

    #[error(transparent)]
    Repository(RepositoryError),

    #[error(transparent)]
    Search(#[from] SearchError),

    /// The protocol task panicked or was cancelled by runtime shutdown.
    #[error("order task aborted: {0}")]
    Aborted(String),
}

impl From<LedgerError> for OrderError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InsufficientStock {
                product_id,
                requested,
            } => OrderError::NoStockAvailable {
                product_id,
                requested,
                available: None,
            },
            LedgerError::UnknownProduct(product_id) => OrderError::ProductNotFound(product_id),
            other => OrderError::Ledger(other),
        }
    }
}

impl From<RepositoryError> for OrderError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(order_id) => OrderError::NotFound(order_id),
            other => OrderError::Repository(other),
        }
    }
}

impl From<AvailabilityError> for OrderError {
    fn from(value: AvailabilityError) -> Self {
        match value {
            AvailabilityError::UnknownProduct(product_id) => OrderError::ProductNotFound(product_id),
            AvailabilityError::Insufficient {
                product_id,
                requested,
                available,
            } => OrderError::NoStockAvailable {
                product_id,
                requested,
                available: Some(available),
            },
        }
    }
}

impl From<DomainError> for OrderError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvalidId(msg)
            | DomainError::InvariantViolation(msg) => OrderError::Validation(msg),
        }
    }
}

impl From<AcquireError> for OrderError {
    fn from(value: AcquireError) -> Self {
        match value {
            AcquireError::Busy(product_id) => OrderError::StockUpdateInProgress { product_id },
            AcquireError::Store { source, .. } => OrderError::Lock(source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Undo ledger changes when a later step of the same protocol fails.
    /// Disabled, a failed update or delete leaves stock as the failing step found it.
    pub compensate: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { compensate: true }
    }
}

/// One compensating ledger write.
#[derive(Debug, Clone, Copy)]
enum Undo<'a> {
    Increase(&'a StockUpdates),
    Decrease(&'a StockUpdates),
}

/// Stock-safe order processing over pluggable ports.
///
/// ## Generic Parameters
///
/// - `L`: lease store (`LockCoordinator`)
/// - `I`: inventory ledger (`InventoryLedger`)
/// - `R`: order repository (`OrderRepository`)
///
/// Create, update and delete run on a spawned task. Dropping the returned
/// future (client disconnect, timeout) does not stop a protocol halfway
/// between its ledger and repository writes.
#[derive(Debug)]
pub struct OrderOrchestrator<L, I, R> {
    locks: Arc<L>,
    ledger: Arc<I>,
    orders: Arc<R>,
    projector: Option<SearchProjector>,
    config: OrchestratorConfig,
}

impl<L, I, R> Clone for OrderOrchestrator<L, I, R> {
    fn clone(&self) -> Self {
        Self {
            locks: self.locks.clone(),
            ledger: self.ledger.clone(),
            orders: self.orders.clone(),
            projector: self.projector.clone(),
            config: self.config,
        }
    }
}

impl<L, I, R> OrderOrchestrator<L, I, R>
where
    L: LockCoordinator + 'static,
    I: InventoryLedger + 'static,
    R: OrderRepository + 'static,
{
    pub fn new(locks: L, ledger: I, orders: R) -> Self {
        Self {
            locks: Arc::new(locks),
            ledger: Arc::new(ledger),
            orders: Arc::new(orders),
            projector: None,
            config: OrchestratorConfig::default(),
        }
    }

    /// Mirror committed changes into the search index and serve `list` from it.
    pub fn with_projector(mut self, projector: SearchProjector) -> Self {
        self.projector = Some(projector);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Place a new pending order, reserving its stock.
    #[instrument(skip(self, lines), fields(user_id = %user_id, lines = lines.len()), err)]
    pub async fn create(&self, user_id: UserId, lines: &[LineRequest]) -> Result<OrderId, OrderError> {
        let lines = validate_lines(lines)?;
        let this = self.clone();
        detached(async move { this.run_create(user_id, lines).await }).await
    }

    async fn run_create(&self, user_id: UserId, lines: ValidatedLines) -> Result<OrderId, OrderError> {
        let plan = ReservationPlan::for_create(&lines);

        let leases = self.lock(&plan).await?;
        let result = self.create_locked(user_id, &lines, &plan).await;
        if let (Ok(order), Some(projector)) = (&result, &self.projector) {
            projector.upsert(order.clone());
        }
        leases.release(&*self.locks).await;

        let order_id = result?.id;
        info!(order_id = %order_id, products = plan.reserve.len(), "order created");
        Ok(order_id)
    }

    async fn create_locked(
        &self,
        user_id: UserId,
        lines: &ValidatedLines,
        plan: &ReservationPlan,
    ) -> Result<Order, OrderError> {
        let snapshot = self.snapshot(plan).await?;
        plan.check(&snapshot)?;
        let order = Order::place(user_id, lines.price(&snapshot)?)?;

        self.ledger.decrease_bulk(&plan.reserve).await?;

        if let Err(err) = self.orders.create(&order).await {
            self.compensate(order.id, &[Undo::Increase(&plan.reserve)]).await;
            return Err(err.into());
        }
        Ok(order)
    }

    /// Replace an order's lines, moving its stock reservation accordingly.
    #[instrument(skip(self, lines), fields(order_id = %order_id, lines = lines.len()), err)]
    pub async fn update(&self, order_id: OrderId, lines: &[LineRequest]) -> Result<(), OrderError> {
        let lines = validate_lines(lines)?;
        let this = self.clone();
        detached(async move { this.run_update(order_id, lines).await }).await
    }

    async fn run_update(&self, order_id: OrderId, lines: ValidatedLines) -> Result<(), OrderError> {
        let existing = self.load(order_id).await?;
        let plan = ReservationPlan::for_update(&existing, &lines);

        let leases = self.lock(&plan).await?;
        let result = self.update_locked(existing, &lines, &plan).await;
        if let (Ok(order), Some(projector)) = (&result, &self.projector) {
            projector.upsert(order.clone());
        }
        leases.release(&*self.locks).await;

        let order = result?;
        info!(order_id = %order_id, lines = order.lines.len(), "order updated");
        Ok(())
    }

    async fn update_locked(
        &self,
        existing: Order,
        lines: &ValidatedLines,
        plan: &ReservationPlan,
    ) -> Result<Order, OrderError> {
        self.ensure_unchanged(&existing).await?;

        let snapshot = self.snapshot(plan).await?;
        plan.check(&snapshot)?;
        let mut updated = existing;
        updated.replace_lines(lines.price(&snapshot)?)?;

        self.ledger.increase_bulk(&plan.release).await?;

        if let Err(err) = self.ledger.decrease_bulk(&plan.reserve).await {
            self.compensate(updated.id, &[Undo::Decrease(&plan.release)])
                .await;
            return Err(err.into());
        }

        if let Err(err) = self.orders.replace_lines(&updated).await {
            self.compensate(
                updated.id,
                &[Undo::Increase(&plan.reserve), Undo::Decrease(&plan.release)],
            )
            .await;
            return Err(err.into());
        }
        Ok(updated)
    }

    /// Delete an order and return its stock.
    #[instrument(skip(self), fields(order_id = %order_id), err)]
    pub async fn delete(&self, order_id: OrderId) -> Result<(), OrderError> {
        let this = self.clone();
        detached(async move { this.run_delete(order_id).await }).await
    }

    async fn run_delete(&self, order_id: OrderId) -> Result<(), OrderError> {
        let existing = self.load(order_id).await?;
        let plan = ReservationPlan::for_delete(&existing);

        let leases = self.lock(&plan).await?;
        let result = self.delete_locked(&existing, &plan).await;
        if let (Ok(()), Some(projector)) = (&result, &self.projector) {
            projector.delete(order_id);
        }
        leases.release(&*self.locks).await;

        result?;
        info!(order_id = %order_id, products = plan.release.len(), "order deleted");
        Ok(())
    }

    async fn delete_locked(&self, existing: &Order, plan: &ReservationPlan) -> Result<(), OrderError> {
        self.ensure_unchanged(existing).await?;

        self.ledger.increase_bulk(&plan.release).await?;

        match self.orders.delete(existing.id).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.compensate(existing.id, &[Undo::Decrease(&plan.release)])
                    .await;
                Err(OrderError::NotFound(existing.id))
            }
            Err(err) => {
                self.compensate(existing.id, &[Undo::Decrease(&plan.release)])
                    .await;
                Err(err.into())
            }
        }
    }

    /// Fetch one order with its lines.
    pub async fn get(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.load(order_id).await
    }

    /// Query the search index. Without a projector every query is empty.
    pub async fn list(&self, query: &SearchQuery) -> Result<SearchPage, OrderError> {
        match &self.projector {
            Some(projector) => Ok(projector.list(query).await?),
            None => Ok(SearchPage {
                hits: Vec::new(),
                estimated_total: 0,
                limit: query.limit,
                offset: query.offset,
            }),
        }
    }

    async fn load(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.orders
            .get(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))
    }

    async fn lock(&self, plan: &ReservationPlan) -> Result<LeaseSet, OrderError> {
        acquire_all(&*self.locks, &plan.lock_set())
            .await
            .map_err(|err| {
                warn!(error = %err, "could not lock products for stock update");
                OrderError::from(err)
            })
    }

    async fn snapshot(&self, plan: &ReservationPlan) -> Result<HashMap<ProductId, StockEntry>, OrderError> {
        Ok(self.ledger.get_many(&plan.lock_set()).await?)
    }

    /// Re-read the order under the locks; its reservation must be the one the
    /// lock set was computed from.
    async fn ensure_unchanged(&self, loaded: &Order) -> Result<(), OrderError> {
        let current = self.load(loaded.id).await?;
        if current.reserved() != loaded.reserved() {
            return Err(OrderError::OrderChanged(loaded.id));
        }
        Ok(())
    }

    async fn compensate(&self, order_id: OrderId, steps: &[Undo<'_>]) {
        if !self.config.compensate {
            warn!(order_id = %order_id, "compensation disabled; ledger left as the failed step found it");
            return;
        }

        for step in steps {
            let (direction, updates, result) = match step {
                Undo::Increase(updates) => ("increase", *updates, self.ledger.increase_bulk(updates).await),
                Undo::Decrease(updates) => ("decrease", *updates, self.ledger.decrease_bulk(updates).await),
            };
            if let Err(err) = result {
                let deltas: Vec<String> = updates
                    .iter()
                    .map(|(product_id, qty)| format!("{product_id}:{qty}"))
                    .collect();
                error!(
                    order_id = %order_id,
                    direction,
                    deltas = ?deltas,
                    error = %err,
                    "compensating ledger write failed; stock needs manual repair"
                );
            }
        }
    }
}

/// Run a protocol to completion on its own task, inside the caller's span.
async fn detached<T, F>(protocol: F) -> Result<T, OrderError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, OrderError>> + Send + 'static,
{
    tokio::spawn(protocol.in_current_span())
        .await
        .map_err(|err| OrderError::Aborted(err.to_string()))?
}
