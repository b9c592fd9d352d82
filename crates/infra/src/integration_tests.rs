//! Integration tests for the order protocols.
//!
//! Tests: Orchestrator → LockCoordinator → InventoryLedger → OrderRepository → SearchProjector
//!
//! Verifies:
//! - Stock never goes negative and is conserved across create/update/delete
//! - Locks are released on every exit path
//! - Failed steps are compensated
//! - Index failures never reach the caller

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tokio::sync::Notify;

use stockorder_core::{Money, OrderId, ProductId, UserId};
use stockorder_inventory::{StockEntry, StockUpdates};
use stockorder_orders::{LineRequest, Order, OrderLine};
use stockorder_products::Product;

use crate::ledger::{InMemoryInventory, InventoryLedger, LedgerError};
use crate::lock::{InMemoryLockCoordinator, Lease, LockCoordinator, LockError};
use crate::orchestrator::{OrchestratorConfig, OrderError, OrderOrchestrator};
use crate::repository::{InMemoryOrderRepository, OrderRepository, RepositoryError};
use crate::search::{
    IndexSettings, InMemorySearchIndex, OrderDocument, SearchError, SearchIndex, SearchPage,
    SearchQuery,
};
use crate::workers::{SearchProjector, BACKFILL_BATCH_SIZE};

type Orchestrator = OrderOrchestrator<
    Arc<InMemoryLockCoordinator>,
    Arc<InMemoryInventory>,
    Arc<InMemoryOrderRepository>,
>;

struct Fixture {
    locks: Arc<InMemoryLockCoordinator>,
    inventory: Arc<InMemoryInventory>,
    orders: Arc<InMemoryOrderRepository>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            locks: Arc::new(InMemoryLockCoordinator::default()),
            inventory: Arc::new(InMemoryInventory::new()),
            orders: Arc::new(InMemoryOrderRepository::new()),
        }
    }

    fn product(&self, name: &str, stock: i64, cents: i64) -> ProductId {
        let id = ProductId::new();
        self.inventory
            .seed(Product::new(id, name, format!("{name} for testing"), Money::from_minor(cents)), stock)
            .unwrap();
        id
    }

    fn stock(&self, id: ProductId) -> i64 {
        self.inventory.stock_of(id).unwrap()
    }

    fn orchestrator(&self) -> Orchestrator {
        OrderOrchestrator::new(self.locks.clone(), self.inventory.clone(), self.orders.clone())
    }

    fn none_locked(&self, ids: &[ProductId]) -> bool {
        ids.iter().all(|id| !self.locks.is_locked(*id))
    }
}

fn line(product_id: ProductId, quantity: i64) -> LineRequest {
    LineRequest::new(product_id, quantity)
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Repository whose writes can be made to fail.
#[derive(Default)]
struct FlakyRepository {
    inner: InMemoryOrderRepository,
    fail_create: AtomicBool,
    fail_replace: AtomicBool,
    fail_delete: AtomicBool,
}

fn injected(flag: &AtomicBool) -> Result<(), RepositoryError> {
    if flag.load(Ordering::SeqCst) {
        return Err(RepositoryError::Store("injected failure".to_string()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl OrderRepository for FlakyRepository {
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        injected(&self.fail_create)?;
        self.inner.create(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        self.inner.get(id).await
    }

    async fn replace_lines(&self, order: &Order) -> Result<(), RepositoryError> {
        injected(&self.fail_replace)?;
        self.inner.replace_lines(order).await
    }

    async fn delete(&self, id: OrderId) -> Result<bool, RepositoryError> {
        injected(&self.fail_delete)?;
        self.inner.delete(id).await
    }

    async fn fetch_page(&self, limit: u32, offset: u64) -> Result<Vec<Order>, RepositoryError> {
        self.inner.fetch_page(limit, offset).await
    }
}

/// Ledger whose next decrease fails as if the storage guard refused it.
struct GuardTrippingLedger {
    inner: Arc<InMemoryInventory>,
    trip_next_decrease: AtomicBool,
}

#[async_trait::async_trait]
impl InventoryLedger for GuardTrippingLedger {
    async fn get_many(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, StockEntry>, LedgerError> {
        self.inner.get_many(ids).await
    }

    async fn decrease_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError> {
        if self.trip_next_decrease.swap(false, Ordering::SeqCst) {
            let (product_id, requested) = updates.iter().next().unwrap_or((ProductId::new(), 0));
            return Err(LedgerError::InsufficientStock { product_id, requested });
        }
        self.inner.decrease_bulk(updates).await
    }

    async fn increase_bulk(&self, updates: &StockUpdates) -> Result<(), LedgerError> {
        self.inner.increase_bulk(updates).await
    }
}

/// Index that records upsert batch sizes.
#[derive(Default)]
struct RecordingIndex {
    inner: InMemorySearchIndex,
    batches: Mutex<Vec<usize>>,
}

#[async_trait::async_trait]
impl SearchIndex for RecordingIndex {
    async fn ensure_settings(&self, settings: &IndexSettings) -> Result<(), SearchError> {
        self.inner.ensure_settings(settings).await
    }

    async fn document_count(&self) -> Result<u64, SearchError> {
        self.inner.document_count().await
    }

    async fn upsert(&self, documents: &[OrderDocument]) -> Result<(), SearchError> {
        self.batches.lock().unwrap().push(documents.len());
        self.inner.upsert(documents).await
    }

    async fn delete(&self, id: OrderId) -> Result<(), SearchError> {
        self.inner.delete(id).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SearchError> {
        self.inner.search(query).await
    }
}

/// Index that is always down.
struct UnreachableIndex;

#[async_trait::async_trait]
impl SearchIndex for UnreachableIndex {
    async fn ensure_settings(&self, _: &IndexSettings) -> Result<(), SearchError> {
        Err(SearchError::Transport("connection refused".to_string()))
    }

    async fn document_count(&self) -> Result<u64, SearchError> {
        Err(SearchError::Transport("connection refused".to_string()))
    }

    async fn upsert(&self, _: &[OrderDocument]) -> Result<(), SearchError> {
        Err(SearchError::Transport("connection refused".to_string()))
    }

    async fn delete(&self, _: OrderId) -> Result<(), SearchError> {
        Err(SearchError::Transport("connection refused".to_string()))
    }

    async fn search(&self, _: &SearchQuery) -> Result<SearchPage, SearchError> {
        Err(SearchError::Transport("connection refused".to_string()))
    }
}

/// Repository whose writes take a while.
struct SlowRepository {
    inner: InMemoryOrderRepository,
    delay: Duration,
}

#[async_trait::async_trait]
impl OrderRepository for SlowRepository {
    async fn create(&self, order: &Order) -> Result<(), RepositoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.create(order).await
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        self.inner.get(id).await
    }

    async fn replace_lines(&self, order: &Order) -> Result<(), RepositoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.replace_lines(order).await
    }

    async fn delete(&self, id: OrderId) -> Result<bool, RepositoryError> {
        self.inner.delete(id).await
    }

    async fn fetch_page(&self, limit: u32, offset: u64) -> Result<Vec<Order>, RepositoryError> {
        self.inner.fetch_page(limit, offset).await
    }
}

/// Lease store that, once armed, parks the next releaser right after its
/// lease is gone until `resume` is notified.
struct PausingLocks {
    inner: Arc<InMemoryLockCoordinator>,
    armed: AtomicBool,
    released: Notify,
    resume: Notify,
}

impl PausingLocks {
    fn new(inner: Arc<InMemoryLockCoordinator>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            released: Notify::new(),
            resume: Notify::new(),
        }
    }
}

#[async_trait::async_trait]
impl LockCoordinator for PausingLocks {
    async fn try_acquire(&self, product_id: ProductId) -> Result<Option<Lease>, LockError> {
        self.inner.try_acquire(product_id).await
    }

    async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        self.inner.release(lease).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.released.notify_one();
            self.resume.notified().await;
        }
        Ok(())
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_with_exact_stock_empties_it() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 4, 1000);
    let orch = fx.orchestrator();

    let order_id = orch.create(UserId::new(), &[line(a, 4)]).await.unwrap();

    assert_eq!(fx.stock(a), 0);
    let order = orch.get(order_id).await.unwrap();
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].unit_price, Money::from_minor(1000));
    assert!(fx.none_locked(&[a]));
}

#[tokio::test]
async fn create_beyond_stock_fails_without_mutation() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 4, 1000);
    let orch = fx.orchestrator();

    let err = orch.create(UserId::new(), &[line(a, 5)]).await.unwrap_err();

    assert!(matches!(
        err,
        OrderError::NoStockAvailable { product_id, requested: 5, available: Some(4) } if product_id == a
    ));
    assert_eq!(fx.stock(a), 4);
    assert!(fx.orders.all().is_empty());
    assert!(fx.none_locked(&[a]));
}

#[tokio::test]
async fn create_with_one_product_locked_fails_whole_order() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let b = fx.product("Bolt", 5, 500);
    let orch = fx.orchestrator();

    let held = fx.locks.try_acquire(b).await.unwrap().unwrap();
    let err = orch
        .create(UserId::new(), &[line(a, 1), line(b, 1)])
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::StockUpdateInProgress { product_id } if product_id == b));
    assert_eq!(fx.stock(a), 10);
    assert_eq!(fx.stock(b), 5);
    assert!(!fx.locks.is_locked(a));

    fx.locks.release(&held).await.unwrap();
}

#[tokio::test]
async fn create_rejects_bad_shapes_before_locking() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let orch = fx.orchestrator();

    assert!(matches!(orch.create(UserId::new(), &[]).await, Err(OrderError::Validation(_))));
    assert!(matches!(
        orch.create(UserId::new(), &[line(a, 0)]).await,
        Err(OrderError::Validation(_))
    ));
    assert_eq!(fx.stock(a), 10);
}

#[tokio::test]
async fn create_with_unknown_product_is_product_not_found() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let ghost = ProductId::new();
    let orch = fx.orchestrator();

    let err = orch
        .create(UserId::new(), &[line(a, 1), line(ghost, 1)])
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::ProductNotFound(id) if id == ghost));
    assert_eq!(fx.stock(a), 10);
    assert!(fx.none_locked(&[a, ghost]));
}

#[tokio::test]
async fn repeated_product_lines_are_checked_as_a_total() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 5, 1000);
    let orch = fx.orchestrator();

    let err = orch
        .create(UserId::new(), &[line(a, 3), line(a, 3)])
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::NoStockAvailable { requested: 6, .. }));

    let id = orch.create(UserId::new(), &[line(a, 2), line(a, 3)]).await.unwrap();
    assert_eq!(fx.stock(a), 0);
    assert_eq!(orch.get(id).await.unwrap().lines.len(), 2);
}

#[tokio::test]
async fn create_persist_failure_returns_stock() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let repo = Arc::new(FlakyRepository::default());
    repo.fail_create.store(true, Ordering::SeqCst);
    let orch = OrderOrchestrator::new(fx.locks.clone(), fx.inventory.clone(), repo.clone());

    let err = orch.create(UserId::new(), &[line(a, 3)]).await.unwrap_err();

    assert!(matches!(err, OrderError::Repository(_)));
    assert_eq!(fx.stock(a), 10);
    assert!(fx.none_locked(&[a]));
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_can_grow_into_spare_stock() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 5, 1000);
    let orch = fx.orchestrator();
    let id = orch.create(UserId::new(), &[line(a, 3)]).await.unwrap();
    assert_eq!(fx.stock(a), 2);

    orch.update(id, &[line(a, 5)]).await.unwrap();

    assert_eq!(fx.stock(a), 0);
    let order = orch.get(id).await.unwrap();
    assert_eq!(order.lines[0].quantity, 5);
    assert!(order.updated_at >= order.created_at);
}

#[tokio::test]
async fn update_without_spare_stock_leaves_order_alone() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 3, 1000);
    let orch = fx.orchestrator();
    let id = orch.create(UserId::new(), &[line(a, 3)]).await.unwrap();
    let before = orch.get(id).await.unwrap();

    let err = orch.update(id, &[line(a, 5)]).await.unwrap_err();

    assert!(matches!(err, OrderError::NoStockAvailable { available: Some(3), .. }));
    assert_eq!(fx.stock(a), 0);
    assert_eq!(orch.get(id).await.unwrap(), before);
    assert!(fx.none_locked(&[a]));
}

#[tokio::test]
async fn update_moves_reservation_between_products_at_fresh_prices() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let b = fx.product("Bolt", 5, 500);
    let orch = fx.orchestrator();
    let id = orch.create(UserId::new(), &[line(a, 4)]).await.unwrap();

    fx.inventory
        .seed(Product::new(b, "Bolt", "", Money::from_minor(650)), 5)
        .unwrap();
    orch.update(id, &[line(b, 2)]).await.unwrap();

    assert_eq!(fx.stock(a), 10);
    assert_eq!(fx.stock(b), 3);
    let order = orch.get(id).await.unwrap();
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].product_id, b);
    assert_eq!(order.lines[0].unit_price, Money::from_minor(650));
}

#[tokio::test]
async fn update_of_missing_order_is_not_found() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let orch = fx.orchestrator();

    let err = orch.update(OrderId::new(), &[line(a, 1)]).await.unwrap_err();
    assert!(matches!(err, OrderError::NotFound(_)));
}

#[tokio::test]
async fn update_locked_by_another_operation_fails_fast() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let b = fx.product("Bolt", 10, 500);
    let orch = fx.orchestrator();
    let id = orch.create(UserId::new(), &[line(a, 1)]).await.unwrap();

    let held = fx.locks.try_acquire(b).await.unwrap().unwrap();
    let err = orch.update(id, &[line(b, 1)]).await.unwrap_err();

    assert!(matches!(err, OrderError::StockUpdateInProgress { product_id } if product_id == b));
    assert_eq!(fx.stock(a), 9);
    assert_eq!(fx.stock(b), 10);
    fx.locks.release(&held).await.unwrap();
}

#[tokio::test]
async fn update_repository_failure_restores_old_reservation() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let b = fx.product("Bolt", 10, 500);
    let repo = Arc::new(FlakyRepository::default());
    let orch = OrderOrchestrator::new(fx.locks.clone(), fx.inventory.clone(), repo.clone());
    let id = orch.create(UserId::new(), &[line(a, 4)]).await.unwrap();

    repo.fail_replace.store(true, Ordering::SeqCst);
    let err = orch.update(id, &[line(a, 1), line(b, 3)]).await.unwrap_err();

    assert!(matches!(err, OrderError::Repository(_)));
    assert_eq!(fx.stock(a), 6);
    assert_eq!(fx.stock(b), 10);
    assert_eq!(orch.get(id).await.unwrap().lines[0].quantity, 4);
    assert!(fx.none_locked(&[a, b]));
}

#[tokio::test]
async fn update_repository_failure_without_compensation_leaves_new_reservation() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let repo = Arc::new(FlakyRepository::default());
    let orch = OrderOrchestrator::new(fx.locks.clone(), fx.inventory.clone(), repo.clone())
        .with_config(OrchestratorConfig { compensate: false });
    let id = orch.create(UserId::new(), &[line(a, 4)]).await.unwrap();

    repo.fail_replace.store(true, Ordering::SeqCst);
    orch.update(id, &[line(a, 1)]).await.unwrap_err();

    // Ledger reflects the new lines; the stored order still has the old ones.
    assert_eq!(fx.stock(a), 9);
    assert_eq!(orch.get(id).await.unwrap().lines[0].quantity, 4);
}

#[tokio::test]
async fn update_guard_failure_reapplies_old_reservation() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let ledger = Arc::new(GuardTrippingLedger {
        inner: fx.inventory.clone(),
        trip_next_decrease: AtomicBool::new(false),
    });
    let orch = OrderOrchestrator::new(fx.locks.clone(), ledger.clone(), fx.orders.clone());
    let id = orch.create(UserId::new(), &[line(a, 4)]).await.unwrap();

    ledger.trip_next_decrease.store(true, Ordering::SeqCst);
    let err = orch.update(id, &[line(a, 2)]).await.unwrap_err();

    assert!(matches!(err, OrderError::NoStockAvailable { available: None, .. }));
    assert_eq!(fx.stock(a), 6);
    assert_eq!(orch.get(id).await.unwrap().lines[0].quantity, 4);
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_restores_every_line() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let b = fx.product("Bolt", 5, 500);
    let orch = fx.orchestrator();
    let id = orch
        .create(UserId::new(), &[line(a, 2), line(b, 1), line(a, 1)])
        .await
        .unwrap();
    assert_eq!(fx.stock(a), 7);

    orch.delete(id).await.unwrap();

    assert_eq!(fx.stock(a), 10);
    assert_eq!(fx.stock(b), 5);
    assert!(matches!(orch.get(id).await, Err(OrderError::NotFound(_))));
    assert!(matches!(orch.delete(id).await, Err(OrderError::NotFound(_))));
    assert_eq!(fx.stock(a), 10);
}

#[tokio::test]
async fn delete_repository_failure_takes_stock_back() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let repo = Arc::new(FlakyRepository::default());
    let orch = OrderOrchestrator::new(fx.locks.clone(), fx.inventory.clone(), repo.clone());
    let id = orch.create(UserId::new(), &[line(a, 3)]).await.unwrap();

    repo.fail_delete.store(true, Ordering::SeqCst);
    assert!(matches!(orch.delete(id).await, Err(OrderError::Repository(_))));

    assert_eq!(fx.stock(a), 7);
    assert!(orch.get(id).await.is_ok());
}

#[tokio::test]
async fn create_then_delete_round_trip() {
    let fx = Fixture::new();
    let a = fx.product("A", 10, 1000);
    let b = fx.product("B", 5, 500);
    let orch = fx.orchestrator();

    let id = orch.create(UserId::new(), &[line(a, 2), line(b, 1)]).await.unwrap();
    assert_eq!((fx.stock(a), fx.stock(b)), (8, 4));
    assert_eq!(orch.get(id).await.unwrap().total().unwrap(), Money::from_minor(2500));

    orch.delete(id).await.unwrap();
    assert_eq!((fx.stock(a), fx.stock(b)), (10, 5));
    assert!(fx.orders.all().is_empty());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creates_for_the_last_unit_sell_it_once() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 1, 1000);
    let orch = Arc::new(fx.orchestrator());

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let orch = orch.clone();
        tasks.spawn(async move { orch.create(UserId::new(), &[line(a, 1)]).await });
    }

    let mut created = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => created += 1,
            Err(OrderError::StockUpdateInProgress { .. } | OrderError::NoStockAvailable { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(created <= 1);
    assert_eq!(fx.stock(a), 1 - created);
    assert!(fx.none_locked(&[a]));
}

#[derive(Debug, Clone)]
enum Op {
    Create(Vec<(usize, i64)>),
    Update(usize, Vec<(usize, i64)>),
    Delete(usize),
}

fn lines_strategy(products: usize) -> impl Strategy<Value = Vec<(usize, i64)>> {
    prop::collection::vec((0..products, 1i64..5), 1..4)
}

fn op_strategy(products: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        lines_strategy(products).prop_map(Op::Create),
        (any::<usize>(), lines_strategy(products)).prop_map(|(slot, l)| Op::Update(slot, l)),
        any::<usize>().prop_map(Op::Delete),
    ]
}

const PRODUCTS: usize = 3;

fn tolerated(err: &OrderError) -> bool {
    matches!(
        err,
        OrderError::StockUpdateInProgress { .. }
            | OrderError::NoStockAvailable { .. }
            | OrderError::NotFound(_)
            | OrderError::OrderChanged(_)
    )
}

async fn run_op(
    orch: Arc<Orchestrator>,
    ids: Arc<Vec<ProductId>>,
    orders: Arc<Vec<OrderId>>,
    op: Op,
) -> Result<Option<OrderId>, OrderError> {
    let to_lines = |l: &[(usize, i64)]| -> Vec<LineRequest> {
        l.iter().map(|(p, q)| line(ids[*p], *q)).collect()
    };
    match op {
        Op::Create(l) => orch.create(UserId::new(), &to_lines(&l)).await.map(Some),
        Op::Update(slot, l) if !orders.is_empty() => orch
            .update(orders[slot % orders.len()], &to_lines(&l))
            .await
            .map(|_| None),
        Op::Delete(slot) if !orders.is_empty() => {
            orch.delete(orders[slot % orders.len()]).await.map(|_| None)
        }
        _ => Ok(None),
    }
}

async fn run_round(
    orch: &Arc<Orchestrator>,
    ids: &Arc<Vec<ProductId>>,
    orders: &Arc<Vec<OrderId>>,
    ops: Vec<Op>,
) -> Result<Vec<OrderId>, TestCaseError> {
    let mut tasks = tokio::task::JoinSet::new();
    for op in ops {
        tasks.spawn(run_op(orch.clone(), ids.clone(), orders.clone(), op));
    }
    let mut created = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(|e| TestCaseError::fail(e.to_string()))? {
            Ok(Some(id)) => created.push(id),
            Ok(None) => {}
            Err(err) => prop_assert!(tolerated(&err), "unexpected error: {}", err),
        }
    }
    Ok(created)
}

fn assert_conserved(fx: &Fixture, ids: &[ProductId], initial: &[i64]) -> Result<(), TestCaseError> {
    let mut reserved: HashMap<ProductId, i64> = HashMap::new();
    for order in fx.orders.all() {
        for l in &order.lines {
            *reserved.entry(l.product_id).or_default() += i64::from(l.quantity);
        }
    }
    for (id, start) in ids.iter().zip(initial) {
        let stock = fx.stock(*id);
        prop_assert!(stock >= 0, "stock went negative: {}", stock);
        prop_assert_eq!(stock + reserved.get(id).copied().unwrap_or(0), *start);
    }
    prop_assert!(fx.none_locked(ids));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn concurrent_mix_never_oversells_and_conserves_stock(
        initial in prop::collection::vec(0i64..15, PRODUCTS),
        first in prop::collection::vec(lines_strategy(PRODUCTS), 1..12),
        second in prop::collection::vec(op_strategy(PRODUCTS), 1..24),
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let fx = Fixture::new();
            let ids: Vec<ProductId> = initial
                .iter()
                .enumerate()
                .map(|(i, stock)| fx.product(&format!("p{i}"), *stock, 100))
                .collect();
            let ids = Arc::new(ids);
            let orch = Arc::new(fx.orchestrator());

            let creates = first.into_iter().map(Op::Create).collect();
            let created = run_round(&orch, &ids, &Arc::new(Vec::new()), creates).await?;
            assert_conserved(&fx, &ids, &initial)?;

            run_round(&orch, &ids, &Arc::new(created), second).await?;
            assert_conserved(&fx, &ids, &initial)?;
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ---------------------------------------------------------------------------
// Caller cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dropped_create_still_persists_its_reservation() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let repo = Arc::new(SlowRepository {
        inner: InMemoryOrderRepository::new(),
        delay: Duration::from_millis(200),
    });
    let orch = OrderOrchestrator::new(fx.locks.clone(), fx.inventory.clone(), repo.clone());

    let timed_out = tokio::time::timeout(
        Duration::from_millis(50),
        orch.create(UserId::new(), &[line(a, 3)]),
    )
    .await;
    assert!(timed_out.is_err());

    wait_until(|| !repo.inner.all().is_empty() && fx.none_locked(&[a])).await;
    let orders = repo.inner.all();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].lines[0].quantity, 3);
    assert_eq!(fx.stock(a), 7);
}

#[tokio::test]
async fn dropped_update_keeps_ledger_and_lines_in_step() {
    let fx = Fixture::new();
    let a = fx.product("Anvil", 10, 1000);
    let b = fx.product("Bolt", 10, 500);
    let repo = Arc::new(SlowRepository {
        inner: InMemoryOrderRepository::new(),
        delay: Duration::from_millis(100),
    });
    let orch = OrderOrchestrator::new(fx.locks.clone(), fx.inventory.clone(), repo.clone());
    let id = orch.create(UserId::new(), &[line(a, 4)]).await.unwrap();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(30),
        orch.update(id, &[line(b, 2)]),
    )
    .await;
    assert!(timed_out.is_err());

    wait_until(|| fx.none_locked(&[a, b])).await;
    let order = orch.get(id).await.unwrap();
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].product_id, b);
    assert_eq!(fx.stock(a), 10);
    assert_eq!(fx.stock(b), 8);
}

// ---------------------------------------------------------------------------
// Search projection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn committed_orders_reach_the_index() {
    let fx = Fixture::new();
    let a = fx.product("Kettle", 10, 1000);
    let b = fx.product("Mug", 10, 300);
    let index = Arc::new(InMemorySearchIndex::new());
    let (projector, handle) =
        SearchProjector::spawn(index.clone(), fx.orders.clone(), fx.inventory.clone(), 64);
    let orch = fx.orchestrator().with_projector(projector);

    let kept = orch.create(UserId::new(), &[line(a, 1)]).await.unwrap();
    let dropped = orch.create(UserId::new(), &[line(b, 1)]).await.unwrap();
    orch.update(kept, &[line(a, 2), line(b, 1)]).await.unwrap();
    orch.delete(dropped).await.unwrap();

    let page = orch.list(&SearchQuery::text("kettle")).await;
    handle.shutdown().await;
    page.unwrap();

    let doc = index.document(kept).expect("indexed");
    assert_eq!(doc.items.len(), 2);
    assert_eq!(doc.items[0].product.name, "Kettle");
    assert_eq!(doc.items[0].quantity, 2);
    assert!(index.document(dropped).is_none());
    assert_eq!(index.settings(), Some(IndexSettings::for_orders()));
}

#[tokio::test]
async fn list_filters_by_text_and_creation_window() {
    let fx = Fixture::new();
    let a = fx.product("Kettle", 10, 1000);
    let b = fx.product("Mug", 10, 300);
    let index = Arc::new(InMemorySearchIndex::new());
    let (projector, handle) =
        SearchProjector::spawn(index.clone(), fx.orders.clone(), fx.inventory.clone(), 64);
    let orch = fx.orchestrator().with_projector(projector.clone());

    let k = orch.create(UserId::new(), &[line(a, 1)]).await.unwrap();
    orch.create(UserId::new(), &[line(b, 1)]).await.unwrap();
    handle.shutdown().await;

    let created_at = orch.get(k).await.unwrap().created_at;
    let hits = orch.list(&SearchQuery::text("kettle")).await.unwrap();
    assert_eq!(hits.hits.len(), 1);
    assert_eq!(hits.hits[0].id, k);

    let window = SearchQuery::default().between(Some(created_at), Some(created_at));
    let hits = orch.list(&window).await.unwrap();
    assert!(hits.hits.iter().any(|d| d.id == k));

    let later = created_at + chrono::Duration::days(1);
    let none = orch
        .list(&SearchQuery::default().between(Some(later), None))
        .await
        .unwrap();
    assert!(none.hits.is_empty());
}

#[tokio::test]
async fn empty_index_is_backfilled_in_batches() {
    let fx = Fixture::new();
    let a = fx.product("Kettle", 0, 1000);
    let total = 2 * BACKFILL_BATCH_SIZE as usize + 500;
    for _ in 0..total {
        let order = Order::place(UserId::new(), vec![OrderLine::new(a, 1, Money::from_minor(1000))]).unwrap();
        fx.orders.create(&order).await.unwrap();
    }

    let index = Arc::new(RecordingIndex::default());
    let (_projector, handle) =
        SearchProjector::spawn(index.clone(), fx.orders.clone(), fx.inventory.clone(), 8);
    handle.shutdown().await;

    assert_eq!(*index.batches.lock().unwrap(), vec![1000, 1000, 500]);
    assert_eq!(index.inner.len(), total);
}

#[tokio::test]
async fn populated_index_is_not_backfilled() {
    let fx = Fixture::new();
    let a = fx.product("Kettle", 0, 1000);
    let order = Order::place(UserId::new(), vec![OrderLine::new(a, 1, Money::from_minor(1000))]).unwrap();
    fx.orders.create(&order).await.unwrap();

    let index = Arc::new(RecordingIndex::default());
    index
        .inner
        .upsert(&[OrderDocument::from_order(&order, &HashMap::new())])
        .await
        .unwrap();
    let (_projector, handle) =
        SearchProjector::spawn(index.clone(), fx.orders.clone(), fx.inventory.clone(), 8);
    handle.shutdown().await;

    assert!(index.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn index_outage_never_fails_order_protocols() {
    let fx = Fixture::new();
    let a = fx.product("Kettle", 10, 1000);
    let (projector, handle) =
        SearchProjector::spawn(UnreachableIndex, fx.orders.clone(), fx.inventory.clone(), 8);
    let orch = fx.orchestrator().with_projector(projector);

    let id = orch.create(UserId::new(), &[line(a, 2)]).await.unwrap();
    orch.update(id, &[line(a, 3)]).await.unwrap();
    orch.delete(id).await.unwrap();
    assert_eq!(fx.stock(a), 10);

    assert!(matches!(
        orch.list(&SearchQuery::default()).await,
        Err(OrderError::Search(_))
    ));
    handle.shutdown().await;
}

#[tokio::test]
async fn full_queue_drops_updates_without_blocking() {
    let fx = Fixture::new();
    let a = fx.product("Kettle", 100, 1000);
    let index = Arc::new(InMemorySearchIndex::new());
    let (projector, handle) =
        SearchProjector::spawn(index.clone(), fx.orders.clone(), fx.inventory.clone(), 1);
    let orch = fx.orchestrator().with_projector(projector);

    for _ in 0..20 {
        orch.create(UserId::new(), &[line(a, 1)]).await.unwrap();
    }
    handle.shutdown().await;

    assert_eq!(fx.stock(a), 80);
    assert!(index.len() <= 20);
}

#[tokio::test]
async fn stopped_projector_drops_updates() {
    let fx = Fixture::new();
    let a = fx.product("Kettle", 10, 1000);
    let index = Arc::new(InMemorySearchIndex::new());
    let (projector, handle) =
        SearchProjector::spawn(index.clone(), fx.orders.clone(), fx.inventory.clone(), 8);
    handle.shutdown().await;

    let orch = fx.orchestrator().with_projector(projector);
    let id = orch.create(UserId::new(), &[line(a, 1)]).await.unwrap();
    assert!(index.document(id).is_none());
}

#[tokio::test]
async fn delete_racing_an_update_release_stays_out_of_the_index() {
    let fx = Fixture::new();
    let a = fx.product("Kettle", 10, 1000);
    let index = Arc::new(InMemorySearchIndex::new());
    let (projector, handle) =
        SearchProjector::spawn(index.clone(), fx.orders.clone(), fx.inventory.clone(), 64);
    let locks = Arc::new(PausingLocks::new(fx.locks.clone()));
    let orch = OrderOrchestrator::new(locks.clone(), fx.inventory.clone(), fx.orders.clone())
        .with_projector(projector);
    let id = orch.create(UserId::new(), &[line(a, 2)]).await.unwrap();

    // The update is parked after giving up its lease; the delete slips in.
    locks.armed.store(true, Ordering::SeqCst);
    let updating = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.update(id, &[line(a, 3)]).await })
    };
    locks.released.notified().await;
    orch.delete(id).await.unwrap();
    locks.resume.notify_one();
    updating.await.unwrap().unwrap();
    handle.shutdown().await;

    assert!(fx.orders.all().is_empty());
    assert!(index.document(id).is_none());
    assert_eq!(fx.stock(a), 10);
}
