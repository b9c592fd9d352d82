use std::sync::Arc;

use stockorder_infra::{
    InMemoryInventory, InMemoryLockCoordinator, InMemoryOrderRepository, InMemorySearchIndex,
    InventoryLedger, LockCoordinator, OrderOrchestrator, OrderRepository, ProjectorHandle,
    SearchProjector,
};

/// Orchestrator over type-erased ports, so in-memory and persistent wiring
/// share one router.
pub type OrderService = OrderOrchestrator<
    Arc<dyn LockCoordinator>,
    Arc<dyn InventoryLedger>,
    Arc<dyn OrderRepository>,
>;

#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(orders: OrderService) -> Self {
        Self {
            orders: Arc::new(orders),
        }
    }

    /// Everything in process: leases, stock, orders and the search index.
    /// Must be called from within a tokio runtime (spawns the projector).
    pub fn in_memory(
        locks: Arc<InMemoryLockCoordinator>,
        inventory: Arc<InMemoryInventory>,
        queue_capacity: usize,
    ) -> (Self, ProjectorHandle) {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let (projector, handle) = SearchProjector::spawn(
            InMemorySearchIndex::new(),
            orders.clone(),
            inventory.clone(),
            queue_capacity,
        );

        let orchestrator = OrderOrchestrator::new(
            locks as Arc<dyn LockCoordinator>,
            inventory as Arc<dyn InventoryLedger>,
            orders as Arc<dyn OrderRepository>,
        )
        .with_projector(projector);

        (Self::new(orchestrator), handle)
    }
}
