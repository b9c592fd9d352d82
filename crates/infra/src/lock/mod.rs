//! Per-product lease locks.
//!
//! Every stock-changing protocol holds a short-lived lease on each product it
//! touches. Leases are fail-fast: a busy product is reported immediately and the
//! caller retries, there is no waiting. A lease that is never released expires
//! after its TTL, so a crashed holder cannot block a product forever.
//!
//! Acquisition always happens in ascending product-id order (see [`acquire_all`]),
//! which keeps two overlapping protocols from each holding half of the other's set.

pub mod in_memory;
pub mod redis_lease;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use stockorder_core::ProductId;

pub use in_memory::InMemoryLockCoordinator;
pub use redis_lease::RedisLockCoordinator;

/// Lease lifetime used when none is configured.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_millis(5000);

/// Store key for a product's lease.
pub fn lock_key(product_id: ProductId) -> String {
    format!("stock_lock_product_{product_id}")
}

/// Proof of holding one product's lease. The token makes release safe: only
/// the holder that set the key can delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub product_id: ProductId,
    pub key: String,
    pub token: String,
}

impl Lease {
    pub fn new(product_id: ProductId, token: impl Into<String>) -> Self {
        Self {
            product_id,
            key: lock_key(product_id),
            token: token.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock store error: {0}")]
    Store(String),
}

/// Lease store port.
#[async_trait::async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Try to take the product's lease. `Ok(None)` means someone else holds it.
    async fn try_acquire(&self, product_id: ProductId) -> Result<Option<Lease>, LockError>;

    /// Give the lease back. A lease that already expired (or was taken over
    /// after expiry) is left alone.
    async fn release(&self, lease: &Lease) -> Result<(), LockError>;
}

#[async_trait::async_trait]
impl<S> LockCoordinator for Arc<S>
where
    S: LockCoordinator + ?Sized,
{
    async fn try_acquire(&self, product_id: ProductId) -> Result<Option<Lease>, LockError> {
        (**self).try_acquire(product_id).await
    }

    async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        (**self).release(lease).await
    }
}

/// Why [`acquire_all`] gave up. Leases taken before the failure are already released.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("product {0} is locked by another stock update")]
    Busy(ProductId),

    #[error("failed to lock product {product_id}: {source}")]
    Store {
        product_id: ProductId,
        #[source]
        source: LockError,
    },
}

/// Leases held by one protocol run.
#[derive(Debug, Default)]
#[must_use = "leases must be released"]
pub struct LeaseSet {
    leases: Vec<Lease>,
}

impl LeaseSet {
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn product_ids(&self) -> Vec<ProductId> {
        self.leases.iter().map(|l| l.product_id).collect()
    }

    /// Release every lease, best-effort. Failures are logged; the TTL cleans up.
    pub async fn release<L>(mut self, locks: &L)
    where
        L: LockCoordinator + ?Sized,
    {
        for lease in std::mem::take(&mut self.leases).into_iter().rev() {
            if let Err(err) = locks.release(&lease).await {
                warn!(
                    product_id = %lease.product_id,
                    error = %err,
                    "failed to release product lease; it will expire"
                );
            }
        }
    }
}

impl Drop for LeaseSet {
    fn drop(&mut self) {
        if !self.leases.is_empty() {
            warn!(
                leases = self.leases.len(),
                "lease set dropped without release; leases will expire"
            );
        }
    }
}

/// Take every lease in `product_ids`, in ascending id order, or none of them.
///
/// Ids are sorted and de-duplicated first. On the first busy product (or store
/// failure) the leases already taken are released and the failure returned.
pub async fn acquire_all<L>(locks: &L, product_ids: &[ProductId]) -> Result<LeaseSet, AcquireError>
where
    L: LockCoordinator + ?Sized,
{
    let mut ids = product_ids.to_vec();
    ids.sort();
    ids.dedup();

    let mut held = LeaseSet::default();
    for product_id in ids {
        let outcome = match locks.try_acquire(product_id).await {
            Ok(Some(lease)) => {
                held.leases.push(lease);
                continue;
            }
            Ok(None) => AcquireError::Busy(product_id),
            Err(source) => AcquireError::Store { product_id, source },
        };
        held.release(locks).await;
        return Err(outcome);
    }
    Ok(held)
}
