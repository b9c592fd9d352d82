use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

use stockorder_core::ProductId;

use super::{lock_key, Lease, LockCoordinator, LockError, DEFAULT_LEASE_TTL};

#[derive(Debug)]
struct Held {
    token: String,
    expires_at: Instant,
}

/// Process-local lease store with the same TTL semantics as the Redis one.
///
/// Intended for tests/dev and single-instance deployments.
#[derive(Debug)]
pub struct InMemoryLockCoordinator {
    ttl: Duration,
    held: Mutex<HashMap<String, Held>>,
}

impl Default for InMemoryLockCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_TTL)
    }
}

impl InMemoryLockCoordinator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a live lease exists for the product.
    pub fn is_locked(&self, product_id: ProductId) -> bool {
        self.held
            .lock()
            .map(|held| {
                held.get(&lock_key(product_id))
                    .is_some_and(|h| h.expires_at > Instant::now())
            })
            .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl LockCoordinator for InMemoryLockCoordinator {
    async fn try_acquire(&self, product_id: ProductId) -> Result<Option<Lease>, LockError> {
        let key = lock_key(product_id);
        let now = Instant::now();
        let mut held = self
            .held
            .lock()
            .map_err(|_| LockError::Store("lock poisoned".to_string()))?;

        // Abandoned leases would otherwise stay until their product is locked again.
        held.retain(|_, h| h.expires_at > now);

        if held.contains_key(&key) {
            return Ok(None);
        }

        let lease = Lease::new(product_id, Uuid::new_v4().to_string());
        held.insert(
            key,
            Held {
                token: lease.token.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| LockError::Store("lock poisoned".to_string()))?;

        if held.get(&lease.key).is_some_and(|h| h.token == lease.token) {
            held.remove(&lease.key);
        }
        Ok(())
    }
}
