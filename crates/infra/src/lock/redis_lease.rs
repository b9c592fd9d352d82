//! Redis-backed lease store.
//!
//! Acquire is `SET key token NX PX ttl`. Release is a compare-and-delete Lua
//! script so a holder whose lease expired cannot delete its successor's key.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, instrument};
use uuid::Uuid;

use stockorder_core::ProductId;

use super::{lock_key, Lease, LockCoordinator, LockError};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLockCoordinator {
    conn: ConnectionManager,
    ttl: Duration,
    release_script: Script,
}

impl std::fmt::Debug for RedisLockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockCoordinator")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RedisLockCoordinator {
    /// Open a managed (auto-reconnecting) connection to `redis_url`.
    pub async fn connect(redis_url: impl AsRef<str>, ttl: Duration) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| LockError::Store(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::Store(format!("redis connection error: {e}")))?;
        Ok(Self::new(conn, ttl))
    }

    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self {
            conn,
            ttl,
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    fn ttl_millis(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX).max(1)
    }
}

#[async_trait::async_trait]
impl LockCoordinator for RedisLockCoordinator {
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn try_acquire(&self, product_id: ProductId) -> Result<Option<Lease>, LockError> {
        let key = lock_key(product_id);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_millis())
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Store(format!("SET NX failed for {key}: {e}")))?;

        Ok(reply.map(|_| Lease::new(product_id, token)))
    }

    #[instrument(skip(self, lease), fields(product_id = %lease.product_id), err)]
    async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release_script
            .key(&lease.key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Store(format!("release failed for {}: {e}", lease.key)))?;

        if removed == 0 {
            debug!(key = %lease.key, "lease already expired or taken over");
        }
        Ok(())
    }
}
