use super::{LockService, prefixed_key};
use crate::types::LockHandle;
use crate::{FiltrateError, Result};
use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Lock service backed by Redis.
///
/// Acquire is a single `SET key 1 NX PX ttl`, so the existence test and the
/// write are one atomic command on the server. Release is `DEL`.
#[derive(Clone)]
pub struct RedisLockService {
    conn: ConnectionManager,
    prefix: String,
}

impl fmt::Debug for RedisLockService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLockService")
            .field("connection", &"ConnectionManager")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisLockService {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self> {
        tracing::info!("Connecting to Redis lock store at {}", redis_url);

        let client = ::redis::Client::open(redis_url)
            .map_err(|e| FiltrateError::lock_with_source("Failed to create Redis client", e))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| FiltrateError::lock_with_source("Failed to connect to Redis", e))?;

        Ok(Self::from_connection(conn, prefix))
    }

    pub fn from_connection(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn acquire(&self, handle: &LockHandle, ttl: Duration) -> Result<bool> {
        let key = prefixed_key(&self.prefix, handle);
        let ttl_ms = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
        let mut conn = self.conn.clone();

        tracing::trace!("Lock SET NX: {} (TTL: {:?})", key, ttl);

        // Nil reply means the key already existed.
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| FiltrateError::lock_with_source(format!("Redis SET NX failed for {}", key), e))?;

        Ok(reply.is_some())
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        let key = prefixed_key(&self.prefix, handle);
        let mut conn = self.conn.clone();

        tracing::trace!("Lock DEL: {}", key);

        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| FiltrateError::lock_with_source(format!("Redis DEL failed for {}", key), e))?;

        Ok(())
    }

    fn backend(&self) -> &str {
        "redis"
    }
}
