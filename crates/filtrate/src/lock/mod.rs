//! Lock service client.
//!
//! A thin wrapper over a shared key-value store providing atomic
//! "create if absent, with TTL" and "delete" operations. The client has no
//! concurrency control of its own; mutual exclusion is exactly as strong as
//! the backing store's atomicity.
//!
//! # TTL semantics
//!
//! A key that outlives its TTL is treated as abandoned and may be acquired by
//! a new holder. This recovers locks left behind by crashed workers, and it
//! also means a job that overruns the TTL can end up running concurrently with
//! a newer one. `release` is unconditional, so the overrunning job may delete
//! the newer holder's key. Both are accepted trade-offs; the TTL is
//! configurable through `lock.ttl_secs`.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::InMemoryLockService;
#[cfg(feature = "redis")]
pub use redis_store::RedisLockService;

use crate::core::config::{BackendKind, LockConfig};
use crate::types::LockHandle;
use crate::{FiltrateError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Atomic acquire/release over a shared key space.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Create the key for `handle` if and only if it does not exist.
    ///
    /// Returns `Ok(true)` when this call created the key. The existence test
    /// and the write happen as one operation against the store.
    ///
    /// # Errors
    ///
    /// Returns `FiltrateError::Lock` when the store can't confirm the write.
    /// Callers must treat an error as "not acquired".
    async fn acquire(&self, handle: &LockHandle, ttl: Duration) -> Result<bool>;

    /// Delete the key for `handle`, whoever holds it.
    async fn release(&self, handle: &LockHandle) -> Result<()>;

    /// Backend name for logging.
    fn backend(&self) -> &str;
}

/// Build the lock service described by `config`.
pub async fn lock_service_from_config(config: &LockConfig) -> Result<Arc<dyn LockService>> {
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(InMemoryLockService::with_prefix(config.key_prefix.clone()))),
        #[cfg(feature = "redis")]
        BackendKind::Redis => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| FiltrateError::configuration("lock.url is required for the redis backend"))?;
            let service = RedisLockService::connect(url, config.key_prefix.clone()).await?;
            Ok(Arc::new(service))
        }
        #[cfg(not(feature = "redis"))]
        BackendKind::Redis => Err(FiltrateError::MissingDependency(
            "redis lock backend requires the 'redis' feature".to_string(),
        )),
    }
}

pub(crate) fn prefixed_key(prefix: &str, handle: &LockHandle) -> String {
    if prefix.is_empty() {
        handle.as_str().to_string()
    } else {
        format!("{}-{}", prefix, handle)
    }
}
