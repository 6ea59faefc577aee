use super::{LockService, prefixed_key};
use crate::Result;
use crate::types::LockHandle;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Process-local lock store with TTL expiry.
///
/// Acquire checks and inserts under one mutex, which gives the same
/// create-if-absent atomicity a shared store would. Only workers inside the
/// same process are excluded from each other; use the redis backend when
/// jobs run in several processes.
#[derive(Debug, Default)]
pub struct InMemoryLockService {
    prefix: String,
    /// key -> expiry instant
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `handle` is currently held and not past its TTL.
    pub fn is_held(&self, handle: &LockHandle) -> bool {
        let key = prefixed_key(&self.prefix, handle);
        self.entries
            .lock()
            .get(&key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    /// Number of live (unexpired) keys.
    pub fn held_count(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|expires_at| **expires_at > now).count()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, handle: &LockHandle, ttl: Duration) -> Result<bool> {
        let key = prefixed_key(&self.prefix, handle);
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(expires_at) = entries.get(&key)
            && *expires_at > now
        {
            return Ok(false);
        }

        entries.insert(key, now + ttl);
        Ok(true)
    }

    async fn release(&self, handle: &LockHandle) -> Result<()> {
        let key = prefixed_key(&self.prefix, handle);
        self.entries.lock().remove(&key);
        Ok(())
    }

    fn backend(&self) -> &str {
        "memory"
    }
}
