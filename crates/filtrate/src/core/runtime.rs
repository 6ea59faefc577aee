//! Process-wide one-time initialization.
//!
//! Some filter backends need expensive setup exactly once per process (locating
//! an external toolchain, starting an embedded runtime). [`InitHandle`] owns that
//! state behind a single mutex so concurrent jobs racing to initialize observe
//! exactly one successful initialization.

use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Lazily initialized, shared backend state.
///
/// Unlike `OnceCell::get_or_try_init`, a failed initialization is not cached;
/// the next caller retries.
///
/// # Example
///
/// ```rust
/// use filtrate::core::runtime::InitHandle;
///
/// static TOOLCHAIN: InitHandle<String> = InitHandle::new();
///
/// let first = TOOLCHAIN.ensure_initialized(|| Ok("/usr/bin/convert".to_string())).unwrap();
/// let second = TOOLCHAIN.ensure_initialized(|| Ok("ignored".to_string())).unwrap();
/// assert_eq!(*first, *second);
/// ```
pub struct InitHandle<T> {
    state: Mutex<Option<Arc<T>>>,
}

impl<T> InitHandle<T> {
    pub const fn new() -> Self {
        Self {
            state: parking_lot::const_mutex(None),
        }
    }

    /// Return the initialized state, running `init` if nobody has succeeded yet.
    ///
    /// `init` runs while the mutex is held, so it is never executed concurrently.
    pub fn ensure_initialized<F>(&self, init: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut state = self.state.lock();
        if let Some(existing) = state.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let value = Arc::new(init()?);
        *state = Some(Arc::clone(&value));
        Ok(value)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Drop the cached state so the next call re-initializes.
    pub fn reset(&self) {
        self.state.lock().take();
    }
}

impl<T> Default for InitHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for InitHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitHandle")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
