//! Cross-client request serialization
//!
//! A TLS handshake needs a lot of memory for a short time. All clients sharing
//! one [`GlobalRequestMutex`] run their requests one after another: a client
//! holds a [`RequestPermit`] from connect until the response completed, the
//! connection closed or an error occurred.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Default)]
struct Inner {
    locked: Mutex<bool>,
    released: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Binary mutex shared between clients
///
/// Cloning yields another handle to the same mutex.
#[derive(Clone, Default)]
pub struct GlobalRequestMutex {
    inner: Arc<Inner>,
}

impl GlobalRequestMutex {
    /// Create a new, independent mutex
    pub fn new() -> Self {
        GlobalRequestMutex::default()
    }

    /// The process-wide mutex clients use unless another one is injected
    pub fn global() -> GlobalRequestMutex {
        static GLOBAL: OnceLock<GlobalRequestMutex> = OnceLock::new();
        GLOBAL.get_or_init(GlobalRequestMutex::new).clone()
    }

    /// Take the mutex, waiting at most `timeout`
    ///
    /// The mutex is released when the returned permit is dropped.
    pub fn try_acquire(&self, timeout: Duration) -> Option<RequestPermit> {
        let guard = self.inner.lock();
        let (mut locked, _) = self
            .inner
            .released
            .wait_timeout_while(guard, timeout, |locked| *locked)
            .unwrap_or_else(PoisonError::into_inner);

        if *locked {
            trace!("Global request mutex busy.");
            return None;
        }

        *locked = true;
        trace!("Global request mutex taken.");

        Some(RequestPermit {
            mutex: self.clone(),
        })
    }

    /// Is the mutex currently held?
    pub fn is_locked(&self) -> bool {
        *self.inner.lock()
    }

    /// Do both handles refer to the same mutex?
    pub fn same_as(&self, other: &GlobalRequestMutex) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for GlobalRequestMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalRequestMutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Ownership of a [`GlobalRequestMutex`]
#[derive(Debug)]
pub struct RequestPermit {
    mutex: GlobalRequestMutex,
}

impl Drop for RequestPermit {
    fn drop(&mut self) {
        *self.mutex.inner.lock() = false;
        self.mutex.inner.released.notify_one();
        trace!("Global request mutex given.");
    }
}
