//! Mutex-shaped façade over the lock core.
//!
//! For callers that want a plain lock/unlock pair and are happy to treat
//! any remote failure as unrecoverable. Operations run with a token that
//! never fires and panic on error; use [`Mutex`] directly for anything
//! that needs to handle failures or observe cancellation.

use tokio_util::sync::CancellationToken;

use crate::mutex::Mutex;

/// A blocking lock/unlock pair that panics on remote failure.
#[derive(Debug)]
pub struct Locker {
    inner: Mutex,
    cancel: CancellationToken,
}

impl Locker {
    pub(crate) fn new(inner: Mutex) -> Self {
        Self {
            inner,
            cancel: CancellationToken::new(),
        }
    }

    /// Acquires the lock, waiting as long as it takes.
    ///
    /// # Panics
    ///
    /// Panics on any remote failure, and if the lock is already held by
    /// this handle.
    pub async fn lock(&mut self) {
        if let Err(err) = self.inner.lock(&self.cancel).await {
            panic!("pawl: lock failed: {err}");
        }
    }

    /// Releases the lock.
    ///
    /// # Panics
    ///
    /// Panics on any remote failure (including a stale lock), and if the
    /// lock is not held by this handle.
    pub async fn unlock(&mut self) {
        if let Err(err) = self.inner.unlock(&self.cancel).await {
            panic!("pawl: unlock failed: {err}");
        }
    }

    /// Recovers the underlying handle.
    #[must_use]
    pub fn into_inner(self) -> Mutex {
        self.inner
    }
}

impl Mutex {
    /// Wraps this handle in a [`Locker`].
    #[must_use]
    pub fn into_locker(self) -> Locker {
        Locker::new(self)
    }
}
