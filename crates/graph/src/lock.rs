//! Reentrant locks tracked by the wait-for graph.

use std::marker::PhantomData;

use interlock_core::CancelToken;
use tracing::warn;

use crate::error::Result;
use crate::manager::LockManager;
use crate::resource::ResourceId;

/// A reentrant mutual-exclusion lock owned by threads, with an identity that
/// is stable for the life of the manager that issued it.
///
/// The lock itself is only a handle: ownership, reentrancy counts and waiters
/// all live in the manager's graph. Clones refer to the same lock.
#[derive(Clone)]
pub struct OrderedLock {
    id: ResourceId,
    manager: LockManager,
}

impl OrderedLock {
    pub(crate) fn new(id: ResourceId, manager: LockManager) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Block until the calling thread owns the lock, or add one level of
    /// reentrancy if it already does.
    ///
    /// If a deadlock is detected while waiting, some thread in the cycle gives
    /// up its locks and takes them back later. This call still returns only
    /// once the lock is held, and with every lock the caller held before.
    pub fn acquire(&self) -> Result<()> {
        self.manager.acquire_lock(self.id, None)
    }

    /// Like [`acquire`](Self::acquire) but gives up once `cancel` fires while
    /// waiting. A lock that is free is still granted.
    pub fn acquire_cancellable(&self, cancel: &CancelToken) -> Result<()> {
        self.manager.acquire_lock(self.id, Some(cancel))
    }

    /// Drop one level of ownership; the last release hands the lock to the
    /// longest-waiting thread.
    pub fn release(&self) -> Result<()> {
        self.manager.release_lock(self.id)
    }

    /// Reentrancy depth held by the calling thread, 0 if it is not the owner.
    pub fn depth(&self) -> usize {
        self.manager.lock_depth(self.id)
    }

    /// Acquire and release on drop.
    pub fn lock(&self) -> Result<OrderedLockGuard<'_>> {
        self.acquire()?;
        Ok(OrderedLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }
}

impl std::fmt::Debug for OrderedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OrderedLock").field(&self.id).finish()
    }
}

#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct OrderedLockGuard<'a> {
    lock: &'a OrderedLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for OrderedLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            warn!(error = %err, lock = %self.lock.id, "failed to release lock on guard drop");
        }
    }
}
