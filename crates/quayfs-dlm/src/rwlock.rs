//! Uniform reader/writer lock handles over the local lock manager.
//!
//! A [`LockHandle`] names one lock, `(volume, inode)`, on behalf of one
//! caller. Acquisition returns a [`LockGuard`] that releases on drop, so
//! every exit path of an operation, normal or error, gives the lock
//! back. This façade is where a distributed lock protocol would
//! intercede; callers never talk to the local manager directly.

use std::sync::Arc;

use quayfs_errors::Result;

use crate::llm::{Blocking, CallerId, HeldType, LockId, LockManager, LockMode};

/// A handle naming one lock on behalf of one caller.
pub struct LockHandle {
    mgr: Arc<LockManager>,
    id: LockId,
    caller: CallerId,
}

impl LockHandle {
    /// Creates a handle for `id` owned by `caller`.
    pub fn new(mgr: Arc<LockManager>, id: LockId, caller: CallerId) -> Self {
        Self { mgr, id, caller }
    }

    /// The caller this handle locks on behalf of.
    pub fn caller(&self) -> CallerId {
        self.caller
    }

    /// The lock id this handle names.
    pub fn id(&self) -> &LockId {
        &self.id
    }

    /// Acquires the lock shared, blocking until granted.
    pub fn read_lock(&self) -> LockGuard {
        self.mgr
            .acquire(&self.id, self.caller, LockMode::Read, Blocking::Block)
            .expect("blocking read acquire cannot fail");
        self.guard()
    }

    /// Acquires the lock exclusive, blocking until granted.
    pub fn write_lock(&self) -> LockGuard {
        self.mgr
            .acquire(&self.id, self.caller, LockMode::Write, Blocking::Block)
            .expect("blocking write acquire cannot fail");
        self.guard()
    }

    /// Attempts to acquire the lock exclusive without blocking;
    /// `TryAgain` if the lock is not stale.
    pub fn try_write_lock(&self) -> Result<LockGuard> {
        self.mgr
            .acquire(&self.id, self.caller, LockMode::Write, Blocking::Try)?;
        Ok(self.guard())
    }

    /// Acquires shared unless this caller already holds the lock in any
    /// mode, in which case `None` is returned and the existing hold
    /// stands.
    pub fn ensure_read_lock(&self) -> Option<LockGuard> {
        if self.is_any_held() {
            return None;
        }
        Some(self.read_lock())
    }

    /// Acquires exclusive unless this caller already holds the lock
    /// exclusive, in which case `None` is returned and the existing
    /// hold stands.
    pub fn ensure_write_lock(&self) -> Option<LockGuard> {
        if self.is_write_held() {
            return None;
        }
        Some(self.write_lock())
    }

    /// True if this caller holds the lock shared.
    pub fn is_read_held(&self) -> bool {
        self.mgr.is_held(&self.id, self.caller, HeldType::Read)
    }

    /// True if this caller holds the lock exclusive.
    pub fn is_write_held(&self) -> bool {
        self.mgr.is_held(&self.id, self.caller, HeldType::Write)
    }

    /// True if this caller holds the lock in any mode.
    pub fn is_any_held(&self) -> bool {
        self.mgr.is_held(&self.id, self.caller, HeldType::Any)
    }

    fn guard(&self) -> LockGuard {
        LockGuard {
            mgr: self.mgr.clone(),
            id: self.id.clone(),
            caller: self.caller,
        }
    }
}

/// A held lock; releases on drop.
pub struct LockGuard {
    mgr: Arc<LockManager>,
    id: LockId,
    caller: CallerId,
}

impl LockGuard {
    /// The caller holding the lock.
    pub fn caller(&self) -> CallerId {
        self.caller
    }

    /// The lock id held.
    pub fn id(&self) -> &LockId {
        &self.id
    }

    /// Releases the lock now. Equivalent to dropping the guard.
    pub fn unlock(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.mgr.release(&self.id, self.caller);
    }
}
