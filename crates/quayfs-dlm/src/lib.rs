#![warn(missing_docs)]

//! QuayFS lock management: per-inode reader/writer locks.
//!
//! The [`llm`] module is the local lock manager, a per-key state machine
//! with a fair wait queue. The [`rwlock`] module wraps it behind uniform
//! lock handles keyed by `(volume, inode)`; that façade is the seam at
//! which a network-distributed lock protocol can intercede later without
//! changing callers.

pub mod llm;
pub mod rwlock;

pub use llm::{Blocking, CallerId, HeldType, LockId, LockManager, LockMode};
pub use rwlock::{LockGuard, LockHandle};
