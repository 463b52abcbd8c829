//! Advisory byte-range locks.
//!
//! Each volume carries one table mapping inode to an ordered list of
//! held ranges. The list is sorted by start offset; a length of zero
//! means "to end of file", encoded as an endpoint of `u64::MAX`.
//! Conflict detection is deliberately simple: any overlap where either
//! side is a write lock is reported, with the conflicting range riding
//! on the error as a typed source.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use quayfs_errors::{FsError, Result};

use crate::types::InodeNumber;

/// Kind of a byte-range lock request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlockType {
    /// Shared (read) range lock.
    Read,
    /// Exclusive (write) range lock.
    Write,
    /// Release of a previously taken range.
    Unlock,
}

/// The fcntl-style command applied to a range.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlockCommand {
    /// Non-blocking set (`F_SETLK`).
    SetLk,
    /// Blocking set (`F_SETLKW`); not supported by this layer.
    SetLkWait,
}

/// One advisory byte-range lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlockRequest {
    /// Process id of the holder.
    pub pid: u64,
    /// Start offset of the range.
    pub start: u64,
    /// Length of the range; zero means "to end of file".
    pub length: u64,
    /// Kind of lock requested or held.
    pub flock_type: FlockType,
}

impl FlockRequest {
    /// The exclusive end offset of this range; a zero length covers
    /// through `u64::MAX`.
    pub fn end(&self) -> u64 {
        if self.length == 0 {
            u64::MAX
        } else {
            self.start.saturating_add(self.length)
        }
    }
}

/// Error payload describing the lock a set request collided with.
#[derive(Clone, Debug, thiserror::Error)]
#[error("conflicting byte-range lock: pid {} start {} length {}", .0.pid, .0.start, .0.length)]
pub struct FlockConflict(pub FlockRequest);

/// Per-volume byte-range lock table.
pub struct FlockTable {
    inner: Mutex<HashMap<InodeNumber, Vec<FlockRequest>>>,
}

impl FlockTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Applies a set request. Returns the held lock: the request itself
    /// on a fresh grant, or the identical existing lock idempotently.
    /// An overlap where either side is a write lock fails `TryAgain`
    /// with the conflicting lock attached as the error source.
    pub fn set(&self, ino: InodeNumber, request: &FlockRequest) -> Result<FlockRequest> {
        let mut table = self.inner.lock();
        let list = table.entry(ino).or_default();

        let request_end = request.end();
        let mut insert_at = None;

        for (index, held) in list.iter().enumerate() {
            if held.end() < request.start {
                continue;
            }
            if insert_at.is_none() && held.start >= request.start {
                insert_at = Some(index);
            }
            if held.start > request_end {
                break;
            }
            if held == request {
                return Ok(held.clone());
            }
            if held.flock_type == FlockType::Write || request.flock_type == FlockType::Write {
                let conflict = held.clone();
                return Err(FsError::try_again(format!(
                    "byte range {}..{} of inode {} is locked by pid {}",
                    conflict.start,
                    conflict.end(),
                    ino,
                    conflict.pid
                ))
                .with_source(FlockConflict(conflict)));
            }
        }

        match insert_at {
            Some(index) => list.insert(index, request.clone()),
            None => list.push(request.clone()),
        }
        Ok(request.clone())
    }

    /// Removes the exact `(pid, start, length)` match; `NoData` if no
    /// such lock is held.
    pub fn unlock(&self, ino: InodeNumber, request: &FlockRequest) -> Result<()> {
        let mut table = self.inner.lock();
        let list = match table.get_mut(&ino) {
            Some(list) => list,
            None => {
                return Err(FsError::no_data(format!(
                    "no byte-range locks held on inode {}",
                    ino
                )))
            }
        };

        let position = list.iter().position(|held| {
            held.pid == request.pid
                && held.start == request.start
                && held.length == request.length
        });
        match position {
            Some(index) => {
                list.remove(index);
                Ok(())
            }
            None => Err(FsError::no_data(format!(
                "no matching byte-range lock on inode {}",
                ino
            ))),
        }
    }

    /// Test-support: the number of locks held on an inode.
    pub fn held_count(&self, ino: InodeNumber) -> usize {
        self.inner.lock().get(&ino).map_or(0, |list| list.len())
    }

    /// Test-support: a snapshot of the locks held on an inode, in list
    /// order.
    pub fn held(&self, ino: InodeNumber) -> Vec<FlockRequest> {
        self.inner.lock().get(&ino).cloned().unwrap_or_default()
    }
}

impl Default for FlockTable {
    fn default() -> Self {
        Self::new()
    }
}
