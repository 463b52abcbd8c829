//! Local lock manager.
//!
//! Tracks one reader/writer lock per [`LockId`]. Each live lock has a
//! track in a global map; the track carries the state machine (`Stale`,
//! `Shared`, `Exclusive`), the list of owners, and a FIFO wait queue.
//! Acquisition uses lock-coupling: the track mutex is taken while the
//! map mutex is still held, so a track can never vanish out from under
//! a caller, and the map mutex is released before blocking.
//!
//! A write request at the head of the queue is granted only from the
//! `Stale` state and blocks every request queued behind it, so writers
//! are not starved by a stream of readers.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use quayfs_errors::{FsError, Result};

/// Opaque token naming one logical calling context for lock ownership.
///
/// Two locks inited with the same caller id belong to the same logical
/// operation; a caller id must not acquire the same lock twice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallerId(u64);

static NEXT_CALLER_ID: AtomicU64 = AtomicU64::new(1);

impl CallerId {
    /// Produces a process-unique caller id.
    pub fn generate() -> Self {
        CallerId(NEXT_CALLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw u64 value of this caller id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock name: one lock exists per `(volume, inode)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockId {
    volume: String,
    inode: u64,
}

impl LockId {
    /// Creates a lock id for the given volume and inode number.
    pub fn new(volume: &str, inode: u64) -> Self {
        Self {
            volume: volume.to_string(),
            inode,
        }
    }

    /// The volume name component.
    pub fn volume(&self) -> &str {
        &self.volume
    }

    /// The inode number component.
    pub fn inode(&self) -> u64 {
        self.inode
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.volume, self.inode)
    }
}

/// Requested share mode for an acquisition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Shared; any number of concurrent readers.
    Read,
    /// Exclusive; a single writer.
    Write,
}

/// Kind of ownership queried by [`LockManager::is_held`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeldType {
    /// Held shared.
    Read,
    /// Held exclusive.
    Write,
    /// Held in either mode.
    Any,
}

/// Blocking behavior for an acquisition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Blocking {
    /// Wait until the lock can be granted.
    Block,
    /// Fail fast with `TryAgain` if the lock cannot be granted now.
    Try,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LockState {
    Stale,
    Shared,
    Exclusive,
}

/// One queued acquisition. The condvar is keyed to this entry; all
/// entries wait against the track mutex.
struct WaitSlot {
    mode: LockMode,
    caller: CallerId,
    granted: AtomicBool,
    cond: Condvar,
}

struct TrackInner {
    state: LockState,
    owners: Vec<CallerId>,
    waiters: u64,
    queue: VecDeque<Arc<WaitSlot>>,
}

struct Track {
    inner: Mutex<TrackInner>,
}

impl Track {
    fn new() -> Self {
        Self {
            inner: Mutex::new(TrackInner {
                state: LockState::Stale,
                owners: Vec::new(),
                waiters: 0,
                queue: VecDeque::new(),
            }),
        }
    }
}

/// The process-local lock manager.
///
/// A track exists in the map exactly while it has owners or waiters;
/// the last release removes it.
pub struct LockManager {
    map: Mutex<HashMap<LockId, Arc<Track>>>,
}

impl LockManager {
    /// Creates an empty lock manager.
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the lock named by `id` for `caller` in the given mode.
    ///
    /// With [`Blocking::Try`], fails fast with `TryAgain` when a write
    /// is requested on a non-stale lock or a read on an exclusive one.
    /// With [`Blocking::Block`] the call queues and waits; the queue is
    /// FIFO with writer preference at the head.
    pub fn acquire(
        &self,
        id: &LockId,
        caller: CallerId,
        mode: LockMode,
        blocking: Blocking,
    ) -> Result<()> {
        let mut map = self.map.lock();
        let track = map
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Track::new()))
            .clone();
        let mut inner = track.inner.lock();
        drop(map);

        if blocking == Blocking::Try {
            let busy = match mode {
                LockMode::Write => inner.state != LockState::Stale,
                LockMode::Read => inner.state == LockState::Exclusive,
            };
            if busy {
                return Err(FsError::try_again(format!("lock {} is busy", id)));
            }
        }

        let slot = Arc::new(WaitSlot {
            mode,
            caller,
            granted: AtomicBool::new(false),
            cond: Condvar::new(),
        });
        inner.queue.push_back(slot.clone());
        inner.waiters += 1;

        Self::grant_pass(&mut inner);

        while !slot.granted.load(Ordering::Relaxed) {
            slot.cond.wait(&mut inner);
        }

        // Decremented here rather than in the grant pass so that no
        // other thread sees a zero waiter count between the signal and
        // this thread actually waking.
        inner.waiters -= 1;

        Ok(())
    }

    /// Releases the lock named by `id` held by `caller` and grants to
    /// waiters where possible.
    ///
    /// # Panics
    ///
    /// Panics if the lock is unknown or `caller` is not an owner; both
    /// indicate programmer error, not external input.
    pub fn release(&self, id: &LockId, caller: CallerId) {
        let mut map = self.map.lock();
        let track = match map.get(id) {
            Some(track) => track.clone(),
            None => panic!("release of unknown lock {}", id),
        };
        let mut inner = track.inner.lock();

        // Remove the track while still holding the map mutex if this is
        // the last holder and nobody is waiting.
        if inner.owners.len() == 1 && inner.waiters == 0 {
            map.remove(id);
        }
        drop(map);

        let pos = match inner.owners.iter().position(|c| *c == caller) {
            Some(pos) => pos,
            None => panic!("caller {} does not own lock {}", caller, id),
        };
        inner.owners.remove(pos);
        if inner.owners.is_empty() {
            inner.state = LockState::Stale;
        }

        Self::grant_pass(&mut inner);
    }

    /// Reports whether `caller` holds the lock in the queried mode.
    pub fn is_held(&self, id: &LockId, caller: CallerId, kind: HeldType) -> bool {
        let map = self.map.lock();
        let track = match map.get(id) {
            Some(track) => track.clone(),
            None => return false,
        };
        let inner = track.inner.lock();
        drop(map);

        let owns = inner.owners.contains(&caller);
        match kind {
            HeldType::Read => inner.state == LockState::Shared && owns,
            HeldType::Write => inner.state == LockState::Exclusive && owns,
            HeldType::Any => {
                (inner.state == LockState::Shared || inner.state == LockState::Exclusive) && owns
            }
        }
    }

    /// Test-support: returns `(owner_count, waiter_count)` for a lock,
    /// or `None` if no track exists.
    pub fn track_counts(&self, id: &LockId) -> Option<(usize, u64)> {
        let map = self.map.lock();
        let track = map.get(id)?.clone();
        let inner = track.inner.lock();
        drop(map);
        Some((inner.owners.len(), inner.waiters))
    }

    /// Walks the wait queue and grants every request that can proceed.
    /// Holds the track mutex via `inner`.
    fn grant_pass(inner: &mut TrackInner) {
        if inner.state == LockState::Exclusive {
            return;
        }

        while let Some(head_mode) = inner.queue.front().map(|slot| slot.mode) {
            match head_mode {
                LockMode::Write => {
                    // A writer is granted only from Stale. Granted or
                    // not, nothing behind it may proceed.
                    if inner.state == LockState::Stale {
                        let slot = inner.queue.pop_front().expect("queue head vanished");
                        inner.state = LockState::Exclusive;
                        inner.owners.push(slot.caller);
                        slot.granted.store(true, Ordering::Relaxed);
                        slot.cond.notify_one();
                    }
                    return;
                }
                LockMode::Read => {
                    let slot = inner.queue.pop_front().expect("queue head vanished");
                    inner.state = LockState::Shared;
                    inner.owners.push(slot.caller);
                    slot.granted.store(true, Ordering::Relaxed);
                    slot.cond.notify_one();
                }
            }
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn make_manager() -> Arc<LockManager> {
        Arc::new(LockManager::new())
    }

    fn lock_id(ino: u64) -> LockId {
        LockId::new("testvol", ino)
    }

    /// Spin until the lock's waiter count reaches `count`.
    fn wait_waiters(mgr: &LockManager, id: &LockId, count: u64) {
        loop {
            if let Some((_, waiters)) = mgr.track_counts(id) {
                if waiters == count {
                    return;
                }
            } else if count == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_write_lock_then_release() {
        let mgr = make_manager();
        let id = lock_id(1);
        let caller = CallerId::generate();

        mgr.acquire(&id, caller, LockMode::Write, Blocking::Block)
            .unwrap();
        assert!(mgr.is_held(&id, caller, HeldType::Write));
        assert!(mgr.is_held(&id, caller, HeldType::Any));
        assert!(!mgr.is_held(&id, caller, HeldType::Read));

        mgr.release(&id, caller);
        assert!(!mgr.is_held(&id, caller, HeldType::Any));
    }

    #[test]
    fn test_shared_lock_allows_multiple_readers() {
        let mgr = make_manager();
        let id = lock_id(2);
        let a = CallerId::generate();
        let b = CallerId::generate();

        mgr.acquire(&id, a, LockMode::Read, Blocking::Block).unwrap();
        mgr.acquire(&id, b, LockMode::Read, Blocking::Block).unwrap();

        assert!(mgr.is_held(&id, a, HeldType::Read));
        assert!(mgr.is_held(&id, b, HeldType::Read));
        assert_eq!(mgr.track_counts(&id), Some((2, 0)));

        mgr.release(&id, a);
        mgr.release(&id, b);
    }

    #[test]
    fn test_try_write_fails_on_shared() {
        let mgr = make_manager();
        let id = lock_id(3);
        let reader = CallerId::generate();
        let writer = CallerId::generate();

        mgr.acquire(&id, reader, LockMode::Read, Blocking::Block)
            .unwrap();
        match mgr.acquire(&id, writer, LockMode::Write, Blocking::Try) {
            Err(err) => assert_eq!(err.kind(), quayfs_errors::ErrorKind::TryAgain),
            other => panic!("expected TryAgain, got {:?}", other),
        }
        mgr.release(&id, reader);
    }

    #[test]
    fn test_try_read_fails_on_exclusive() {
        let mgr = make_manager();
        let id = lock_id(4);
        let writer = CallerId::generate();
        let reader = CallerId::generate();

        mgr.acquire(&id, writer, LockMode::Write, Blocking::Block)
            .unwrap();
        match mgr.acquire(&id, reader, LockMode::Read, Blocking::Try) {
            Err(err) => assert_eq!(err.kind(), quayfs_errors::ErrorKind::TryAgain),
            other => panic!("expected TryAgain, got {:?}", other),
        }
        mgr.release(&id, writer);
    }

    #[test]
    fn test_try_succeeds_when_free() {
        let mgr = make_manager();
        let id = lock_id(5);
        let caller = CallerId::generate();

        mgr.acquire(&id, caller, LockMode::Write, Blocking::Try)
            .unwrap();
        assert!(mgr.is_held(&id, caller, HeldType::Write));
        mgr.release(&id, caller);

        mgr.acquire(&id, caller, LockMode::Read, Blocking::Try)
            .unwrap();
        assert!(mgr.is_held(&id, caller, HeldType::Read));
        mgr.release(&id, caller);
    }

    #[test]
    fn test_track_removed_after_last_release() {
        let mgr = make_manager();
        let id = lock_id(6);
        let a = CallerId::generate();
        let b = CallerId::generate();

        mgr.acquire(&id, a, LockMode::Read, Blocking::Block).unwrap();
        mgr.acquire(&id, b, LockMode::Read, Blocking::Block).unwrap();

        mgr.release(&id, a);
        assert!(mgr.track_counts(&id).is_some());

        mgr.release(&id, b);
        assert!(mgr.track_counts(&id).is_none());
    }

    #[test]
    #[should_panic(expected = "release of unknown lock")]
    fn test_release_unknown_lock_panics() {
        let mgr = make_manager();
        mgr.release(&lock_id(7), CallerId::generate());
    }

    #[test]
    fn test_writer_blocks_until_readers_release() {
        let mgr = make_manager();
        let id = lock_id(8);
        let reader = CallerId::generate();
        let writer = CallerId::generate();

        mgr.acquire(&id, reader, LockMode::Read, Blocking::Block)
            .unwrap();

        let mgr2 = mgr.clone();
        let id2 = id.clone();
        let handle = thread::spawn(move || {
            mgr2.acquire(&id2, writer, LockMode::Write, Blocking::Block)
                .unwrap();
            mgr2.release(&id2, writer);
        });

        wait_waiters(&mgr, &id, 1);
        assert!(!mgr.is_held(&id, writer, HeldType::Write));

        mgr.release(&id, reader);
        handle.join().unwrap();
        assert!(mgr.track_counts(&id).is_none());
    }

    #[test]
    fn test_new_reader_queues_behind_waiting_writer() {
        let mgr = make_manager();
        let id = lock_id(9);
        let first_reader = CallerId::generate();
        let writer = CallerId::generate();
        let second_reader = CallerId::generate();

        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        mgr.acquire(&id, first_reader, LockMode::Read, Blocking::Block)
            .unwrap();

        let mgr_w = mgr.clone();
        let id_w = id.clone();
        let order_w = order.clone();
        let writer_thread = thread::spawn(move || {
            mgr_w
                .acquire(&id_w, writer, LockMode::Write, Blocking::Block)
                .unwrap();
            order_w.lock().push("writer");
            mgr_w.release(&id_w, writer);
        });

        wait_waiters(&mgr, &id, 1);

        let mgr_r = mgr.clone();
        let id_r = id.clone();
        let order_r = order.clone();
        let reader_thread = thread::spawn(move || {
            mgr_r
                .acquire(&id_r, second_reader, LockMode::Read, Blocking::Block)
                .unwrap();
            order_r.lock().push("reader");
            mgr_r.release(&id_r, second_reader);
        });

        wait_waiters(&mgr, &id, 2);

        // Releasing the first reader must wake the writer first even
        // though the lock is shared and a reader is also queued.
        mgr.release(&id, first_reader);

        writer_thread.join().unwrap();
        reader_thread.join().unwrap();

        let order = order.lock();
        assert_eq!(*order, vec!["writer", "reader"]);
    }

    #[test]
    fn test_writers_are_mutually_exclusive() {
        let mgr = make_manager();
        let id = lock_id(10);
        let counter = Arc::new(Mutex::new((0u64, 0u64))); // (current, max)

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mgr = mgr.clone();
            let id = id.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                let caller = CallerId::generate();
                for _ in 0..50 {
                    mgr.acquire(&id, caller, LockMode::Write, Blocking::Block)
                        .unwrap();
                    {
                        let mut c = counter.lock();
                        c.0 += 1;
                        c.1 = c.1.max(c.0);
                        assert_eq!(c.0, 1, "two writers inside the critical section");
                        c.0 -= 1;
                    }
                    mgr.release(&id, caller);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.lock().1, 1);
        assert!(mgr.track_counts(&id).is_none());
    }

    #[test]
    fn test_is_held_for_unknown_lock() {
        let mgr = make_manager();
        assert!(!mgr.is_held(&lock_id(11), CallerId::generate(), HeldType::Any));
    }

    #[test]
    fn test_caller_ids_unique() {
        let a = CallerId::generate();
        let b = CallerId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_lock_id_display() {
        let id = LockId::new("vol0", 42);
        assert_eq!(format!("{}", id), "vol0:42");
        assert_eq!(id.volume(), "vol0");
        assert_eq!(id.inode(), 42);
    }
}
