//! Mount registry and mount handles.
//!
//! The registry is constructed explicitly and owns the process-wide
//! maps: mount id to mount, volume name to volume record. A volume
//! record (and its byte-range lock table) is created on first mount of
//! a volume and lives for the life of the registry. Every filesystem
//! and gateway operation is a method on [`Mount`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use quayfs_dlm::{CallerId, LockHandle, LockId, LockManager};
use quayfs_errors::{FsError, Result};

use crate::config::VolumeConfig;
use crate::flock::FlockTable;
use crate::metrics::{FsOp, OpCounters};
use crate::types::InodeNumber;
use crate::volume::{VolumeHandle, VolumeProvider};

/// Identifier of one mount.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountId(u64);

impl MountId {
    /// Returns the raw u64 value of this mount id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Options supplied at mount time and carried on the mount handle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Mount the volume read-only. Enforcement belongs to front-ends;
    /// the flag is carried for them.
    pub read_only: bool,
}

/// Per-volume process-wide record.
pub(crate) struct VolumeRecord {
    pub(crate) flocks: FlockTable,
}

struct RegistryInner {
    next_mount_id: u64,
    mounts: HashMap<MountId, Arc<Mount>>,
    volumes: HashMap<String, Arc<VolumeRecord>>,
}

pub(crate) struct RegistryState {
    provider: Arc<dyn VolumeProvider>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) counters: Arc<OpCounters>,
    pub(crate) config: VolumeConfig,
    inner: Mutex<RegistryInner>,
}

impl RegistryState {
    pub(crate) fn volume_record(&self, volume_name: &str) -> Result<Arc<VolumeRecord>> {
        let inner = self.inner.lock();
        inner.volumes.get(volume_name).cloned().ok_or_else(|| {
            FsError::bad_mount_volume(format!("volume '{}' has no record", volume_name))
        })
    }
}

/// The mount registry.
pub struct MountRegistry {
    state: Arc<RegistryState>,
}

impl MountRegistry {
    /// Creates a registry over the given volume provider with default
    /// volume configuration.
    pub fn new(provider: Arc<dyn VolumeProvider>) -> Self {
        Self::with_config(provider, VolumeConfig::default())
    }

    /// Creates a registry with explicit volume configuration.
    pub fn with_config(provider: Arc<dyn VolumeProvider>, config: VolumeConfig) -> Self {
        Self {
            state: Arc::new(RegistryState {
                provider,
                locks: Arc::new(LockManager::new()),
                counters: Arc::new(OpCounters::new()),
                config,
                inner: Mutex::new(RegistryInner {
                    next_mount_id: 0,
                    mounts: HashMap::new(),
                    volumes: HashMap::new(),
                }),
            }),
        }
    }

    /// Mounts the named volume, fetching its handle from the provider.
    pub fn mount(&self, volume_name: &str, options: MountOptions) -> Result<Arc<Mount>> {
        let volume = match self.state.provider.fetch_volume_handle(volume_name) {
            Ok(volume) => volume,
            Err(err) => {
                tracing::error!(volume = volume_name, %err, "fetch of volume handle failed");
                return Err(err);
            }
        };

        let mut inner = self.state.inner.lock();
        inner.next_mount_id += 1;
        let id = MountId(inner.next_mount_id);
        let mount = Arc::new(Mount {
            id,
            volume_name: volume_name.to_string(),
            options,
            volume,
            state: self.state.clone(),
        });
        inner.mounts.insert(id, mount.clone());
        inner
            .volumes
            .entry(volume_name.to_string())
            .or_insert_with(|| {
                Arc::new(VolumeRecord {
                    flocks: FlockTable::new(),
                })
            });

        Ok(mount)
    }

    /// Unmounts by id. The volume record stays; other mounts of the
    /// same volume may be using it.
    pub fn unmount(&self, id: MountId) -> Result<()> {
        let mut inner = self.state.inner.lock();
        inner
            .mounts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| FsError::not_found(format!("mount {} not found", id.as_u64())))
    }

    /// The operation counters shared by all mounts of this registry.
    pub fn counters(&self) -> Arc<OpCounters> {
        self.state.counters.clone()
    }
}

/// A mounted volume; the handle every operation is called on.
pub struct Mount {
    id: MountId,
    volume_name: String,
    options: MountOptions,
    pub(crate) volume: Arc<dyn VolumeHandle>,
    pub(crate) state: Arc<RegistryState>,
}

impl Mount {
    /// The id of this mount.
    pub fn id(&self) -> MountId {
        self.id
    }

    /// The name of the mounted volume.
    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    /// The options this mount was created with.
    pub fn options(&self) -> MountOptions {
        self.options
    }

    /// The lock id naming `ino` on this volume.
    pub(crate) fn lock_id(&self, ino: InodeNumber) -> LockId {
        LockId::new(&self.volume_name, ino.as_u64())
    }

    /// Builds a lock handle for `ino`. A fresh caller id is generated
    /// when the operation has no shared calling context.
    pub(crate) fn inode_lock(&self, ino: InodeNumber, caller: Option<CallerId>) -> LockHandle {
        LockHandle::new(
            self.state.locks.clone(),
            self.lock_id(ino),
            caller.unwrap_or_else(CallerId::generate),
        )
    }

    /// The byte-range lock table of this volume.
    pub(crate) fn flock_table(&self) -> Result<Arc<VolumeRecord>> {
        self.state.volume_record(&self.volume_name)
    }

    pub(crate) fn count(&self, op: FsOp) {
        self.state.counters.increment(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memvol::MemoryVolumeProvider;

    fn make_registry() -> (Arc<MemoryVolumeProvider>, MountRegistry) {
        let provider = Arc::new(MemoryVolumeProvider::new());
        let registry = MountRegistry::new(provider.clone());
        (provider, registry)
    }

    #[test]
    fn test_mount_known_volume() {
        let (provider, registry) = make_registry();
        provider.create_volume("vol-a");

        let mount = registry.mount("vol-a", MountOptions::default()).unwrap();
        assert_eq!(mount.volume_name(), "vol-a");
        assert!(!mount.options().read_only);
    }

    #[test]
    fn test_mount_unknown_volume_fails() {
        let (_provider, registry) = make_registry();
        match registry.mount("missing", MountOptions::default()) {
            Err(err) => assert_eq!(err.kind(), quayfs_errors::ErrorKind::NotFound),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_mount_ids_unique() {
        let (provider, registry) = make_registry();
        provider.create_volume("vol-a");

        let first = registry.mount("vol-a", MountOptions::default()).unwrap();
        let second = registry.mount("vol-a", MountOptions::default()).unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_unmount() {
        let (provider, registry) = make_registry();
        provider.create_volume("vol-a");

        let mount = registry.mount("vol-a", MountOptions::default()).unwrap();
        registry.unmount(mount.id()).unwrap();

        match registry.unmount(mount.id()) {
            Err(err) => assert_eq!(err.kind(), quayfs_errors::ErrorKind::NotFound),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_volume_record_shared_across_mounts() {
        let (provider, registry) = make_registry();
        provider.create_volume("vol-a");

        let first = registry.mount("vol-a", MountOptions::default()).unwrap();
        let second = registry.mount("vol-a", MountOptions::default()).unwrap();

        let record_a = first.flock_table().unwrap();
        let record_b = second.flock_table().unwrap();
        assert!(Arc::ptr_eq(&record_a, &record_b));
    }
}
