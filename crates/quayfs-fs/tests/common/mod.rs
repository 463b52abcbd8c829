//! Shared fixtures for the integration tests.

use std::sync::Arc;

use quayfs_fs::memvol::{MemoryVolume, MemoryVolumeProvider};
use quayfs_fs::types::UserContext;
use quayfs_fs::{Mount, MountOptions, MountRegistry};

/// A mounted in-memory volume plus the registry that owns it.
pub struct TestFs {
    pub registry: MountRegistry,
    pub volume: Arc<MemoryVolume>,
    pub mount: Arc<Mount>,
}

/// Mounts a fresh in-memory volume named `volume_name`.
pub fn mount_volume(volume_name: &str) -> TestFs {
    let provider = Arc::new(MemoryVolumeProvider::new());
    let volume = provider.create_volume(volume_name);
    let registry = MountRegistry::new(provider);
    let mount = registry
        .mount(volume_name, MountOptions::default())
        .expect("mount should succeed");
    TestFs {
        registry,
        volume,
        mount,
    }
}

/// The root identity used by most scenarios.
pub fn root_ctx() -> UserContext {
    UserContext::root()
}
