//! Volume configuration surfaced through `stat_vfs`.

use serde::{Deserialize, Serialize};

/// Per-volume configuration inputs.
///
/// The block counters are advertised verbatim through `stat_vfs`; the
/// backing object store has no real block accounting, so they are
/// configuration, not measurements.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Filesystem block size in bytes.
    pub fs_block_size: u64,
    /// Optimal transfer size in bytes.
    pub fs_optimal_transfer_size: u64,
    /// Advertised total block count.
    pub fake_total_blocks: u64,
    /// Advertised free block count.
    pub fake_free_blocks: u64,
    /// Advertised available block count.
    pub fake_avail_blocks: u64,
    /// Advertised total inode count.
    pub fake_total_inodes: u64,
    /// Advertised available inode count.
    pub fake_avail_inodes: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            fs_block_size: 65536,
            fs_optimal_transfer_size: 65536,
            fake_total_blocks: 1 << 30,
            fake_free_blocks: 1 << 30,
            fake_avail_blocks: 1 << 30,
            fake_total_inodes: 1 << 30,
            fake_avail_inodes: 1 << 30,
        }
    }
}
