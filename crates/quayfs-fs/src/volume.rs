//! The contract consumed from the inode collaborator.
//!
//! Block allocation, log-segment I/O, and metadata persistence live
//! behind [`VolumeHandle`]; this layer only ever calls through the
//! trait, under locks it has already taken. The in-memory
//! implementation in [`crate::memvol`] backs development and tests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use quayfs_errors::Result;

use crate::profiler::Profiler;
use crate::types::{AccessMode, InodeNumber, InodeType};

/// Inode metadata as maintained by the collaborator.
///
/// Times are nanoseconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeMetadata {
    /// Creation time.
    pub creation_time_ns: u64,
    /// Modification time.
    pub modification_time_ns: u64,
    /// Attribute-change time.
    pub attr_change_time_ns: u64,
    /// Access time.
    pub access_time_ns: u64,
    /// Size in bytes.
    pub size: u64,
    /// Link count.
    pub link_count: u64,
    /// Inode type.
    pub inode_type: InodeType,
    /// POSIX mode bits.
    pub mode: u32,
    /// Owner user id.
    pub user_id: u32,
    /// Owner group id.
    pub group_id: u32,
    /// Number of writes to the inode.
    pub num_writes: u64,
    /// Ordered names of the streams attached to the inode.
    pub stream_names: Vec<String>,
}

/// A directory entry as reported by the collaborator. The entry type is
/// not included; the filesystem layer fills it under the child's lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Inode number of the entry.
    pub ino: InodeNumber,
    /// Entry basename.
    pub basename: String,
    /// Cursor of this entry for location-based readdir.
    pub location: i64,
}

/// One step of a read plan: read `length` bytes at `offset` within the
/// named backing object. Concatenating the steps reproduces the
/// requested byte range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPlanStep {
    /// Backing object path.
    pub object_path: String,
    /// Byte offset within the object.
    pub offset: u64,
    /// Number of bytes.
    pub length: u64,
}

/// One source file of a coalesce request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalesceElement {
    /// Directory containing the element.
    pub containing_dir: InodeNumber,
    /// The element's inode.
    pub ino: InodeNumber,
    /// The element's basename within its directory.
    pub name: String,
}

/// Result of a coalesce: the destination inode, its modification time
/// in nanoseconds, and its write count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalesceResult {
    /// Destination file inode.
    pub ino: InodeNumber,
    /// Destination modification time, nanoseconds since the epoch.
    pub modification_time_ns: u64,
    /// Destination write count.
    pub num_writes: u64,
}

/// Operations this layer requires of the inode manager.
///
/// Callers are responsible for locking; the collaborator performs no
/// lock management of its own.
pub trait VolumeHandle: Send + Sync {
    /// Checks whether the user may access the inode with the given
    /// mode mask. `F_OK` tests bare existence; `P_OK` tests ownership.
    fn access(&self, ino: InodeNumber, uid: u32, gid: u32, other_gids: &[u32], mode: AccessMode)
        -> bool;

    /// Returns the inode's type.
    fn get_type(&self, ino: InodeNumber) -> Result<InodeType>;

    /// Returns the inode's metadata.
    fn get_metadata(&self, ino: InodeNumber) -> Result<InodeMetadata>;

    /// Looks up a basename in a directory.
    fn lookup(&self, dir: InodeNumber, name: &str) -> Result<InodeNumber>;

    /// Links `target` into `dir` under `name`.
    fn link(&self, dir: InodeNumber, name: &str, target: InodeNumber) -> Result<()>;

    /// Removes the entry `name` from `dir`.
    fn unlink(&self, dir: InodeNumber, name: &str) -> Result<()>;

    /// Atomically moves an entry between directories (or renames it in
    /// place).
    fn move_entry(
        &self,
        src_dir: InodeNumber,
        src_name: &str,
        dst_dir: InodeNumber,
        dst_name: &str,
    ) -> Result<()>;

    /// Creates an unlinked file inode.
    fn create_file(&self, mode: u32, uid: u32, gid: u32) -> Result<InodeNumber>;

    /// Creates an unlinked directory inode.
    fn create_dir(&self, mode: u32, uid: u32, gid: u32) -> Result<InodeNumber>;

    /// Creates an unlinked symlink inode pointing at `target`.
    fn create_symlink(&self, target: &str, mode: u32, uid: u32, gid: u32)
        -> Result<InodeNumber>;

    /// Destroys an inode. The caller must have made it unreachable.
    fn destroy(&self, ino: InodeNumber) -> Result<()>;

    /// Returns a symlink's target.
    fn get_symlink(&self, ino: InodeNumber) -> Result<String>;

    /// Reads up to `length` bytes at `offset`.
    fn read(
        &self,
        ino: InodeNumber,
        offset: u64,
        length: u64,
        profiler: &mut Profiler,
    ) -> Result<Vec<u8>>;

    /// Writes `buf` at `offset`.
    fn write(&self, ino: InodeNumber, offset: u64, buf: &[u8], profiler: &mut Profiler)
        -> Result<()>;

    /// Flushes pending data for the inode.
    fn flush(&self, ino: InodeNumber, and_purge: bool) -> Result<()>;

    /// Binds a log segment written out of band into the file's extent
    /// map. `append` is false for the first segment of an object PUT.
    fn wrote(
        &self,
        ino: InodeNumber,
        file_offset: u64,
        object_path: &str,
        object_offset: u64,
        length: u64,
        append: bool,
    ) -> Result<()>;

    /// Merges the elements, in order, into a file named `dest_name`
    /// within `dest_dir`, unlinking each element.
    fn coalesce(
        &self,
        dest_dir: InodeNumber,
        dest_name: &str,
        elements: &[CoalesceElement],
    ) -> Result<CoalesceResult>;

    /// Number of entries in a directory, `.` and `..` included.
    fn num_dir_entries(&self, ino: InodeNumber) -> Result<u64>;

    /// The inode's link count.
    fn get_link_count(&self, ino: InodeNumber) -> Result<u64>;

    /// Reads directory entries in ascending basename order, strictly
    /// after `prev_basename`. Returns the entries and whether more
    /// remain. A marker past the last entry reports `NotFound`.
    /// `max_entries == 0` and `max_buf_size == 0` mean unlimited.
    fn read_dir(
        &self,
        ino: InodeNumber,
        max_entries: u64,
        max_buf_size: u64,
        prev_basename: &str,
    ) -> Result<(Vec<DirEntry>, bool)>;

    /// Reads the single entry after cursor `prev_location` (-1 starts
    /// from the beginning). Reports `NotFound` past the end.
    fn read_dir_at(&self, ino: InodeNumber, prev_location: i64) -> Result<DirEntry>;

    /// Builds the read plan covering `length` bytes at `offset`.
    fn get_read_plan(&self, ino: InodeNumber, offset: u64, length: u64)
        -> Result<Vec<ReadPlanStep>>;

    /// Returns the named stream's bytes; `StreamNotFound` if absent.
    fn get_stream(&self, ino: InodeNumber, name: &str) -> Result<Vec<u8>>;

    /// Creates or replaces the named stream.
    fn put_stream(&self, ino: InodeNumber, name: &str, data: &[u8]) -> Result<()>;

    /// Deletes the named stream; `StreamNotFound` if absent.
    fn delete_stream(&self, ino: InodeNumber, name: &str) -> Result<()>;

    /// Sets the creation time, nanoseconds since the epoch.
    fn set_creation_time(&self, ino: InodeNumber, time_ns: u64) -> Result<()>;

    /// Sets the modification time.
    fn set_modification_time(&self, ino: InodeNumber, time_ns: u64) -> Result<()>;

    /// Sets the access time.
    fn set_access_time(&self, ino: InodeNumber, time_ns: u64) -> Result<()>;

    /// Sets the attribute-change time.
    fn set_attr_change_time(&self, ino: InodeNumber, time_ns: u64) -> Result<()>;

    /// Sets the file size, truncating or zero-extending.
    fn set_size(&self, ino: InodeNumber, size: u64) -> Result<()>;

    /// Sets the owner user id.
    fn set_owner_user_id(&self, ino: InodeNumber, uid: u32) -> Result<()>;

    /// Sets the owner group id.
    fn set_owner_group_id(&self, ino: InodeNumber, gid: u32) -> Result<()>;

    /// Sets owner user and group ids together.
    fn set_owner_user_group_id(&self, ino: InodeNumber, uid: u32, gid: u32) -> Result<()>;

    /// Sets the permission mode bits.
    fn set_perm_mode(&self, ino: InodeNumber, mode: u32) -> Result<()>;

    /// Provisions a fresh backing object and returns its path.
    fn provision_object(&self) -> Result<String>;

    /// The filesystem id of the volume.
    fn get_fsid(&self) -> u64;

    /// Validates the inode's on-store structures.
    fn validate(&self, ino: InodeNumber) -> Result<()>;
}

/// Source of volume handles, keyed by volume name.
pub trait VolumeProvider: Send + Sync {
    /// Fetches the handle for the named volume.
    fn fetch_volume_handle(&self, volume_name: &str) -> Result<Arc<dyn VolumeHandle>>;
}
