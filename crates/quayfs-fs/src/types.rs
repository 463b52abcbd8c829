//! Core value types shared across the filesystem layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum basename length in bytes.
pub const FILE_NAME_MAX: usize = 255;

/// Maximum full path length in bytes.
pub const FILE_PATH_MAX: usize = 4096;

/// Maximum number of symlinks followed during one resolution.
pub const MAX_SYMLINKS: u32 = 40;

/// Reserved stream name carrying opaque HTTP-gateway metadata.
pub const MIDDLEWARE_STREAM: &str = "middleware";

/// Default rwxrwxrwx mode applied to symlinks and gateway-materialized
/// inodes.
pub const POSIX_MODE_PERM: u32 = 0o777;

/// `set_xattr` flag: fail with `Exists` if the stream is present.
pub const XATTR_CREATE: u32 = 1;

/// `set_xattr` flag: fail with `StreamNotFound` if the stream is
/// absent.
pub const XATTR_REPLACE: u32 = 2;

/// An inode number as assigned by the inode collaborator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeNumber(u64);

impl InodeNumber {
    /// The well-known root directory inode number.
    pub const ROOT: InodeNumber = InodeNumber(1);

    /// Creates an InodeNumber from a raw u64 value.
    pub fn new(ino: u64) -> Self {
        InodeNumber(ino)
    }

    /// Returns the raw u64 value of this inode number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type of an inode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeType {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
}

/// POSIX access mode mask passed to the collaborator's access check.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMode(pub u32);

impl AccessMode {
    /// File existence test.
    pub const F_OK: AccessMode = AccessMode(0);
    /// Execute permission.
    pub const X_OK: AccessMode = AccessMode(1);
    /// Write permission.
    pub const W_OK: AccessMode = AccessMode(2);
    /// Read permission.
    pub const R_OK: AccessMode = AccessMode(4);
    /// Ownership check for chown-class operations.
    pub const P_OK: AccessMode = AccessMode(16);

    /// Checks if this mode includes read permission.
    pub fn has_read(&self) -> bool {
        self.0 & Self::R_OK.0 != 0
    }

    /// Checks if this mode includes write permission.
    pub fn has_write(&self) -> bool {
        self.0 & Self::W_OK.0 != 0
    }

    /// Checks if this mode includes execute permission.
    pub fn has_execute(&self) -> bool {
        self.0 & Self::X_OK.0 != 0
    }

    /// Checks if this mode is the ownership check.
    pub fn is_ownership_check(&self) -> bool {
        self.0 & Self::P_OK.0 != 0
    }
}

impl std::ops::BitOr for AccessMode {
    type Output = AccessMode;

    fn bitor(self, rhs: AccessMode) -> AccessMode {
        AccessMode(self.0 | rhs.0)
    }
}

/// Identity of the calling user for permission checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// User id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
    /// Supplementary group ids.
    pub other_gids: Vec<u32>,
}

impl UserContext {
    /// Creates a user context.
    pub fn new(uid: u32, gid: u32, other_gids: Vec<u32>) -> Self {
        Self {
            uid,
            gid,
            other_gids,
        }
    }

    /// The superuser context.
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            other_gids: Vec::new(),
        }
    }
}

/// The fixed-shape stat record returned by `getstat`.
///
/// Times are nanoseconds since the Unix epoch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Creation time.
    pub crtime_ns: u64,
    /// Modification time.
    pub mtime_ns: u64,
    /// Attribute-change time.
    pub ctime_ns: u64,
    /// Access time.
    pub atime_ns: u64,
    /// Size in bytes.
    pub size: u64,
    /// Link count.
    pub nlink: u64,
    /// Inode type.
    pub file_type: InodeType,
    /// Inode number.
    pub ino: InodeNumber,
    /// Mode bits.
    pub mode: u64,
    /// Owner user id.
    pub uid: u64,
    /// Owner group id.
    pub gid: u64,
    /// Number of writes to the inode.
    pub num_writes: u64,
}

/// A partial stat update; only fields that are `Some` are applied.
///
/// uid, gid, and mode travel as u64 but must fit in 32 bits; `setstat`
/// rejects wider values with the matching invalid-value error kind.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetstatRequest {
    /// New creation time, nanoseconds since the epoch.
    pub crtime_ns: Option<u64>,
    /// New modification time.
    pub mtime_ns: Option<u64>,
    /// New attribute-change time.
    pub ctime_ns: Option<u64>,
    /// New access time.
    pub atime_ns: Option<u64>,
    /// New size in bytes.
    pub size: Option<u64>,
    /// New owner user id.
    pub uid: Option<u64>,
    /// New owner group id.
    pub gid: Option<u64>,
    /// New mode bits.
    pub mode: Option<u64>,
}

/// One directory entry as returned by the readdir family, with the
/// entry type filled in under the child's lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryInfo {
    /// Inode number of the entry.
    pub ino: InodeNumber,
    /// Entry basename.
    pub basename: String,
    /// Entry type.
    pub file_type: InodeType,
}

/// The statvfs record: configuration-fed counters surfaced verbatim.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatVfs {
    /// Filesystem id from the collaborator.
    pub filesystem_id: u64,
    /// Filesystem block size.
    pub block_size: u64,
    /// Fragment size (optimal transfer size).
    pub fragment_size: u64,
    /// Total data blocks.
    pub total_blocks: u64,
    /// Free blocks.
    pub free_blocks: u64,
    /// Blocks available to unprivileged users.
    pub avail_blocks: u64,
    /// Total inodes.
    pub total_inodes: u64,
    /// Free inodes.
    pub free_inodes: u64,
    /// Inodes available to unprivileged users.
    pub avail_inodes: u64,
    /// Mount flags.
    pub mount_flags: u64,
    /// Maximum filename length.
    pub max_filename_len: u64,
}
