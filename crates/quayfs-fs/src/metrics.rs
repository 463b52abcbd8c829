//! Operation counters for the filesystem layer.
//!
//! Every public operation increments its counter on success so the
//! daemon's stats scraper can report per-op rates.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Filesystem operation names for counting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FsOp {
    /// Access check.
    Access,
    /// File creation.
    Create,
    /// Directory creation.
    Mkdir,
    /// Symlink creation.
    Symlink,
    /// Hard link creation.
    Link,
    /// File unlink.
    Unlink,
    /// Directory removal.
    Rmdir,
    /// Rename.
    Rename,
    /// Directory entry lookup.
    Lookup,
    /// Full-path lookup.
    LookupPath,
    /// File read.
    Read,
    /// File write.
    Write,
    /// Flush.
    Flush,
    /// Stat retrieval.
    Getstat,
    /// Stat update.
    Setstat,
    /// Type retrieval.
    GetType,
    /// Directory-type check.
    IsDir,
    /// File-type check.
    IsFile,
    /// Symlink-type check.
    IsSymlink,
    /// Paginated readdir.
    Readdir,
    /// Cursor readdir.
    ReaddirOne,
    /// Paginated readdir with stats.
    ReaddirPlus,
    /// Cursor readdir with stats.
    ReaddirOnePlus,
    /// Symlink target read.
    Readsymlink,
    /// Size change.
    Resize,
    /// Extended attribute read.
    GetXattr,
    /// Extended attribute write.
    SetXattr,
    /// Extended attribute listing.
    ListXattr,
    /// Extended attribute removal.
    RemoveXattr,
    /// Byte-range lock operation.
    Flock,
    /// Statvfs.
    StatVfs,
    /// Object provisioning passthrough.
    ProvisionObject,
    /// Inode validation.
    Validate,
    /// Gateway account listing.
    MwGetAccount,
    /// Gateway container listing.
    MwGetContainer,
    /// Gateway object read.
    MwGetObject,
    /// Gateway head.
    MwHead,
    /// Gateway metadata post.
    MwPost,
    /// Gateway container put.
    MwPutContainer,
    /// Gateway object put completion.
    MwPutComplete,
    /// Gateway coalesce.
    MwCoalesce,
    /// Gateway delete.
    MwDelete,
}

impl FsOp {
    /// Returns the canonical counter name of this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FsOp::Access => "access",
            FsOp::Create => "create",
            FsOp::Mkdir => "mkdir",
            FsOp::Symlink => "symlink",
            FsOp::Link => "link",
            FsOp::Unlink => "unlink",
            FsOp::Rmdir => "rmdir",
            FsOp::Rename => "rename",
            FsOp::Lookup => "lookup",
            FsOp::LookupPath => "lookup_path",
            FsOp::Read => "read",
            FsOp::Write => "write",
            FsOp::Flush => "flush",
            FsOp::Getstat => "getstat",
            FsOp::Setstat => "setstat",
            FsOp::GetType => "get_type",
            FsOp::IsDir => "is_dir",
            FsOp::IsFile => "is_file",
            FsOp::IsSymlink => "is_symlink",
            FsOp::Readdir => "readdir",
            FsOp::ReaddirOne => "readdir_one",
            FsOp::ReaddirPlus => "readdir_plus",
            FsOp::ReaddirOnePlus => "readdir_one_plus",
            FsOp::Readsymlink => "readsymlink",
            FsOp::Resize => "resize",
            FsOp::GetXattr => "get_xattr",
            FsOp::SetXattr => "set_xattr",
            FsOp::ListXattr => "list_xattr",
            FsOp::RemoveXattr => "remove_xattr",
            FsOp::Flock => "flock",
            FsOp::StatVfs => "stat_vfs",
            FsOp::ProvisionObject => "provision_object",
            FsOp::Validate => "validate",
            FsOp::MwGetAccount => "mw_get_account",
            FsOp::MwGetContainer => "mw_get_container",
            FsOp::MwGetObject => "mw_get_object",
            FsOp::MwHead => "mw_head",
            FsOp::MwPost => "mw_post",
            FsOp::MwPutContainer => "mw_put_container",
            FsOp::MwPutComplete => "mw_put_complete",
            FsOp::MwCoalesce => "mw_coalesce",
            FsOp::MwDelete => "mw_delete",
        }
    }
}

/// Per-operation counters.
pub struct OpCounters {
    counts: RwLock<HashMap<FsOp, u64>>,
}

impl OpCounters {
    /// Creates a zeroed counter set.
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Increments the counter for `op`.
    pub fn increment(&self, op: FsOp) {
        let mut counts = self.counts.write();
        *counts.entry(op).or_insert(0) += 1;
    }

    /// Returns the count for `op`.
    pub fn get(&self, op: FsOp) -> u64 {
        self.counts.read().get(&op).copied().unwrap_or(0)
    }

    /// Returns a snapshot of all nonzero counters by name.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let counts = self.counts.read();
        let mut snapshot: Vec<(&'static str, u64)> = counts
            .iter()
            .map(|(op, count)| (op.as_str(), *count))
            .collect();
        snapshot.sort_by_key(|(name, _)| *name);
        snapshot
    }
}

impl Default for OpCounters {
    fn default() -> Self {
        Self::new()
    }
}
