//! HTTP-gateway adapter.
//!
//! Bridges the object API's account/container/object view onto the
//! filesystem: containers are top-level directories, objects are files
//! reached by path, and object metadata rides in the reserved
//! `middleware` stream. Listing walks the tree in lexicographic order;
//! PUT materializes missing parent directories atomically and may
//! displace an obstacle at the final position.

use serde::{Deserialize, Serialize};

use quayfs_dlm::{CallerId, LockGuard};
use quayfs_errors::{ErrorKind, FsError, Result};

use crate::metrics::FsOp;
use crate::mount::Mount;
use crate::resolve::rev_split_path;
use crate::types::{
    DirEntryInfo, InodeNumber, InodeType, UserContext, MAX_SYMLINKS, MIDDLEWARE_STREAM,
    POSIX_MODE_PERM,
};
use crate::volume::{CoalesceElement, CoalesceResult, ReadPlanStep};

/// One container in an account listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    /// Container name.
    pub basename: String,
}

/// One entry of a container listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEntry {
    /// Container-relative path of the entry.
    pub basename: String,
    /// File size in bytes (zero for directories).
    pub file_size: u64,
    /// Modification time, nanoseconds since the epoch.
    pub modification_time_ns: u64,
    /// Number of writes to the inode.
    pub num_writes: u64,
    /// Inode number.
    pub ino: InodeNumber,
    /// True when the entry is a directory.
    pub is_dir: bool,
}

/// A byte range of an object GET request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRange {
    /// Start offset.
    pub offset: u64,
    /// Number of bytes.
    pub length: u64,
}

/// Result of an object GET.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetObjectResponse {
    /// Size of the whole file in bytes.
    pub file_size: u64,
    /// Modification time, nanoseconds since the epoch.
    pub modification_time_ns: u64,
    /// Inode number.
    pub ino: InodeNumber,
    /// Number of writes to the inode.
    pub num_writes: u64,
    /// Middleware metadata bytes; empty when the stream is absent.
    pub metadata: Vec<u8>,
    /// Read plan covering the requested ranges (whole file when no
    /// ranges were given).
    pub read_plan: Vec<ReadPlanStep>,
}

/// Result of a HEAD request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadResponse {
    /// Modification time, nanoseconds since the epoch.
    pub modification_time_ns: u64,
    /// Size in bytes.
    pub file_size: u64,
    /// True when the entity is a directory.
    pub is_dir: bool,
    /// Inode number.
    pub ino: InodeNumber,
    /// Number of writes to the inode.
    pub num_writes: u64,
    /// Middleware metadata bytes; empty when the stream is absent.
    pub metadata: Vec<u8>,
}

/// Result of an object PUT completion.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutCompleteResponse {
    /// Modification time of the new file, nanoseconds since the epoch.
    pub modification_time_ns: u64,
    /// Inode number of the new file.
    pub ino: InodeNumber,
    /// Number of writes to the new file.
    pub num_writes: u64,
}

/// Splits a path into `(dir, base)` at the last slash. `None` when the
/// path has no directory part at all.
fn split_dir_and_file(path: &str) -> Option<(String, String)> {
    let index = path.rfind('/')?;
    Some((path[..index].to_string(), path[index + 1..].to_string()))
}

impl Mount {
    fn middleware_stream_or_empty(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        match self.volume.get_stream(ino, MIDDLEWARE_STREAM) {
            Ok(value) => Ok(value),
            // Entities made over SMB/FUSE have no middleware stream;
            // that reads as empty metadata, not an error.
            Err(err) if err.is(ErrorKind::StreamNotFound) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Lists up to `max_entries` containers (directories in the root)
    /// after `marker`. Files and symlinks in the root are not
    /// containers and are skipped. A marker past the last entry yields
    /// an empty listing.
    pub fn middleware_get_account(
        &self,
        max_entries: u64,
        marker: &str,
    ) -> Result<Vec<AccountEntry>> {
        let ctx = UserContext::root();
        let mut account_entries = Vec::new();
        let mut more = true;
        let mut last_basename = marker.to_string();

        while more && (account_entries.len() as u64) < max_entries {
            let remaining = max_entries - account_entries.len() as u64;
            let (entries, _, more_entries) =
                self.readdir(&ctx, InodeNumber::ROOT, &last_basename, remaining, 0)?;
            more = more_entries;
            if entries.is_empty() {
                break;
            }
            if let Some(tail) = entries.last() {
                last_basename = tail.basename.clone();
            }
            for entry in entries {
                if entry.basename == "." || entry.basename == ".." {
                    continue;
                }
                if entry.file_type == InodeType::Dir {
                    account_entries.push(AccountEntry {
                        basename: entry.basename,
                    });
                }
            }
        }

        self.count(FsOp::MwGetAccount);
        Ok(account_entries)
    }

    /// Lists a container's tree as a single lexicographically ordered
    /// stream of container-relative paths, honoring `marker` and
    /// `prefix` pagination.
    ///
    /// The container lock is held only long enough to resolve the
    /// root. A listing can take a long time; accepting concurrent PUTs
    /// while it runs is worth the small inconsistencies, which object
    /// API clients must tolerate anyway.
    pub fn middleware_get_container(
        &self,
        container_name: &str,
        max_entries: u64,
        marker: &str,
        prefix: &str,
    ) -> Result<Vec<ContainerEntry>> {
        let (container_ino, _, guard) = self.resolve_path_for_read(container_name, None)?;
        drop(guard);

        let mut out = Vec::new();
        self.container_walk("", container_ino, max_entries, marker, prefix, &mut out)?;

        self.count(FsOp::MwGetContainer);
        Ok(out)
    }

    /// Depth-first walk serving one directory level, recursing into
    /// subdirectories at the lexicographic position of their trailing
    /// slash. A directory `d` is descended only after any sibling such
    /// as `d-README`, because `/` sorts above `-`.
    fn container_walk(
        &self,
        dir_name: &str,
        dir_ino: InodeNumber,
        max_entries: u64,
        marker: &str,
        prefix: &str,
        out: &mut Vec<ContainerEntry>,
    ) -> Result<()> {
        let ctx = UserContext::root();
        let mut pending: std::collections::VecDeque<DirEntryInfo> = Default::default();
        let mut descents: std::collections::VecDeque<(String, InodeNumber)> = Default::default();
        let mut more = true;
        let mut last_basename = String::new();

        while (more || !pending.is_empty() || !descents.is_empty())
            && (out.len() as u64) < max_entries
        {
            if more && pending.is_empty() {
                let remaining = max_entries - out.len() as u64;
                let (entries, _, more_entries) =
                    self.readdir(&ctx, dir_ino, &last_basename, remaining, 0)?;
                more = more_entries;
                if let Some(tail) = entries.last() {
                    last_basename = tail.basename.clone();
                }
                pending.extend(entries);
            }

            if let Some(front) = pending.front() {
                if front.basename == "." || front.basename == ".." {
                    pending.pop_front();
                    continue;
                }
            }

            // Serve queued descents that sort before the next sibling.
            loop {
                let descend = match descents.front() {
                    Some((descent_name, _)) => match pending.front() {
                        Some(next) => {
                            let next_full = format!("{}{}", dir_name, next.basename);
                            *descent_name < next_full
                        }
                        None => true,
                    },
                    None => false,
                };
                if !descend {
                    break;
                }
                let (descent_name, descent_ino) = match descents.pop_front() {
                    Some(descent) => descent,
                    None => break,
                };
                self.container_walk(&descent_name, descent_ino, max_entries, marker, prefix, out)?;
                if out.len() as u64 >= max_entries {
                    return Ok(());
                }
            }

            let entry = match pending.pop_front() {
                Some(entry) => entry,
                None => continue,
            };
            let file_name = format!("{}{}", dir_name, entry.basename);

            // Entries arrive in order, so the first name beyond the
            // prefix that does not extend it ends this whole level.
            if file_name.as_str() > prefix && !file_name.starts_with(prefix) {
                return Ok(());
            }

            // Marker pruning before any stat: skip anything at or below
            // the marker unless the marker is inside its subtree.
            if file_name.as_str() <= marker && !marker.starts_with(&file_name) {
                continue;
            }

            let stat = self.getstat(&ctx, entry.ino)?;
            match stat.file_type {
                InodeType::File | InodeType::Symlink => {
                    if file_name.as_str() <= marker || !file_name.starts_with(prefix) {
                        continue;
                    }
                    out.push(ContainerEntry {
                        basename: file_name,
                        file_size: stat.size,
                        modification_time_ns: stat.mtime_ns,
                        num_writes: stat.num_writes,
                        ino: entry.ino,
                        is_dir: false,
                    });
                }
                InodeType::Dir => {
                    if !file_name.starts_with(prefix) && !prefix.starts_with(&file_name) {
                        continue;
                    }
                    if file_name.as_str() > marker && file_name.starts_with(prefix) {
                        out.push(ContainerEntry {
                            basename: file_name.clone(),
                            file_size: 0,
                            modification_time_ns: stat.mtime_ns,
                            num_writes: stat.num_writes,
                            ino: entry.ino,
                            is_dir: true,
                        });
                    }
                    descents.push_back((format!("{}/", file_name), entry.ino));
                }
            }
        }

        Ok(())
    }

    /// Resolves an object for read and returns its size, times, the
    /// middleware metadata, and a read plan. An empty `read_ranges`
    /// means the whole file.
    pub fn middleware_get_object(
        &self,
        object_path: &str,
        read_ranges: &[ReadRange],
    ) -> Result<GetObjectResponse> {
        let (ino, inode_type, _guard) = self.resolve_path_for_read(object_path, None)?;

        if inode_type == InodeType::Dir {
            return Err(FsError::is_dir(format!(
                "'{}' is a directory",
                object_path
            )));
        }

        let metadata = self.volume.get_metadata(ino)?;

        let mut read_plan = Vec::new();
        if read_ranges.is_empty() {
            read_plan.extend(self.volume.get_read_plan(ino, 0, metadata.size)?);
        } else {
            for range in read_ranges {
                read_plan.extend(self.volume.get_read_plan(ino, range.offset, range.length)?);
            }
        }

        let stream = self.middleware_stream_or_empty(ino)?;

        self.count(FsOp::MwGetObject);
        Ok(GetObjectResponse {
            file_size: metadata.size,
            modification_time_ns: metadata.modification_time_ns,
            ino,
            num_writes: metadata.num_writes,
            metadata: stream,
            read_plan,
        })
    }

    /// Resolves an entity (container, directory, or object) and
    /// returns its head data.
    pub fn middleware_head_response(&self, entity_path: &str) -> Result<HeadResponse> {
        let caller = CallerId::generate();
        let (ino, inode_type, _guard) = self.resolve_path_for_read(entity_path, Some(caller))?;

        let stat = self.getstat_locked(ino, caller)?;
        let stream = self.middleware_stream_or_empty(ino)?;

        self.count(FsOp::MwHead);
        Ok(HeadResponse {
            modification_time_ns: stat.mtime_ns,
            file_size: stat.size,
            is_dir: inode_type == InodeType::Dir,
            ino,
            num_writes: stat.num_writes,
            metadata: stream,
        })
    }

    /// Replaces the middleware metadata of `base_name` under
    /// `parent_dir`, but only if the current metadata byte-equals
    /// `old_metadata`; otherwise `TryAgain` so the caller can re-read
    /// and retry. An absent stream compares as empty.
    pub fn middleware_post(
        &self,
        parent_dir: &str,
        base_name: &str,
        new_metadata: &[u8],
        old_metadata: &[u8],
    ) -> Result<()> {
        let full_path = format!("{}/{}", parent_dir, base_name);
        let (ino, _, _guard) = self.resolve_path_for_write(&full_path, None)?;

        let existing = self.middleware_stream_or_empty(ino)?;
        if existing != old_metadata {
            return Err(FsError::try_again(format!(
                "metadata differs: current {} bytes, caller expected {} bytes",
                existing.len(),
                old_metadata.len()
            )));
        }

        self.volume.put_stream(ino, MIDDLEWARE_STREAM, new_metadata)?;
        self.count(FsOp::MwPost);
        Ok(())
    }

    /// Creates the container if absent (installing `new_metadata`), or
    /// compare-and-swaps its metadata against `old_metadata`.
    ///
    /// The root write lock is heavy, but a new container means a new
    /// root directory entry, so there is no way around it.
    pub fn middleware_put_container(
        &self,
        container_name: &str,
        old_metadata: &[u8],
        new_metadata: &[u8],
    ) -> Result<()> {
        let root_handle = self.inode_lock(InodeNumber::ROOT, None);
        let _root_guard = root_handle.write_lock();

        let container_ino = match self.volume.lookup(InodeNumber::ROOT, container_name) {
            Ok(ino) => ino,
            Err(err) if err.is(ErrorKind::NotFound) => {
                let new_dir = self.volume.create_dir(POSIX_MODE_PERM, 0, 0)?;
                let dir_handle = self.inode_lock(new_dir, None);
                let _dir_guard = dir_handle.write_lock();

                if let Err(err) = self.volume.put_stream(new_dir, MIDDLEWARE_STREAM, new_metadata)
                {
                    self.destroy_orphan(new_dir, "put_container");
                    return Err(err);
                }
                if let Err(err) = self.volume.link(InodeNumber::ROOT, container_name, new_dir) {
                    self.destroy_orphan(new_dir, "put_container");
                    return Err(err);
                }

                self.count(FsOp::MwPutContainer);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let container_handle = self.inode_lock(container_ino, None);
        let _container_guard = container_handle.write_lock();

        let existing = self.middleware_stream_or_empty(container_ino)?;
        if existing != old_metadata {
            return Err(FsError::try_again(format!(
                "metadata differs: current {} bytes, caller expected {} bytes",
                existing.len(),
                old_metadata.len()
            )));
        }

        self.volume
            .put_stream(container_ino, MIDDLEWARE_STREAM, new_metadata)?;
        self.count(FsOp::MwPutContainer);
        Ok(())
    }

    /// Atomically installs a completed object PUT as a file at
    /// `object_path` within `container_name`.
    ///
    /// The deepest existing directory is found by walking down with
    /// lock coupling (each child locked before its parent is released,
    /// so nothing can be slipped in between), following symlinks under
    /// the usual budget. Missing directories are built bottom-up from
    /// unlinked inodes and become visible in one final link. An
    /// existing entry at the final position is displaced first and
    /// destroyed after the new file is linked; if the final link
    /// fails, the displaced entry is relinked.
    pub fn middleware_put_complete(
        &self,
        container_name: &str,
        object_path: &str,
        object_paths: &[String],
        object_lengths: &[u64],
        object_metadata: &[u8],
    ) -> Result<PutCompleteResponse> {
        if object_paths.len() != object_lengths.len() {
            return Err(FsError::invalid_argument(format!(
                "segment path count {} does not match length count {}",
                object_paths.len(),
                object_lengths.len()
            )));
        }

        let ctx = UserContext::root();
        let container_ino = self.lookup(&ctx, InodeNumber::ROOT, container_name)?;

        let mut dirs = rev_split_path(object_path);
        if dirs.is_empty() {
            return Err(FsError::invalid_argument("empty object path"));
        }
        let base_name = dirs.remove(0);

        let caller = CallerId::generate();
        let mut dir_ino = container_ino;
        let mut dir_guard: Option<LockGuard> =
            Some(self.inode_lock(dir_ino, Some(caller)).write_lock());
        let mut follows_remaining = MAX_SYMLINKS;

        // Walk down to the deepest existing directory, locking as we
        // go so nobody can sneak a conflicting entry in ahead of us.
        while let Some(this_dir) = dirs.last().cloned() {
            if this_dir == "." {
                dirs.pop();
                continue;
            }

            let entry_ino = match self.volume.lookup(dir_ino, &this_dir) {
                Ok(ino) => ino,
                // Time to start making directories; the current lock
                // stays held.
                Err(err) if err.is(ErrorKind::NotFound) => break,
                Err(err) => return Err(err),
            };
            dirs.pop();

            let entry_handle = self.inode_lock(entry_ino, Some(caller));
            let entry_guard = entry_handle.write_lock();
            let entry_type = self.volume.get_type(entry_ino)?;

            match entry_type {
                InodeType::File => {
                    return Err(FsError::not_dir(format!(
                        "'{}' is a file, not a directory",
                        this_dir
                    )));
                }
                InodeType::Symlink => {
                    if follows_remaining == 0 {
                        return Err(FsError::too_many_symlinks(format!(
                            "too many symlinks while resolving {}",
                            object_path
                        )));
                    }
                    follows_remaining -= 1;

                    let target = self.volume.get_symlink(entry_ino);
                    drop(entry_guard);
                    let target = target?;

                    if target.starts_with('/') {
                        // Absolute symlink: restart from the root,
                        // releasing the current lock first.
                        drop(dir_guard.take());
                        dir_ino = InodeNumber::ROOT;
                        dir_guard = Some(self.inode_lock(dir_ino, Some(caller)).write_lock());
                    }
                    dirs.extend(rev_split_path(&target));
                }
                InodeType::Dir => {
                    // The child is locked; only now may the parent's
                    // lock go.
                    dir_ino = entry_ino;
                    dir_guard = Some(entry_guard);
                }
            }
        }
        // The walk's terminal lock protects the link of the new chain.
        let _dir_guard = dir_guard;

        let mut created: Vec<InodeNumber> = Vec::new();
        let result = self.put_complete_commit(
            dir_ino,
            &dirs,
            &base_name,
            object_paths,
            object_lengths,
            object_metadata,
            caller,
            &mut created,
        );
        match result {
            Ok(response) => {
                self.count(FsOp::MwPutComplete);
                Ok(response)
            }
            Err(err) => {
                for ino in created {
                    self.destroy_orphan(ino, "put_complete");
                }
                Err(err)
            }
        }
    }

    /// The mutation half of PUT completion, run under the held lock on
    /// the deepest existing directory. Inodes created here are pushed
    /// onto `created` until the final link makes them reachable.
    #[allow(clippy::too_many_arguments)]
    fn put_complete_commit(
        &self,
        dir_ino: InodeNumber,
        dirs: &[String],
        base_name: &str,
        object_paths: &[String],
        object_lengths: &[u64],
        object_metadata: &[u8],
        caller: CallerId,
        created: &mut Vec<InodeNumber>,
    ) -> Result<PutCompleteResponse> {
        // Reify the object into a file: a fresh empty inode bound to
        // the log segments the object server already wrote.
        let file_ino = self.volume.create_file(POSIX_MODE_PERM, 0, 0)?;
        created.push(file_ino);

        let mut file_offset: u64 = 0;
        for (index, object_path) in object_paths.iter().enumerate() {
            self.volume.wrote(
                file_ino,
                file_offset,
                object_path,
                0,
                object_lengths[index],
                index > 0,
            )?;
            file_offset += object_lengths[index];
        }

        self.volume
            .put_stream(file_ino, MIDDLEWARE_STREAM, object_metadata)?;

        // Build any missing directories bottom-up. Nothing here is
        // reachable until the final link below.
        let mut top_ino = file_ino;
        let mut top_name = base_name.to_string();
        for dir_name in dirs {
            let new_dir = self.volume.create_dir(POSIX_MODE_PERM, 0, 0)?;
            created.push(new_dir);
            self.volume.link(new_dir, &top_name, top_ino)?;
            top_ino = new_dir;
            top_name = dir_name.clone();
        }

        // An obstacle can only exist when every directory already did;
        // a directory we just created is empty by construction.
        let mut obstacle: Option<(InodeNumber, LockGuard)> = None;
        if dirs.is_empty() {
            match self.volume.lookup(dir_ino, base_name) {
                Err(err) if err.is(ErrorKind::NotFound) => {}
                Err(err) => return Err(err),
                Ok(obstacle_ino) => {
                    let obstacle_handle = self.inode_lock(obstacle_ino, Some(caller));
                    let obstacle_guard = obstacle_handle.write_lock();
                    self.remove_obstacle(caller, dir_ino, base_name, obstacle_ino)?;
                    // Unlinked but not destroyed: destruction waits
                    // until the replacement is linked in.
                    obstacle = Some((obstacle_ino, obstacle_guard));
                }
            }
        }

        if let Err(err) = self.volume.link(dir_ino, &top_name, top_ino) {
            tracing::error!(
                dir = dir_ino.as_u64(),
                name = %top_name,
                %err,
                "final link of object PUT failed"
            );
            if let Some((obstacle_ino, _)) = &obstacle {
                if let Err(relink_err) = self.volume.link(dir_ino, base_name, *obstacle_ino) {
                    tracing::error!(
                        ino = obstacle_ino.as_u64(),
                        %relink_err,
                        "relink of displaced entry failed"
                    );
                }
            }
            return Err(err);
        }
        // Everything created is reachable now.
        created.clear();

        if let Some((obstacle_ino, _obstacle_guard)) = obstacle {
            if let Err(err) = self.volume.destroy(obstacle_ino) {
                tracing::error!(
                    ino = obstacle_ino.as_u64(),
                    %err,
                    "error destroying displaced inode"
                );
            }
        }

        let metadata = self.volume.get_metadata(file_ino)?;
        Ok(PutCompleteResponse {
            modification_time_ns: metadata.modification_time_ns,
            ino: file_ino,
            num_writes: metadata.num_writes,
        })
    }

    /// Unlinks, but does not destroy, the entry standing where an
    /// object PUT wants to link. Files and symlinks always unlink;
    /// directories only when empty. The caller holds the locks.
    fn remove_obstacle(
        &self,
        caller: CallerId,
        dir_ino: InodeNumber,
        obstacle_name: &str,
        obstacle_ino: InodeNumber,
    ) -> Result<()> {
        let stat = self.getstat_locked(obstacle_ino, caller)?;
        match stat.file_type {
            InodeType::File | InodeType::Symlink => {
                self.volume.unlink(dir_ino, obstacle_name)
            }
            InodeType::Dir => {
                // A linked, user-visible directory has at least "."
                // and ".."; a third entry makes it non-empty.
                if self.volume.num_dir_entries(obstacle_ino)? >= 3 {
                    return Err(FsError::is_dir(format!(
                        "'{}' is a non-empty directory",
                        obstacle_name
                    )));
                }
                // Locks are held and emptiness is checked; skip
                // rmdir's re-validation and unlink directly.
                self.volume.unlink(dir_ino, obstacle_name)
            }
        }
    }

    /// Merges the files at `element_paths`, in order, into a new file
    /// at `dest_path`, unlinking the elements.
    ///
    /// Element paths may traverse symlinks, so no lock order can be
    /// derived from them; instead the root write lock serializes all
    /// coalesce calls. The call is rare enough that the heavy lock
    /// does not hurt.
    pub fn middleware_coalesce(
        &self,
        dest_path: &str,
        element_paths: &[String],
    ) -> Result<CoalesceResult> {
        let mut element_names = Vec::with_capacity(element_paths.len());
        for path in element_paths {
            let (dir_name, file_name) = split_dir_and_file(path).ok_or_else(|| {
                FsError::invalid_argument("files to coalesce must not be in the root directory")
            })?;
            element_names.push((dir_name, file_name));
        }
        let (dest_dir_name, dest_file_name) = split_dir_and_file(dest_path).ok_or_else(|| {
            FsError::invalid_argument("coalesce target must not be in the root directory")
        })?;

        // A lock per element dir and file, plus the destination dir
        // and the root.
        let mut held_locks: Vec<LockGuard> = Vec::with_capacity(2 * element_paths.len() + 2);
        let caller = CallerId::generate();

        held_locks.push(self.inode_lock(InodeNumber::ROOT, Some(caller)).write_lock());

        let (dest_dir_ino, dest_dir_type, dest_guard) =
            self.resolve_path_for_write(&dest_dir_name, Some(caller))?;
        if let Some(guard) = dest_guard {
            held_locks.push(guard);
        }
        if dest_dir_type != InodeType::Dir {
            return Err(FsError::not_dir(format!(
                "'{}' is not a directory",
                dest_dir_name
            )));
        }

        let mut elements = Vec::with_capacity(element_names.len());
        for (dir_name, file_name) in &element_names {
            let (dir_ino, dir_type, dir_guard) =
                self.resolve_path_for_write(dir_name, Some(caller))?;
            if let Some(guard) = dir_guard {
                held_locks.push(guard);
            }
            if dir_type != InodeType::Dir {
                return Err(FsError::not_dir(format!("'{}' is not a directory", dir_name)));
            }

            let file_ino = self.volume.lookup(dir_ino, file_name)?;
            let file_handle = self.inode_lock(file_ino, Some(caller));
            // The same file may appear as more than one element; it is
            // already locked then.
            if !file_handle.is_write_held() {
                held_locks.push(file_handle.write_lock());
            }

            let metadata = self.volume.get_metadata(file_ino)?;
            if metadata.inode_type != InodeType::File {
                return Err(FsError::not_file(format!(
                    "'{}/{}' is not an ordinary file",
                    dir_name, file_name
                )));
            }

            elements.push(CoalesceElement {
                containing_dir: dir_ino,
                ino: file_ino,
                name: file_name.clone(),
            });
        }

        let result = self
            .volume
            .coalesce(dest_dir_ino, &dest_file_name, &elements)?;

        self.count(FsOp::MwCoalesce);
        Ok(result)
    }

    /// Deletes `base_name` under `parent_dir`: directories must be
    /// empty; a file is destroyed when this was its last link.
    pub fn middleware_delete(&self, parent_dir: &str, base_name: &str) -> Result<()> {
        let caller = CallerId::generate();
        let (parent_ino, parent_type, _parent_guard) =
            self.resolve_path_for_write(parent_dir, Some(caller))?;
        if parent_type != InodeType::Dir {
            return Err(FsError::not_dir(format!("'{}' is a file", parent_dir)));
        }

        let base_ino = self.volume.lookup(parent_ino, base_name)?;
        let base_handle = self.inode_lock(base_ino, Some(caller));
        let _base_guard = base_handle.write_lock();

        let base_type = self.volume.get_type(base_ino)?;
        let do_destroy = if base_type == InodeType::Dir {
            // Link count of an empty directory is 2 ("." and ".."),
            // since directories cannot be hard-linked.
            if self.volume.num_dir_entries(base_ino)? != 2 {
                return Err(FsError::not_empty("directory not empty"));
            }
            true
        } else {
            self.volume.get_link_count(base_ino)? == 1
        };

        self.volume.unlink(parent_ino, base_name)?;
        if do_destroy {
            self.volume.destroy(base_ino)?;
        }

        self.count(FsOp::MwDelete);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::memvol::MemoryVolumeProvider;
    use crate::mount::{MountOptions, MountRegistry};
    use crate::volume::VolumeHandle;

    fn make_mount() -> (Arc<crate::memvol::MemoryVolume>, Arc<Mount>) {
        let provider = Arc::new(MemoryVolumeProvider::new());
        let volume = provider.create_volume("vol");
        let registry = MountRegistry::new(provider);
        let mount = registry.mount("vol", MountOptions::default()).unwrap();
        (volume, mount)
    }

    #[test]
    fn test_split_dir_and_file() {
        assert_eq!(
            split_dir_and_file("c/a.txt"),
            Some(("c".to_string(), "a.txt".to_string()))
        );
        assert_eq!(
            split_dir_and_file("/c/d/a.txt"),
            Some(("/c/d".to_string(), "a.txt".to_string()))
        );
        assert_eq!(split_dir_and_file("a.txt"), None);
    }

    #[test]
    fn test_put_container_create_then_cas() {
        let (_volume, mount) = make_mount();

        mount.middleware_put_container("c", &[], &[1, 2, 3]).unwrap();
        let head = mount.middleware_head_response("c").unwrap();
        assert!(head.is_dir);
        assert_eq!(head.metadata, vec![1, 2, 3]);

        mount
            .middleware_put_container("c", &[1, 2, 3], &[9])
            .unwrap();
        let head = mount.middleware_head_response("c").unwrap();
        assert_eq!(head.metadata, vec![9]);

        match mount.middleware_put_container("c", &[1, 2, 3], &[7]) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::TryAgain),
            other => panic!("expected TryAgain, got {:?}", other),
        }
    }

    #[test]
    fn test_post_compare_and_swap() {
        let (_volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();
        mount
            .middleware_put_complete("c", "obj", &["seg-1".to_string()], &[3], b"v1")
            .unwrap();

        mount.middleware_post("c", "obj", b"v2", b"v1").unwrap();

        match mount.middleware_post("c", "obj", b"v3", b"v1") {
            Err(err) => assert_eq!(err.kind(), ErrorKind::TryAgain),
            other => panic!("expected TryAgain, got {:?}", other),
        }

        let head = mount.middleware_head_response("c/obj").unwrap();
        assert_eq!(head.metadata, b"v2");
    }

    #[test]
    fn test_put_complete_materializes_directories() {
        let (volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();

        let response = mount
            .middleware_put_complete(
                "c",
                "a/b/c.bin",
                &["seg-1".to_string(), "seg-2".to_string()],
                &[10, 7],
                b"meta",
            )
            .unwrap();
        assert_eq!(response.num_writes, 2);

        let object = mount.middleware_get_object("c/a/b/c.bin", &[]).unwrap();
        assert_eq!(object.file_size, 17);
        assert_eq!(object.metadata, b"meta");
        assert_eq!(object.read_plan.len(), 2);
        assert_eq!(object.read_plan[0].object_path, "seg-1");

        // The intermediate directories are real, linked directories.
        let container = volume.lookup(InodeNumber::ROOT, "c").unwrap();
        let dir_a = volume.lookup(container, "a").unwrap();
        assert_eq!(volume.get_type(dir_a).unwrap(), InodeType::Dir);
        let dir_b = volume.lookup(dir_a, "b").unwrap();
        assert_eq!(volume.get_type(dir_b).unwrap(), InodeType::Dir);
        assert_eq!(volume.lookup(dir_b, "c.bin").unwrap(), response.ino);
    }

    #[test]
    fn test_put_complete_displaces_obstacle() {
        let (volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();

        let first = mount
            .middleware_put_complete("c", "obj", &["seg-1".to_string()], &[5], b"one")
            .unwrap();
        let second = mount
            .middleware_put_complete("c", "obj", &["seg-2".to_string()], &[9], b"two")
            .unwrap();
        assert_ne!(first.ino, second.ino);

        let object = mount.middleware_get_object("c/obj", &[]).unwrap();
        assert_eq!(object.file_size, 9);
        assert_eq!(object.metadata, b"two");
        // The displaced inode is gone.
        assert!(volume.get_type(first.ino).is_err());
    }

    #[test]
    fn test_put_complete_nonempty_dir_obstacle() {
        let (_volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();
        mount
            .middleware_put_complete("c", "d/f", &["seg-1".to_string()], &[1], b"")
            .unwrap();

        // "d" is a non-empty directory standing where the object wants
        // to land.
        match mount.middleware_put_complete("c", "d", &["seg-2".to_string()], &[1], b"") {
            Err(err) => assert_eq!(err.kind(), ErrorKind::IsDir),
            other => panic!("expected IsDir, got {:?}", other),
        }
    }

    #[test]
    fn test_get_account_lists_only_directories() {
        let (volume, mount) = make_mount();
        mount.middleware_put_container("beta", &[], &[]).unwrap();
        mount.middleware_put_container("alpha", &[], &[]).unwrap();
        let stray = volume.create_file(0o644, 0, 0).unwrap();
        volume.link(InodeNumber::ROOT, "stray.txt", stray).unwrap();

        let listing = mount.middleware_get_account(100, "").unwrap();
        let names: Vec<&str> = listing.iter().map(|e| e.basename.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        let after = mount.middleware_get_account(100, "alpha").unwrap();
        let names: Vec<&str> = after.iter().map(|e| e.basename.as_str()).collect();
        assert_eq!(names, vec!["beta"]);

        // A marker past the last entry is an empty listing, not an
        // error.
        let empty = mount.middleware_get_account(100, "zzz").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_get_container_readme_ordering() {
        let (_volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();
        mount
            .middleware_put_complete("c", "d/f", &["seg-1".to_string()], &[1], b"")
            .unwrap();
        mount
            .middleware_put_complete("c", "d-README", &["seg-2".to_string()], &[2], b"")
            .unwrap();

        let listing = mount.middleware_get_container("c", 100, "", "").unwrap();
        let names: Vec<&str> = listing.iter().map(|e| e.basename.as_str()).collect();
        assert_eq!(names, vec!["d", "d-README", "d/f"]);
        assert!(listing[0].is_dir);
        assert!(!listing[1].is_dir);
        assert!(!listing[2].is_dir);
    }

    #[test]
    fn test_get_container_marker_and_prefix() {
        let (_volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();
        for name in ["a", "b/x", "b/y", "z"] {
            mount
                .middleware_put_complete("c", name, &["seg".to_string()], &[1], b"")
                .unwrap();
        }

        let listing = mount.middleware_get_container("c", 100, "b/x", "").unwrap();
        let names: Vec<&str> = listing.iter().map(|e| e.basename.as_str()).collect();
        assert_eq!(names, vec!["b/y", "z"]);

        let listing = mount.middleware_get_container("c", 100, "", "b/").unwrap();
        let names: Vec<&str> = listing.iter().map(|e| e.basename.as_str()).collect();
        assert_eq!(names, vec!["b/x", "b/y"]);

        let listing = mount.middleware_get_container("c", 2, "", "").unwrap();
        assert_eq!(listing.len(), 2);
    }

    #[test]
    fn test_coalesce_concatenates_and_unlinks() {
        let (volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();
        mount
            .middleware_put_complete("c", "p1", &["seg-1".to_string()], &[10], b"")
            .unwrap();
        mount
            .middleware_put_complete("c", "p2", &["seg-2".to_string()], &[4], b"")
            .unwrap();

        let result = mount
            .middleware_coalesce("c/all", &["c/p1".to_string(), "c/p2".to_string()])
            .unwrap();
        assert_eq!(result.num_writes, 2);

        let object = mount.middleware_get_object("c/all", &[]).unwrap();
        assert_eq!(object.file_size, 14);
        assert_eq!(object.read_plan.len(), 2);
        assert_eq!(object.read_plan[1].object_path, "seg-2");

        let container = volume.lookup(InodeNumber::ROOT, "c").unwrap();
        assert!(volume.lookup(container, "p1").is_err());
        assert!(volume.lookup(container, "p2").is_err());
    }

    #[test]
    fn test_coalesce_rejects_root_elements() {
        let (_volume, mount) = make_mount();
        match mount.middleware_coalesce("c/all", &["p1".to_string()]) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidArgument),
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
    }

    #[test]
    fn test_delete_file_and_directory() {
        let (volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();
        mount
            .middleware_put_complete("c", "d/f", &["seg".to_string()], &[1], b"")
            .unwrap();

        // Non-empty directory refuses.
        match mount.middleware_delete("c", "d") {
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotEmpty),
            other => panic!("expected NotEmpty, got {:?}", other),
        }

        mount.middleware_delete("c/d", "f").unwrap();
        mount.middleware_delete("c", "d").unwrap();

        let container = volume.lookup(InodeNumber::ROOT, "c").unwrap();
        assert!(volume.lookup(container, "d").is_err());
    }

    #[test]
    fn test_get_object_rejects_directory() {
        let (_volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();
        match mount.middleware_get_object("c", &[]) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::IsDir),
            other => panic!("expected IsDir, got {:?}", other),
        }
    }

    #[test]
    fn test_get_object_with_ranges() {
        let (_volume, mount) = make_mount();
        mount.middleware_put_container("c", &[], &[]).unwrap();
        mount
            .middleware_put_complete("c", "obj", &["seg-1".to_string()], &[100], b"")
            .unwrap();

        let ranges = [
            ReadRange {
                offset: 0,
                length: 10,
            },
            ReadRange {
                offset: 50,
                length: 20,
            },
        ];
        let object = mount.middleware_get_object("c/obj", &ranges).unwrap();
        assert_eq!(object.read_plan.len(), 2);
        assert_eq!(object.read_plan[0].length, 10);
        assert_eq!(object.read_plan[1].offset, 50);
        assert_eq!(object.read_plan[1].length, 20);
    }

    #[test]
    fn test_head_missing_stream_is_empty() {
        let (volume, mount) = make_mount();
        let dir = volume.create_dir(0o755, 0, 0).unwrap();
        volume.link(InodeNumber::ROOT, "plain", dir).unwrap();

        let head = mount.middleware_head_response("plain").unwrap();
        assert!(head.is_dir);
        assert!(head.metadata.is_empty());
    }
}
