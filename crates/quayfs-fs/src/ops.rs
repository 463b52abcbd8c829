//! The POSIX operation set.
//!
//! Every operation that takes an existing inode follows the same
//! preamble: build a lock handle for the inode, acquire it (write for
//! mutating ops, read for observing ops), run the access checks, then
//! call the collaborator primitive. Guards release the locks on every
//! exit path. Creation ops build the new inode before locking the
//! parent and destroy the orphan if any later step fails.

use quayfs_dlm::{CallerId, HeldType};
use quayfs_errors::{FsError, Result};

use crate::flock::{FlockCommand, FlockRequest, FlockType};
use crate::metrics::FsOp;
use crate::mount::Mount;
use crate::profiler::Profiler;
use crate::resolve::{validate_base_name, validate_full_path};
use crate::types::{
    AccessMode, DirEntryInfo, InodeNumber, InodeType, SetstatRequest, Stat, StatVfs, UserContext,
    FILE_NAME_MAX, POSIX_MODE_PERM, XATTR_CREATE, XATTR_REPLACE,
};

impl Mount {
    /// Checks existence (`F_OK`) then the operation-specific mask.
    /// Missing `F_OK` is `NotFound`; a failed mask is
    /// `PermissionDenied`.
    pub(crate) fn check_access(
        &self,
        ino: InodeNumber,
        ctx: &UserContext,
        mask: AccessMode,
    ) -> Result<()> {
        if !self
            .volume
            .access(ino, ctx.uid, ctx.gid, &ctx.other_gids, AccessMode::F_OK)
        {
            return Err(FsError::not_found("ENOENT"));
        }
        if mask.0 != AccessMode::F_OK.0
            && !self.volume.access(ino, ctx.uid, ctx.gid, &ctx.other_gids, mask)
        {
            return Err(FsError::permission_denied("EACCES"));
        }
        Ok(())
    }

    pub(crate) fn destroy_orphan(&self, ino: InodeNumber, op: &'static str) {
        if let Err(err) = self.volume.destroy(ino) {
            tracing::warn!(
                ino = ino.as_u64(),
                %err,
                op,
                "couldn't destroy orphaned inode after failed step"
            );
        }
    }

    /// Delegates the access check to the collaborator.
    pub fn access(&self, ctx: &UserContext, ino: InodeNumber, mode: AccessMode) -> bool {
        let allowed = self
            .volume
            .access(ino, ctx.uid, ctx.gid, &ctx.other_gids, mode);
        self.count(FsOp::Access);
        allowed
    }

    /// Creates a file in `parent` under `basename`.
    pub fn create(
        &self,
        ctx: &UserContext,
        parent: InodeNumber,
        basename: &str,
        mode: u32,
    ) -> Result<InodeNumber> {
        validate_base_name(basename)?;

        // Create before taking the parent lock; the inode is invisible
        // until linked.
        let file = self.volume.create_file(mode, ctx.uid, ctx.gid)?;

        let handle = self.inode_lock(parent, None);
        let _guard = handle.write_lock();

        if let Err(err) = self.check_access(parent, ctx, AccessMode::W_OK | AccessMode::X_OK) {
            self.destroy_orphan(file, "create");
            return Err(err);
        }
        if let Err(err) = self.volume.link(parent, basename, file) {
            self.destroy_orphan(file, "create");
            return Err(err);
        }

        self.count(FsOp::Create);
        Ok(file)
    }

    /// Creates a directory in `parent` under `basename`.
    pub fn mkdir(
        &self,
        ctx: &UserContext,
        parent: InodeNumber,
        basename: &str,
        mode: u32,
    ) -> Result<InodeNumber> {
        validate_base_name(basename)?;

        let dir = self.volume.create_dir(mode, ctx.uid, ctx.gid)?;

        let handle = self.inode_lock(parent, None);
        let _guard = handle.write_lock();

        if let Err(err) = self.check_access(parent, ctx, AccessMode::W_OK | AccessMode::X_OK) {
            self.destroy_orphan(dir, "mkdir");
            return Err(err);
        }
        if let Err(err) = self.volume.link(parent, basename, dir) {
            self.destroy_orphan(dir, "mkdir");
            return Err(err);
        }

        self.count(FsOp::Mkdir);
        Ok(dir)
    }

    /// Creates a symlink to `target` in `parent` under `basename`.
    /// Symlink mode is always rwxrwxrwx.
    pub fn symlink(
        &self,
        ctx: &UserContext,
        parent: InodeNumber,
        basename: &str,
        target: &str,
    ) -> Result<InodeNumber> {
        validate_base_name(basename)?;
        validate_full_path(target)?;

        let link = self
            .volume
            .create_symlink(target, POSIX_MODE_PERM, ctx.uid, ctx.gid)?;

        let handle = self.inode_lock(parent, None);
        let _guard = handle.write_lock();

        if let Err(err) = self.check_access(parent, ctx, AccessMode::W_OK | AccessMode::X_OK) {
            self.destroy_orphan(link, "symlink");
            return Err(err);
        }
        if let Err(err) = self.volume.link(parent, basename, link) {
            self.destroy_orphan(link, "symlink");
            return Err(err);
        }

        self.count(FsOp::Symlink);
        Ok(link)
    }

    /// Creates a hard link to `target` in `dir` under `basename`.
    /// Directories cannot be hard-linked.
    pub fn link(
        &self,
        ctx: &UserContext,
        dir: InodeNumber,
        basename: &str,
        target: InodeNumber,
    ) -> Result<()> {
        // Both locks under one caller so the link-count update and the
        // directory entry land together.
        let caller = CallerId::generate();
        let dir_handle = self.inode_lock(dir, Some(caller));
        let target_handle = self.inode_lock(target, Some(caller));

        let _dir_guard = dir_handle.write_lock();
        let _target_guard = target_handle.write_lock();

        let target_type = self.volume.get_type(target)?;
        if target_type == InodeType::Dir {
            let err = FsError::link_dir(format!("inode {} cannot be a dir inode", target));
            tracing::error!(target = target.as_u64(), %err, "link rejected");
            return Err(err);
        }

        self.check_access(dir, ctx, AccessMode::F_OK)?;
        self.check_access(target, ctx, AccessMode::F_OK)?;
        self.check_access(dir, ctx, AccessMode::W_OK | AccessMode::X_OK)?;
        self.check_access(target, ctx, AccessMode::W_OK)?;

        self.volume.link(dir, basename, target)?;
        self.count(FsOp::Link);
        Ok(())
    }

    /// Unlinks `basename` from `dir`, destroying the inode when its
    /// last link goes away. Directories are rejected; use
    /// [`Mount::rmdir`].
    pub fn unlink(&self, ctx: &UserContext, dir: InodeNumber, basename: &str) -> Result<()> {
        let caller = CallerId::generate();
        let handle = self.inode_lock(dir, Some(caller));
        let _guard = handle.write_lock();

        self.check_access(dir, ctx, AccessMode::W_OK | AccessMode::X_OK)?;

        let child = self.volume.lookup(dir, basename)?;
        let child_handle = self.inode_lock(child, Some(caller));
        let _child_guard = child_handle.write_lock();

        let child_type = self.volume.get_type(child)?;
        if child_type == InodeType::Dir {
            return Err(FsError::is_dir("unlink called on a directory"));
        }

        self.volume.unlink(dir, basename)?;

        if self.volume.get_link_count(child)? == 0 {
            self.volume.destroy(child)?;
        }

        self.count(FsOp::Unlink);
        Ok(())
    }

    /// Removes the empty directory `basename` from `dir`.
    pub fn rmdir(&self, ctx: &UserContext, dir: InodeNumber, basename: &str) -> Result<()> {
        let caller = CallerId::generate();
        let handle = self.inode_lock(dir, Some(caller));
        let _guard = handle.write_lock();

        self.check_access(dir, ctx, AccessMode::W_OK | AccessMode::X_OK)?;

        let child = self.volume.lookup(dir, basename)?;
        let child_handle = self.inode_lock(child, Some(caller));
        let _child_guard = child_handle.write_lock();

        let child_type = self.volume.get_type(child)?;
        if child_type != InodeType::Dir {
            return Err(FsError::not_dir("rmdir called on a non-directory"));
        }

        if self.volume.num_dir_entries(child)? != 2 {
            return Err(FsError::not_empty("directory not empty"));
        }

        self.volume.unlink(dir, basename)?;
        self.volume.destroy(child)?;

        self.count(FsOp::Rmdir);
        Ok(())
    }

    /// Renames `src_name` in `src_dir` to `dst_name` in `dst_dir`.
    ///
    /// With distinct directories the destination is try-locked; on
    /// contention the source lock is dropped and the whole sequence
    /// retries, which breaks deadlocks between concurrent renames with
    /// reversed argument order.
    pub fn rename(
        &self,
        ctx: &UserContext,
        src_dir: InodeNumber,
        src_name: &str,
        dst_dir: InodeNumber,
        dst_name: &str,
    ) -> Result<()> {
        let same_dir = src_dir == dst_dir;
        let caller = CallerId::generate();
        let src_handle = self.inode_lock(src_dir, Some(caller));
        let dst_handle = self.inode_lock(dst_dir, Some(caller));

        loop {
            let src_guard = src_handle.write_lock();

            self.check_access(src_dir, ctx, AccessMode::W_OK | AccessMode::X_OK)?;

            let dst_guard = if same_dir {
                None
            } else {
                match dst_handle.try_write_lock() {
                    Ok(guard) => {
                        self.check_access(dst_dir, ctx, AccessMode::W_OK | AccessMode::X_OK)?;
                        Some(guard)
                    }
                    Err(err) if err.is(quayfs_errors::ErrorKind::TryAgain) => {
                        drop(src_guard);
                        std::thread::yield_now();
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            };

            self.volume
                .move_entry(src_dir, src_name, dst_dir, dst_name)?;
            drop(dst_guard);
            drop(src_guard);
            break;
        }

        self.count(FsOp::Rename);
        Ok(())
    }

    /// Looks up `basename` in `dir`.
    pub fn lookup(
        &self,
        ctx: &UserContext,
        dir: InodeNumber,
        basename: &str,
    ) -> Result<InodeNumber> {
        let handle = self.inode_lock(dir, None);
        let _guard = handle.read_lock();

        self.check_access(dir, ctx, AccessMode::X_OK)?;

        let ino = self.volume.lookup(dir, basename)?;
        self.count(FsOp::Lookup);
        Ok(ino)
    }

    /// Walks `fullpath` segment by segment without following symlinks,
    /// read-locking each directory for the duration of its lookup.
    pub fn lookup_path(&self, ctx: &UserContext, fullpath: &str) -> Result<InodeNumber> {
        self.count(FsOp::LookupPath);

        let mut segments = crate::resolve::rev_split_path(fullpath);
        let mut cursor = InodeNumber::ROOT;

        while let Some(segment) = segments.pop() {
            let handle = self.inode_lock(cursor, None);
            let _guard = handle.read_lock();

            if !self
                .volume
                .access(cursor, ctx.uid, ctx.gid, &ctx.other_gids, AccessMode::X_OK)
            {
                return Err(FsError::permission_denied("EACCES"));
            }

            cursor = self.volume.lookup(cursor, &segment)?;
        }

        Ok(cursor)
    }

    /// Reads up to `length` bytes at `offset` from a file.
    pub fn read(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        offset: u64,
        length: u64,
        profiler: &mut Profiler,
    ) -> Result<Vec<u8>> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.check_access(ino, ctx, AccessMode::R_OK)?;

        let inode_type = self.volume.get_type(ino)?;
        if inode_type != InodeType::File {
            return Err(FsError::not_file(format!(
                "expected inode {} to be a file, got {:?}",
                ino, inode_type
            )));
        }

        profiler.add_event("before volume read");
        let buf = self.volume.read(ino, offset, length, profiler)?;
        profiler.add_event("after volume read");

        if buf.len() as u64 > length {
            return Err(FsError::io(format!(
                "buffer length {} is greater than requested length {}",
                buf.len(),
                length
            )));
        }

        self.count(FsOp::Read);
        Ok(buf)
    }

    /// Writes `buf` at `offset`; returns the number of bytes written.
    pub fn write(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        offset: u64,
        buf: &[u8],
        profiler: &mut Profiler,
    ) -> Result<u64> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.write_lock();

        self.check_access(ino, ctx, AccessMode::W_OK)?;

        profiler.add_event("before volume write");
        self.volume.write(ino, offset, buf, profiler)?;
        profiler.add_event("after volume write");

        self.count(FsOp::Write);
        Ok(buf.len() as u64)
    }

    /// Flushes pending data for the inode.
    pub fn flush(&self, ctx: &UserContext, ino: InodeNumber) -> Result<()> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.write_lock();

        self.check_access(ino, ctx, AccessMode::W_OK)?;

        self.count(FsOp::Flush);
        self.volume.flush(ino, false)
    }

    /// Fills a [`Stat`] for an inode whose lock is already held by
    /// `caller`.
    pub(crate) fn getstat_locked(&self, ino: InodeNumber, caller: CallerId) -> Result<Stat> {
        if !self
            .state
            .locks
            .is_held(&self.lock_id(ino), caller, HeldType::Any)
        {
            return Err(FsError::not_found(format!(
                "inode {} lock must be held before calling",
                ino
            )));
        }

        let metadata = self.volume.get_metadata(ino)?;
        Ok(Stat {
            crtime_ns: metadata.creation_time_ns,
            mtime_ns: metadata.modification_time_ns,
            ctime_ns: metadata.attr_change_time_ns,
            atime_ns: metadata.access_time_ns,
            size: metadata.size,
            nlink: metadata.link_count,
            file_type: metadata.inode_type,
            ino,
            mode: metadata.mode as u64,
            uid: metadata.user_id as u64,
            gid: metadata.group_id as u64,
            num_writes: metadata.num_writes,
        })
    }

    /// Returns the stat record for an inode.
    pub fn getstat(&self, _ctx: &UserContext, ino: InodeNumber) -> Result<Stat> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.count(FsOp::Getstat);
        self.getstat_locked(ino, handle.caller())
    }

    /// Returns the type of an inode whose lock is already held.
    pub(crate) fn get_type_locked(
        &self,
        ino: InodeNumber,
        caller: CallerId,
    ) -> Result<InodeType> {
        if !self
            .state
            .locks
            .is_held(&self.lock_id(ino), caller, HeldType::Any)
        {
            return Err(FsError::not_found(format!(
                "inode {} lock must be held before calling",
                ino
            )));
        }
        self.volume.get_type(ino)
    }

    /// Returns the inode's type.
    pub fn get_type(&self, _ctx: &UserContext, ino: InodeNumber) -> Result<InodeType> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.count(FsOp::GetType);
        self.get_type_locked(ino, handle.caller())
    }

    /// True if the inode is a directory.
    pub fn is_dir(&self, _ctx: &UserContext, ino: InodeNumber) -> Result<bool> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.count(FsOp::IsDir);
        Ok(self.get_type_locked(ino, handle.caller())? == InodeType::Dir)
    }

    /// True if the inode is a regular file.
    pub fn is_file(&self, _ctx: &UserContext, ino: InodeNumber) -> Result<bool> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.count(FsOp::IsFile);
        Ok(self.volume.get_type(ino)? == InodeType::File)
    }

    /// True if the inode is a symlink.
    pub fn is_symlink(&self, _ctx: &UserContext, ino: InodeNumber) -> Result<bool> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.count(FsOp::IsSymlink);
        Ok(self.volume.get_type(ino)? == InodeType::Symlink)
    }

    /// Applies the fields present in `request` to the inode. The
    /// caller must own the inode or be root.
    pub fn setstat(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        request: &SetstatRequest,
    ) -> Result<()> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.write_lock();

        if !self
            .volume
            .access(ino, ctx.uid, ctx.gid, &ctx.other_gids, AccessMode::P_OK)
        {
            return Err(FsError::not_permitted("EPERM"));
        }

        if let Some(crtime_ns) = request.crtime_ns {
            self.volume.set_creation_time(ino, crtime_ns)?;
        }
        if let Some(mtime_ns) = request.mtime_ns {
            self.volume.set_modification_time(ino, mtime_ns)?;
        }
        if let Some(atime_ns) = request.atime_ns {
            self.volume.set_access_time(ino, atime_ns)?;
        }
        if let Some(ctime_ns) = request.ctime_ns {
            self.volume.set_attr_change_time(ino, ctime_ns)?;
        }
        if let Some(size) = request.size {
            self.volume.set_size(ino, size)?;
        }

        if let Some(uid) = request.uid {
            if uid > u32::MAX as u64 {
                return Err(FsError::invalid_user_id(format!(
                    "userID is too large: value {}, max {}",
                    uid,
                    u32::MAX
                )));
            }
        }
        if let Some(gid) = request.gid {
            if gid > u32::MAX as u64 {
                return Err(FsError::invalid_group_id(format!(
                    "groupID is too large: value {}, max {}",
                    gid,
                    u32::MAX
                )));
            }
        }
        match (request.uid, request.gid) {
            (Some(uid), Some(gid)) => {
                self.volume
                    .set_owner_user_group_id(ino, uid as u32, gid as u32)?;
            }
            (Some(uid), None) => {
                self.volume.set_owner_user_id(ino, uid as u32)?;
            }
            (None, Some(gid)) => {
                self.volume.set_owner_group_id(ino, gid as u32)?;
            }
            (None, None) => {}
        }

        if let Some(mode) = request.mode {
            if mode > u32::MAX as u64 {
                return Err(FsError::invalid_file_mode(format!(
                    "file mode is too large: value {}, max {}",
                    mode,
                    u32::MAX
                )));
            }
            self.volume.set_perm_mode(ino, mode as u32)?;
        }

        self.count(FsOp::Setstat);
        Ok(())
    }

    /// Readdir body shared by the paginated variants; the directory
    /// lock must already be held by `caller`. Entry types are filled by
    /// briefly read-locking each child. A marker past the last entry is
    /// an empty page, not an error.
    pub(crate) fn readdir_locked(
        &self,
        ino: InodeNumber,
        prev_basename: &str,
        max_entries: u64,
        max_buf_size: u64,
        caller: CallerId,
    ) -> Result<(Vec<DirEntryInfo>, u64, bool)> {
        if !self
            .state
            .locks
            .is_held(&self.lock_id(ino), caller, HeldType::Any)
        {
            return Err(FsError::not_found(format!(
                "inode {} lock must be held before calling",
                ino
            )));
        }

        let (raw, more) = match self
            .volume
            .read_dir(ino, max_entries, max_buf_size, prev_basename)
        {
            Ok(page) => page,
            Err(err) if err.is(quayfs_errors::ErrorKind::NotFound) => {
                return Ok((Vec::new(), 0, false))
            }
            Err(err) => return Err(err),
        };

        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            let file_type = if entry.ino == ino {
                // "." (and ".." of the root) name the locked inode.
                self.get_type_locked(ino, caller)?
            } else {
                let handle = self.inode_lock(entry.ino, Some(caller));
                let _guard = handle.read_lock();
                self.get_type_locked(entry.ino, handle.caller())?
            };
            entries.push(DirEntryInfo {
                ino: entry.ino,
                basename: entry.basename,
                file_type,
            });
        }

        let count = entries.len() as u64;
        Ok((entries, count, more))
    }

    /// Lists directory entries in ascending basename order, strictly
    /// after `prev_basename`, up to `max_entries` and `max_buf_size`
    /// (zero means unlimited). Returns the entries, their count, and
    /// whether more remain.
    pub fn readdir(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        prev_basename: &str,
        max_entries: u64,
        max_buf_size: u64,
    ) -> Result<(Vec<DirEntryInfo>, u64, bool)> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.check_access(ino, ctx, AccessMode::X_OK)?;

        self.count(FsOp::Readdir);
        self.readdir_locked(ino, prev_basename, max_entries, max_buf_size, handle.caller())
    }

    /// Cursor-based single-entry readdir body; the directory lock must
    /// already be held by `caller`.
    pub(crate) fn readdir_at_locked(
        &self,
        ino: InodeNumber,
        prev_location: i64,
        caller: CallerId,
    ) -> Result<(DirEntryInfo, i64)> {
        if !self
            .state
            .locks
            .is_held(&self.lock_id(ino), caller, HeldType::Any)
        {
            return Err(FsError::not_found(format!(
                "inode {} lock must be held before calling",
                ino
            )));
        }

        let entry = self.volume.read_dir_at(ino, prev_location)?;
        let file_type = if entry.ino == ino {
            self.get_type_locked(ino, caller)?
        } else {
            let handle = self.inode_lock(entry.ino, Some(caller));
            let _guard = handle.read_lock();
            self.get_type_locked(entry.ino, handle.caller())?
        };

        Ok((
            DirEntryInfo {
                ino: entry.ino,
                basename: entry.basename,
                file_type,
            },
            entry.location,
        ))
    }

    /// Returns the single entry after cursor `prev_location` (-1 starts
    /// at the beginning) together with its cursor. Past the end the
    /// result is `NotFound`, which clients use as the end-of-directory
    /// signal; it is deliberately not logged as an error.
    pub fn readdir_one(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        prev_location: i64,
    ) -> Result<(DirEntryInfo, i64)> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.check_access(ino, ctx, AccessMode::X_OK)?;

        let result = self.readdir_at_locked(ino, prev_location, handle.caller());
        if let Err(err) = &result {
            if !err.is(quayfs_errors::ErrorKind::NotFound) {
                tracing::error!(ino = ino.as_u64(), %err, "readdir_one failed");
            }
        }
        self.count(FsOp::ReaddirOne);
        result
    }

    /// [`Mount::readdir`] paired with a stat per entry. The directory
    /// lock is dropped before the per-entry stats are gathered under
    /// each child's own read lock.
    pub fn readdir_plus(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        prev_basename: &str,
        max_entries: u64,
        max_buf_size: u64,
    ) -> Result<(Vec<DirEntryInfo>, Vec<Stat>, u64, bool)> {
        let handle = self.inode_lock(ino, None);
        let guard = handle.read_lock();

        self.check_access(ino, ctx, AccessMode::X_OK)?;

        let (entries, count, more) =
            self.readdir_locked(ino, prev_basename, max_entries, max_buf_size, handle.caller())?;
        drop(guard);

        let mut stats = Vec::with_capacity(entries.len());
        for entry in &entries {
            let entry_handle = self.inode_lock(entry.ino, None);
            let _entry_guard = entry_handle.read_lock();
            stats.push(self.getstat_locked(entry.ino, entry_handle.caller())?);
        }

        self.count(FsOp::ReaddirPlus);
        Ok((entries, stats, count, more))
    }

    /// [`Mount::readdir_one`] paired with the entry's stat.
    pub fn readdir_one_plus(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        prev_location: i64,
    ) -> Result<(DirEntryInfo, i64, Stat)> {
        let handle = self.inode_lock(ino, None);
        let guard = handle.read_lock();

        self.check_access(ino, ctx, AccessMode::X_OK)?;

        let result = self.readdir_at_locked(ino, prev_location, handle.caller());
        let (entry, location) = match result {
            Ok(found) => found,
            Err(err) => {
                if !err.is(quayfs_errors::ErrorKind::NotFound) {
                    tracing::error!(ino = ino.as_u64(), %err, "readdir_one_plus failed");
                }
                return Err(err);
            }
        };
        drop(guard);

        let entry_handle = self.inode_lock(entry.ino, None);
        let _entry_guard = entry_handle.read_lock();
        let stat = self.getstat_locked(entry.ino, entry_handle.caller())?;

        self.count(FsOp::ReaddirOnePlus);
        Ok((entry, location, stat))
    }

    /// Returns a symlink's target.
    pub fn readsymlink(&self, ctx: &UserContext, ino: InodeNumber) -> Result<String> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.check_access(ino, ctx, AccessMode::R_OK)?;

        let target = self.volume.get_symlink(ino)?;
        self.count(FsOp::Readsymlink);
        Ok(target)
    }

    /// Changes a file's size.
    pub fn resize(&self, ctx: &UserContext, ino: InodeNumber, new_size: u64) -> Result<()> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.write_lock();

        self.check_access(ino, ctx, AccessMode::W_OK)?;

        self.volume.set_size(ino, new_size)?;
        self.count(FsOp::Resize);
        Ok(())
    }

    /// Reads an extended attribute. A missing stream surfaces as
    /// `StreamNotFound`; SMB clients routinely probe for streams that
    /// do not exist, so the miss is traced, not logged as an error.
    pub fn get_xattr(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        stream_name: &str,
    ) -> Result<Vec<u8>> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.check_access(ino, ctx, AccessMode::R_OK)?;

        match self.volume.get_stream(ino, stream_name) {
            Ok(value) => {
                self.count(FsOp::GetXattr);
                Ok(value)
            }
            Err(err) => {
                tracing::trace!(
                    ino = ino.as_u64(),
                    stream = stream_name,
                    %err,
                    "xattr read miss"
                );
                Err(err)
            }
        }
    }

    /// Writes an extended attribute. Flags: 0 always writes,
    /// [`XATTR_CREATE`] requires the stream to be absent,
    /// [`XATTR_REPLACE`] requires it present; anything else is
    /// rejected.
    pub fn set_xattr(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        stream_name: &str,
        value: &[u8],
        flags: u32,
    ) -> Result<()> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.write_lock();

        self.check_access(ino, ctx, AccessMode::W_OK)?;

        match flags {
            0 => {}
            XATTR_CREATE => {
                if self.volume.get_stream(ino, stream_name).is_ok() {
                    return Err(FsError::exists(format!(
                        "stream '{}' already exists on inode {}",
                        stream_name, ino
                    )));
                }
            }
            XATTR_REPLACE => {
                self.volume.get_stream(ino, stream_name)?;
            }
            _ => {
                return Err(FsError::invalid_argument(format!(
                    "invalid set_xattr flags {}",
                    flags
                )))
            }
        }

        if let Err(err) = self.volume.put_stream(ino, stream_name, value) {
            tracing::error!(
                ino = ino.as_u64(),
                stream = stream_name,
                %err,
                "failed to set xattr"
            );
            return Err(err);
        }

        self.count(FsOp::SetXattr);
        Ok(())
    }

    /// Lists the names of the inode's extended attributes.
    pub fn list_xattr(&self, ctx: &UserContext, ino: InodeNumber) -> Result<Vec<String>> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.check_access(ino, ctx, AccessMode::R_OK)?;

        let metadata = self.volume.get_metadata(ino)?;
        self.count(FsOp::ListXattr);
        Ok(metadata.stream_names)
    }

    /// Removes an extended attribute; `StreamNotFound` if absent.
    pub fn remove_xattr(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        stream_name: &str,
    ) -> Result<()> {
        let handle = self.inode_lock(ino, None);
        let _guard = handle.write_lock();

        self.check_access(ino, ctx, AccessMode::W_OK)?;

        if let Err(err) = self.volume.delete_stream(ino, stream_name) {
            tracing::error!(
                ino = ino.as_u64(),
                stream = stream_name,
                %err,
                "failed to remove xattr"
            );
            return Err(err);
        }

        self.count(FsOp::RemoveXattr);
        Ok(())
    }

    /// Applies an advisory byte-range lock operation. Blocking waits
    /// (`SetLkWait`) are not supported; unlock requests remove their
    /// exact match; set requests conflict with any overlapping range
    /// where either side is a write lock.
    pub fn flock(
        &self,
        ctx: &UserContext,
        ino: InodeNumber,
        command: FlockCommand,
        request: &FlockRequest,
    ) -> Result<FlockRequest> {
        if command == FlockCommand::SetLkWait {
            return Err(FsError::not_supported("blocking flock is not supported"));
        }

        // Hold the inode shared so it cannot go away while the range
        // table is updated.
        let handle = self.inode_lock(ino, None);
        let _guard = handle.read_lock();

        self.check_access(ino, ctx, AccessMode::R_OK)?;

        let record = self.flock_table()?;

        if request.flock_type == FlockType::Unlock {
            record.flocks.unlock(ino, request)?;
            self.count(FsOp::Flock);
            return Ok(request.clone());
        }

        let held = record.flocks.set(ino, request)?;
        self.count(FsOp::Flock);
        Ok(held)
    }

    /// Returns the statvfs record for this volume: configuration-fed
    /// counters plus the collaborator's filesystem id.
    pub fn stat_vfs(&self) -> StatVfs {
        let config = &self.state.config;
        self.count(FsOp::StatVfs);
        StatVfs {
            filesystem_id: self.volume.get_fsid(),
            block_size: config.fs_block_size,
            fragment_size: config.fs_optimal_transfer_size,
            total_blocks: config.fake_total_blocks,
            free_blocks: config.fake_free_blocks,
            avail_blocks: config.fake_avail_blocks,
            total_inodes: config.fake_total_inodes,
            free_inodes: config.fake_avail_inodes,
            avail_inodes: config.fake_avail_inodes,
            mount_flags: 0,
            max_filename_len: FILE_NAME_MAX as u64,
        }
    }

    /// Provisions a backing object and returns its path.
    pub fn provision_object(&self) -> Result<String> {
        let path = self.volume.provision_object()?;
        self.count(FsOp::ProvisionObject);
        Ok(path)
    }

    /// Validates the inode's on-store structures via the collaborator.
    pub fn validate(&self, ino: InodeNumber) -> Result<()> {
        self.volume.validate(ino)?;
        self.count(FsOp::Validate);
        Ok(())
    }
}
