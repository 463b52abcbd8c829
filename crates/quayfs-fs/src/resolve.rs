//! Path resolution with symlink following and lock handoff.
//!
//! Paths are split into lexically-cleaned segments held in reverse so
//! symlink expansion is a push onto the pending list. The walk holds
//! the current directory's lock, locks each child before releasing the
//! parent, and hands the final still-held lock to the caller. All
//! intermediate locks are guards, so every error path releases them.

use quayfs_dlm::{CallerId, LockGuard, LockMode};
use quayfs_errors::{FsError, Result};

use crate::mount::Mount;
use crate::types::{InodeNumber, InodeType, FILE_NAME_MAX, FILE_PATH_MAX, MAX_SYMLINKS};

/// Splits a path into lexically-cleaned segments, reversed so the next
/// segment to visit is `last()`. A leading `/` is trimmed; `.` and
/// empty segments are dropped; `..` is collapsed where a prior segment
/// exists and kept otherwise.
pub(crate) fn rev_split_path(fullpath: &str) -> Vec<String> {
    let trimmed = fullpath.strip_prefix('/').unwrap_or(fullpath);

    let mut segments: Vec<String> = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            ".." => match segments.last() {
                Some(prior) if prior != ".." => {
                    segments.pop();
                }
                _ => segments.push("..".to_string()),
            },
            other => segments.push(other.to_string()),
        }
    }
    segments.reverse();
    segments
}

/// Rejects basenames longer than [`FILE_NAME_MAX`] bytes.
pub(crate) fn validate_base_name(base_name: &str) -> Result<()> {
    if base_name.len() > FILE_NAME_MAX {
        return Err(FsError::name_too_long(format!(
            "basename is too long: length {}, max {}",
            base_name.len(),
            FILE_NAME_MAX
        )));
    }
    Ok(())
}

/// Rejects full paths longer than [`FILE_PATH_MAX`] bytes.
pub(crate) fn validate_full_path(full_path: &str) -> Result<()> {
    if full_path.len() > FILE_PATH_MAX {
        return Err(FsError::name_too_long(format!(
            "fullpath is too long: length {}, max {}",
            full_path.len(),
            FILE_PATH_MAX
        )));
    }
    Ok(())
}

impl Mount {
    /// Resolves a path, read-locking along the walk. See
    /// [`Mount::resolve_path`].
    pub(crate) fn resolve_path_for_read(
        &self,
        fullpath: &str,
        caller: Option<CallerId>,
    ) -> Result<(InodeNumber, InodeType, Option<LockGuard>)> {
        self.resolve_path(fullpath, caller, LockMode::Read)
    }

    /// Resolves a path, write-locking along the walk. See
    /// [`Mount::resolve_path`].
    pub(crate) fn resolve_path_for_write(
        &self,
        fullpath: &str,
        caller: Option<CallerId>,
    ) -> Result<(InodeNumber, InodeType, Option<LockGuard>)> {
        self.resolve_path(fullpath, caller, LockMode::Write)
    }

    /// Acquires the lock on `ino` in the given mode unless the shared
    /// caller already holds a sufficient lock, in which case `None`.
    fn ensure_lock(
        &self,
        ino: InodeNumber,
        caller: Option<CallerId>,
        mode: LockMode,
    ) -> Option<LockGuard> {
        let handle = self.inode_lock(ino, caller);
        match mode {
            LockMode::Read => handle.ensure_read_lock(),
            LockMode::Write => handle.ensure_write_lock(),
        }
    }

    /// Walks `fullpath` from the root, following symlinks up to
    /// [`MAX_SYMLINKS`], and returns the terminal inode, its type, and
    /// the still-held lock on it. The caller releases the lock; a
    /// `None` guard means the shared caller already held it.
    ///
    /// Intermediate locks are handed off parent-to-child: the child is
    /// locked before the parent's lock is released, so no window exists
    /// for the child to be unlinked between the lookup and the lock.
    fn resolve_path(
        &self,
        fullpath: &str,
        caller: Option<CallerId>,
        mode: LockMode,
    ) -> Result<(InodeNumber, InodeType, Option<LockGuard>)> {
        let mut segments = rev_split_path(fullpath);
        let mut follows_remaining = MAX_SYMLINKS;

        let mut dir_ino = InodeNumber::ROOT;
        let mut dir_guard = self.ensure_lock(dir_ino, caller, mode);

        while let Some(segment) = segments.pop() {
            if segment == "." {
                continue;
            }

            let cursor_ino = self.volume.lookup(dir_ino, &segment)?;
            let cursor_guard = self.ensure_lock(cursor_ino, caller, mode);
            let cursor_type = self.volume.get_type(cursor_ino)?;

            if cursor_type == InodeType::Symlink {
                if follows_remaining == 0 {
                    return Err(FsError::too_many_symlinks(format!(
                        "too many symlinks while resolving {}",
                        fullpath
                    )));
                }
                follows_remaining -= 1;

                // Done with the symlink inode itself, error or not.
                let target = self.volume.get_symlink(cursor_ino);
                drop(cursor_guard);
                let target = target?;

                if target.starts_with('/') {
                    // Absolute target: restart traversal from the root.
                    drop(dir_guard);
                    dir_ino = InodeNumber::ROOT;
                    dir_guard = self.ensure_lock(dir_ino, caller, mode);
                }
                segments.extend(rev_split_path(&target));
            } else if segments.is_empty() {
                // Terminal segment; the held lock is the caller's now.
                return Ok((cursor_ino, cursor_type, cursor_guard));
            } else if cursor_type == InodeType::File {
                return Err(FsError::not_dir(format!(
                    "'{}' is a file, not a directory",
                    segment
                )));
            } else {
                // Descend: the child lock becomes the directory lock.
                dir_ino = cursor_ino;
                dir_guard = cursor_guard;
            }
        }

        // Only an empty segment list reaches here: the path was "/".
        Ok((dir_ino, InodeType::Dir, dir_guard))
    }
}
