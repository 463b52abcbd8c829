//! In-memory volume backend.
//!
//! Implements the full [`VolumeHandle`] contract against process
//! memory. This is the development and test backend; it does not
//! persist anything. File content written through `write` is held as
//! bytes; content bound through `wrote` is held as extents naming the
//! backing objects, which is what `get_read_plan` reports.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use quayfs_errors::{FsError, Result};

use crate::profiler::Profiler;
use crate::types::{AccessMode, InodeNumber, InodeType};
use crate::volume::{
    CoalesceElement, CoalesceResult, DirEntry, InodeMetadata, ReadPlanStep, VolumeHandle,
    VolumeProvider,
};

fn now_ns() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before epoch");
    now.as_nanos() as u64
}

#[derive(Clone, Debug)]
struct Extent {
    file_offset: u64,
    object_path: String,
    object_offset: u64,
    length: u64,
}

#[derive(Clone, Debug)]
enum InodeKind {
    File { data: Vec<u8>, extents: Vec<Extent> },
    Dir { entries: BTreeMap<String, InodeNumber> },
    Symlink { target: String },
}

#[derive(Clone, Debug)]
struct InodeRec {
    creation_time_ns: u64,
    modification_time_ns: u64,
    attr_change_time_ns: u64,
    access_time_ns: u64,
    size: u64,
    link_count: u64,
    mode: u32,
    user_id: u32,
    group_id: u32,
    num_writes: u64,
    kind: InodeKind,
    streams: BTreeMap<String, Vec<u8>>,
}

impl InodeRec {
    fn new(kind: InodeKind, mode: u32, uid: u32, gid: u32) -> Self {
        let now = now_ns();
        let size = match &kind {
            InodeKind::Symlink { target } => target.len() as u64,
            _ => 0,
        };
        Self {
            creation_time_ns: now,
            modification_time_ns: now,
            attr_change_time_ns: now,
            access_time_ns: now,
            size,
            link_count: 0,
            mode,
            user_id: uid,
            group_id: gid,
            num_writes: 0,
            kind,
            streams: BTreeMap::new(),
        }
    }

    fn inode_type(&self) -> InodeType {
        match self.kind {
            InodeKind::File { .. } => InodeType::File,
            InodeKind::Dir { .. } => InodeType::Dir,
            InodeKind::Symlink { .. } => InodeType::Symlink,
        }
    }
}

struct VolState {
    inodes: HashMap<u64, InodeRec>,
    next_ino: u64,
    next_object: u64,
}

/// An in-memory volume.
pub struct MemoryVolume {
    name: String,
    fsid: u64,
    state: Mutex<VolState>,
}

impl MemoryVolume {
    /// Creates a volume with an empty root directory at
    /// [`InodeNumber::ROOT`].
    pub fn new(name: &str, fsid: u64) -> Self {
        let mut inodes = HashMap::new();
        let mut entries = BTreeMap::new();
        entries.insert(".".to_string(), InodeNumber::ROOT);
        entries.insert("..".to_string(), InodeNumber::ROOT);
        let mut root = InodeRec::new(InodeKind::Dir { entries }, 0o755, 0, 0);
        // Root is referenced by its own ".." plus the implicit "." count.
        root.link_count = 2;
        inodes.insert(InodeNumber::ROOT.as_u64(), root);

        Self {
            name: name.to_string(),
            fsid,
            state: Mutex::new(VolState {
                inodes,
                next_ino: InodeNumber::ROOT.as_u64() + 1,
                next_object: 1,
            }),
        }
    }

    /// The volume name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn alloc_ino(state: &mut VolState) -> InodeNumber {
        let ino = state.next_ino;
        state.next_ino += 1;
        InodeNumber::new(ino)
    }

    fn get(state: &VolState, ino: InodeNumber) -> Result<&InodeRec> {
        state
            .inodes
            .get(&ino.as_u64())
            .ok_or_else(|| FsError::not_found(format!("inode {} not found", ino)))
    }

    fn get_mut(state: &mut VolState, ino: InodeNumber) -> Result<&mut InodeRec> {
        state
            .inodes
            .get_mut(&ino.as_u64())
            .ok_or_else(|| FsError::not_found(format!("inode {} not found", ino)))
    }

    fn dir_entries(rec: &InodeRec, ino: InodeNumber) -> Result<&BTreeMap<String, InodeNumber>> {
        match &rec.kind {
            InodeKind::Dir { entries } => Ok(entries),
            _ => Err(FsError::not_dir(format!("inode {} is not a directory", ino))),
        }
    }

    /// Removes the entry `name` from `dir`, adjusting link counts.
    /// Returns the unlinked child's inode number.
    fn unlink_locked(state: &mut VolState, dir: InodeNumber, name: &str) -> Result<InodeNumber> {
        let child_ino = {
            let rec = Self::get(state, dir)?;
            let entries = Self::dir_entries(rec, dir)?;
            *entries.get(name).ok_or_else(|| {
                FsError::not_found(format!("entry '{}' not found in directory {}", name, dir))
            })?
        };

        let now = now_ns();
        let child_is_dir = {
            let child = Self::get_mut(state, child_ino)?;
            child.link_count -= 1;
            child.attr_change_time_ns = now;
            if let InodeKind::Dir { entries } = &mut child.kind {
                entries.remove("..");
                true
            } else {
                false
            }
        };

        let dir_rec = Self::get_mut(state, dir)?;
        if let InodeKind::Dir { entries } = &mut dir_rec.kind {
            entries.remove(name);
        }
        dir_rec.modification_time_ns = now;
        dir_rec.attr_change_time_ns = now;
        if child_is_dir {
            // The child's ".." no longer references this directory.
            dir_rec.link_count -= 1;
        }

        Ok(child_ino)
    }

    /// Links `target` into `dir` under `name`, adjusting link counts.
    fn link_locked(
        state: &mut VolState,
        dir: InodeNumber,
        name: &str,
        target: InodeNumber,
    ) -> Result<()> {
        {
            let rec = Self::get(state, dir)?;
            let entries = Self::dir_entries(rec, dir)?;
            if entries.contains_key(name) {
                return Err(FsError::exists(format!(
                    "entry '{}' already exists in directory {}",
                    name, dir
                )));
            }
        }
        let target_is_dir = {
            let rec = Self::get(state, target)?;
            rec.inode_type() == InodeType::Dir
        };

        let now = now_ns();
        {
            let dir_rec = Self::get_mut(state, dir)?;
            if let InodeKind::Dir { entries } = &mut dir_rec.kind {
                entries.insert(name.to_string(), target);
            }
            dir_rec.modification_time_ns = now;
            dir_rec.attr_change_time_ns = now;
            if target_is_dir {
                // The child's ".." will reference this directory.
                dir_rec.link_count += 1;
            }
        }
        {
            let target_rec = Self::get_mut(state, target)?;
            target_rec.link_count += 1;
            target_rec.attr_change_time_ns = now;
            if let InodeKind::Dir { entries } = &mut target_rec.kind {
                entries.insert("..".to_string(), dir);
            }
        }

        Ok(())
    }

}

impl VolumeHandle for MemoryVolume {
    fn access(
        &self,
        ino: InodeNumber,
        uid: u32,
        gid: u32,
        other_gids: &[u32],
        mode: AccessMode,
    ) -> bool {
        let state = self.state.lock();
        let rec = match state.inodes.get(&ino.as_u64()) {
            Some(rec) => rec,
            None => return false,
        };

        if mode.0 == AccessMode::F_OK.0 {
            return true;
        }
        if mode.is_ownership_check() {
            return uid == 0 || uid == rec.user_id;
        }
        if uid == 0 {
            return true;
        }

        let bits = rec.mode & 0o777;
        let (read_bit, write_bit, exec_bit) = if uid == rec.user_id {
            (0o400, 0o200, 0o100)
        } else if gid == rec.group_id || other_gids.contains(&rec.group_id) {
            (0o040, 0o020, 0o010)
        } else {
            (0o004, 0o002, 0o001)
        };

        if mode.has_read() && bits & read_bit == 0 {
            return false;
        }
        if mode.has_write() && bits & write_bit == 0 {
            return false;
        }
        if mode.has_execute() && bits & exec_bit == 0 {
            return false;
        }
        true
    }

    fn get_type(&self, ino: InodeNumber) -> Result<InodeType> {
        let state = self.state.lock();
        Ok(Self::get(&state, ino)?.inode_type())
    }

    fn get_metadata(&self, ino: InodeNumber) -> Result<InodeMetadata> {
        let state = self.state.lock();
        let rec = Self::get(&state, ino)?;
        Ok(InodeMetadata {
            creation_time_ns: rec.creation_time_ns,
            modification_time_ns: rec.modification_time_ns,
            attr_change_time_ns: rec.attr_change_time_ns,
            access_time_ns: rec.access_time_ns,
            size: rec.size,
            link_count: rec.link_count,
            inode_type: rec.inode_type(),
            mode: rec.mode,
            user_id: rec.user_id,
            group_id: rec.group_id,
            num_writes: rec.num_writes,
            stream_names: rec.streams.keys().cloned().collect(),
        })
    }

    fn lookup(&self, dir: InodeNumber, name: &str) -> Result<InodeNumber> {
        let state = self.state.lock();
        let rec = Self::get(&state, dir)?;
        let entries = Self::dir_entries(rec, dir)?;
        entries.get(name).copied().ok_or_else(|| {
            FsError::not_found(format!("entry '{}' not found in directory {}", name, dir))
        })
    }

    fn link(&self, dir: InodeNumber, name: &str, target: InodeNumber) -> Result<()> {
        let mut state = self.state.lock();
        Self::link_locked(&mut state, dir, name, target)
    }

    fn unlink(&self, dir: InodeNumber, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::unlink_locked(&mut state, dir, name)?;
        Ok(())
    }

    fn move_entry(
        &self,
        src_dir: InodeNumber,
        src_name: &str,
        dst_dir: InodeNumber,
        dst_name: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();

        let moved = {
            let rec = Self::get(&state, src_dir)?;
            let entries = Self::dir_entries(rec, src_dir)?;
            *entries.get(src_name).ok_or_else(|| {
                FsError::not_found(format!(
                    "entry '{}' not found in directory {}",
                    src_name, src_dir
                ))
            })?
        };

        // A pre-existing destination file or symlink is replaced; a
        // directory is not.
        let displaced = {
            let rec = Self::get(&state, dst_dir)?;
            let entries = Self::dir_entries(rec, dst_dir)?;
            entries.get(dst_name).copied()
        };
        if let Some(displaced_ino) = displaced {
            let displaced_type = Self::get(&state, displaced_ino)?.inode_type();
            if displaced_type == InodeType::Dir {
                return Err(FsError::exists(format!(
                    "entry '{}' already exists in directory {}",
                    dst_name, dst_dir
                )));
            }
            Self::unlink_locked(&mut state, dst_dir, dst_name)?;
            if Self::get(&state, displaced_ino)?.link_count == 0 {
                state.inodes.remove(&displaced_ino.as_u64());
            }
        }

        Self::unlink_locked(&mut state, src_dir, src_name)?;
        Self::link_locked(&mut state, dst_dir, dst_name, moved)?;
        Ok(())
    }

    fn create_file(&self, mode: u32, uid: u32, gid: u32) -> Result<InodeNumber> {
        let mut state = self.state.lock();
        let ino = Self::alloc_ino(&mut state);
        let rec = InodeRec::new(
            InodeKind::File {
                data: Vec::new(),
                extents: Vec::new(),
            },
            mode,
            uid,
            gid,
        );
        state.inodes.insert(ino.as_u64(), rec);
        Ok(ino)
    }

    fn create_dir(&self, mode: u32, uid: u32, gid: u32) -> Result<InodeNumber> {
        let mut state = self.state.lock();
        let ino = Self::alloc_ino(&mut state);
        let mut entries = BTreeMap::new();
        entries.insert(".".to_string(), ino);
        let mut rec = InodeRec::new(InodeKind::Dir { entries }, mode, uid, gid);
        // Unlinked directory: no entries reference it yet, plus one for
        // its own ".".
        rec.link_count = 1;
        state.inodes.insert(ino.as_u64(), rec);
        Ok(ino)
    }

    fn create_symlink(&self, target: &str, mode: u32, uid: u32, gid: u32) -> Result<InodeNumber> {
        let mut state = self.state.lock();
        let ino = Self::alloc_ino(&mut state);
        let rec = InodeRec::new(
            InodeKind::Symlink {
                target: target.to_string(),
            },
            mode,
            uid,
            gid,
        );
        state.inodes.insert(ino.as_u64(), rec);
        Ok(ino)
    }

    fn destroy(&self, ino: InodeNumber) -> Result<()> {
        let mut state = self.state.lock();
        state
            .inodes
            .remove(&ino.as_u64())
            .ok_or_else(|| FsError::not_found(format!("inode {} not found", ino)))?;
        Ok(())
    }

    fn get_symlink(&self, ino: InodeNumber) -> Result<String> {
        let state = self.state.lock();
        let rec = Self::get(&state, ino)?;
        match &rec.kind {
            InodeKind::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::invalid_argument(format!(
                "inode {} is not a symlink",
                ino
            ))),
        }
    }

    fn read(
        &self,
        ino: InodeNumber,
        offset: u64,
        length: u64,
        profiler: &mut Profiler,
    ) -> Result<Vec<u8>> {
        profiler.add_event("memvol read");
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.access_time_ns = now_ns();
        match &rec.kind {
            InodeKind::File { data, .. } => {
                let size = rec.size.min(data.len() as u64);
                if offset >= size {
                    return Ok(Vec::new());
                }
                let end = size.min(offset.saturating_add(length));
                Ok(data[offset as usize..end as usize].to_vec())
            }
            _ => Err(FsError::not_file(format!("inode {} is not a file", ino))),
        }
    }

    fn write(
        &self,
        ino: InodeNumber,
        offset: u64,
        buf: &[u8],
        profiler: &mut Profiler,
    ) -> Result<()> {
        profiler.add_event("memvol write");
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        match &mut rec.kind {
            InodeKind::File { data, .. } => {
                let end = offset as usize + buf.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[offset as usize..end].copy_from_slice(buf);
                rec.size = rec.size.max(end as u64);
                rec.num_writes += 1;
                let now = now_ns();
                rec.modification_time_ns = now;
                rec.attr_change_time_ns = now;
                Ok(())
            }
            _ => Err(FsError::not_file(format!("inode {} is not a file", ino))),
        }
    }

    fn flush(&self, ino: InodeNumber, _and_purge: bool) -> Result<()> {
        let state = self.state.lock();
        Self::get(&state, ino)?;
        Ok(())
    }

    fn wrote(
        &self,
        ino: InodeNumber,
        file_offset: u64,
        object_path: &str,
        object_offset: u64,
        length: u64,
        append: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        match &mut rec.kind {
            InodeKind::File { data, extents } => {
                if !append {
                    extents.clear();
                    data.clear();
                    rec.size = 0;
                }
                extents.push(Extent {
                    file_offset,
                    object_path: object_path.to_string(),
                    object_offset,
                    length,
                });
                rec.size = rec.size.max(file_offset + length);
                rec.num_writes += 1;
                let now = now_ns();
                rec.modification_time_ns = now;
                rec.attr_change_time_ns = now;
                Ok(())
            }
            _ => Err(FsError::not_file(format!("inode {} is not a file", ino))),
        }
    }

    fn coalesce(
        &self,
        dest_dir: InodeNumber,
        dest_name: &str,
        elements: &[CoalesceElement],
    ) -> Result<CoalesceResult> {
        let mut state = self.state.lock();

        {
            let rec = Self::get(&state, dest_dir)?;
            Self::dir_entries(rec, dest_dir)?;
        }

        // Validate everything before mutating anything.
        for element in elements {
            let dir_rec = Self::get(&state, element.containing_dir)?;
            let entries = Self::dir_entries(dir_rec, element.containing_dir)?;
            match entries.get(&element.name) {
                Some(ino) if *ino == element.ino => {}
                _ => {
                    return Err(FsError::not_found(format!(
                        "entry '{}' not found in directory {}",
                        element.name, element.containing_dir
                    )))
                }
            }
            let element_rec = Self::get(&state, element.ino)?;
            if element_rec.inode_type() != InodeType::File {
                return Err(FsError::not_file(format!(
                    "inode {} is not a file",
                    element.ino
                )));
            }
        }
        let displaced = {
            let rec = Self::get(&state, dest_dir)?;
            let entries = Self::dir_entries(rec, dest_dir)?;
            entries.get(dest_name).copied()
        };
        if let Some(displaced_ino) = displaced {
            if Self::get(&state, displaced_ino)?.inode_type() == InodeType::Dir {
                return Err(FsError::is_dir(format!(
                    "'{}' is a directory in {}",
                    dest_name, dest_dir
                )));
            }
        }

        // Gather content.
        let mut dest_data: Vec<u8> = Vec::new();
        let mut dest_extents: Vec<Extent> = Vec::new();
        let mut cursor: u64 = 0;
        for element in elements {
            let rec = Self::get(&state, element.ino)?;
            if let InodeKind::File { data, extents } = &rec.kind {
                let mut padded = data.clone();
                padded.resize(rec.size as usize, 0);
                dest_data.extend_from_slice(&padded);
                if extents.is_empty() && rec.size > 0 {
                    dest_extents.push(Extent {
                        file_offset: cursor,
                        object_path: format!("{}/{}-data", self.name, element.ino),
                        object_offset: 0,
                        length: rec.size,
                    });
                } else {
                    for extent in extents {
                        dest_extents.push(Extent {
                            file_offset: cursor + extent.file_offset,
                            object_path: extent.object_path.clone(),
                            object_offset: extent.object_offset,
                            length: extent.length,
                        });
                    }
                }
                cursor += rec.size;
            }
        }

        // Unlink the elements, dropping inodes that lose their last link.
        for element in elements {
            Self::unlink_locked(&mut state, element.containing_dir, &element.name)?;
            if Self::get(&state, element.ino)?.link_count == 0 {
                state.inodes.remove(&element.ino.as_u64());
            }
        }

        if displaced.is_some() {
            let displaced_ino = Self::unlink_locked(&mut state, dest_dir, dest_name)?;
            if Self::get(&state, displaced_ino)?.link_count == 0 {
                state.inodes.remove(&displaced_ino.as_u64());
            }
        }

        let ino = Self::alloc_ino(&mut state);
        let mut rec = InodeRec::new(
            InodeKind::File {
                data: dest_data,
                extents: dest_extents,
            },
            0o644,
            0,
            0,
        );
        rec.size = cursor;
        rec.num_writes = elements.len() as u64;
        let mtime = rec.modification_time_ns;
        let num_writes = rec.num_writes;
        state.inodes.insert(ino.as_u64(), rec);
        Self::link_locked(&mut state, dest_dir, dest_name, ino)?;

        Ok(CoalesceResult {
            ino,
            modification_time_ns: mtime,
            num_writes,
        })
    }

    fn num_dir_entries(&self, ino: InodeNumber) -> Result<u64> {
        let state = self.state.lock();
        let rec = Self::get(&state, ino)?;
        Ok(Self::dir_entries(rec, ino)?.len() as u64)
    }

    fn get_link_count(&self, ino: InodeNumber) -> Result<u64> {
        let state = self.state.lock();
        Ok(Self::get(&state, ino)?.link_count)
    }

    fn read_dir(
        &self,
        ino: InodeNumber,
        max_entries: u64,
        max_buf_size: u64,
        prev_basename: &str,
    ) -> Result<(Vec<DirEntry>, bool)> {
        let state = self.state.lock();
        let rec = Self::get(&state, ino)?;
        let entries = Self::dir_entries(rec, ino)?;

        if !prev_basename.is_empty() {
            match entries.keys().next_back() {
                Some(last) if prev_basename > last.as_str() => {
                    return Err(FsError::not_found(format!(
                        "no entry after '{}' in directory {}",
                        prev_basename, ino
                    )));
                }
                _ => {}
            }
        }

        let mut out = Vec::new();
        let mut buf_used: u64 = 0;
        let mut more = false;
        for (location, (name, entry_ino)) in entries.iter().enumerate() {
            if name.as_str() <= prev_basename {
                continue;
            }
            let entry_cost = name.len() as u64 + 32;
            let entry_limit_hit = max_entries != 0 && out.len() as u64 >= max_entries;
            let buf_limit_hit = max_buf_size != 0 && buf_used + entry_cost > max_buf_size
                && !out.is_empty();
            if entry_limit_hit || buf_limit_hit {
                more = true;
                break;
            }
            buf_used += entry_cost;
            out.push(DirEntry {
                ino: *entry_ino,
                basename: name.clone(),
                location: location as i64,
            });
        }

        Ok((out, more))
    }

    fn read_dir_at(&self, ino: InodeNumber, prev_location: i64) -> Result<DirEntry> {
        let state = self.state.lock();
        let rec = Self::get(&state, ino)?;
        let entries = Self::dir_entries(rec, ino)?;

        let index = (prev_location + 1).max(0) as usize;
        match entries.iter().nth(index) {
            Some((name, entry_ino)) => Ok(DirEntry {
                ino: *entry_ino,
                basename: name.clone(),
                location: index as i64,
            }),
            None => Err(FsError::not_found(format!(
                "no entry at location {} in directory {}",
                index, ino
            ))),
        }
    }

    fn get_read_plan(
        &self,
        ino: InodeNumber,
        offset: u64,
        length: u64,
    ) -> Result<Vec<ReadPlanStep>> {
        let state = self.state.lock();
        let rec = Self::get(&state, ino)?;
        let extents = match &rec.kind {
            InodeKind::File { extents, .. } => extents,
            _ => return Err(FsError::not_file(format!("inode {} is not a file", ino))),
        };

        let size = rec.size;
        if offset >= size || length == 0 {
            return Ok(Vec::new());
        }
        let want_end = size.min(offset.saturating_add(length));

        if extents.is_empty() {
            return Ok(vec![ReadPlanStep {
                object_path: format!("{}/{}-data", self.name, ino),
                offset,
                length: want_end - offset,
            }]);
        }

        let mut plan = Vec::new();
        for extent in extents {
            let extent_end = extent.file_offset + extent.length;
            let overlap_start = offset.max(extent.file_offset);
            let overlap_end = want_end.min(extent_end);
            if overlap_start >= overlap_end {
                continue;
            }
            plan.push(ReadPlanStep {
                object_path: extent.object_path.clone(),
                offset: extent.object_offset + (overlap_start - extent.file_offset),
                length: overlap_end - overlap_start,
            });
        }
        Ok(plan)
    }

    fn get_stream(&self, ino: InodeNumber, name: &str) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let rec = Self::get(&state, ino)?;
        rec.streams.get(name).cloned().ok_or_else(|| {
            FsError::stream_not_found(format!("stream '{}' not found on inode {}", name, ino))
        })
    }

    fn put_stream(&self, ino: InodeNumber, name: &str, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.streams.insert(name.to_string(), data.to_vec());
        rec.attr_change_time_ns = now_ns();
        Ok(())
    }

    fn delete_stream(&self, ino: InodeNumber, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        if rec.streams.remove(name).is_none() {
            return Err(FsError::stream_not_found(format!(
                "stream '{}' not found on inode {}",
                name, ino
            )));
        }
        rec.attr_change_time_ns = now_ns();
        Ok(())
    }

    fn set_creation_time(&self, ino: InodeNumber, time_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.creation_time_ns = time_ns;
        rec.attr_change_time_ns = now_ns();
        Ok(())
    }

    fn set_modification_time(&self, ino: InodeNumber, time_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.modification_time_ns = time_ns;
        rec.attr_change_time_ns = now_ns();
        Ok(())
    }

    fn set_access_time(&self, ino: InodeNumber, time_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.access_time_ns = time_ns;
        Ok(())
    }

    fn set_attr_change_time(&self, ino: InodeNumber, time_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.attr_change_time_ns = time_ns;
        Ok(())
    }

    fn set_size(&self, ino: InodeNumber, size: u64) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        match &mut rec.kind {
            InodeKind::File { data, .. } => {
                data.resize(size as usize, 0);
                rec.size = size;
                let now = now_ns();
                rec.modification_time_ns = now;
                rec.attr_change_time_ns = now;
                Ok(())
            }
            _ => Err(FsError::not_file(format!("inode {} is not a file", ino))),
        }
    }

    fn set_owner_user_id(&self, ino: InodeNumber, uid: u32) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.user_id = uid;
        rec.attr_change_time_ns = now_ns();
        Ok(())
    }

    fn set_owner_group_id(&self, ino: InodeNumber, gid: u32) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.group_id = gid;
        rec.attr_change_time_ns = now_ns();
        Ok(())
    }

    fn set_owner_user_group_id(&self, ino: InodeNumber, uid: u32, gid: u32) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.user_id = uid;
        rec.group_id = gid;
        rec.attr_change_time_ns = now_ns();
        Ok(())
    }

    fn set_perm_mode(&self, ino: InodeNumber, mode: u32) -> Result<()> {
        let mut state = self.state.lock();
        let rec = Self::get_mut(&mut state, ino)?;
        rec.mode = mode;
        rec.attr_change_time_ns = now_ns();
        Ok(())
    }

    fn provision_object(&self) -> Result<String> {
        let mut state = self.state.lock();
        let object = state.next_object;
        state.next_object += 1;
        Ok(format!("{}/prov-{:08}", self.name, object))
    }

    fn get_fsid(&self) -> u64 {
        self.fsid
    }

    fn validate(&self, ino: InodeNumber) -> Result<()> {
        let state = self.state.lock();
        Self::get(&state, ino)?;
        Ok(())
    }
}

/// Provider handing out [`MemoryVolume`] handles by name.
pub struct MemoryVolumeProvider {
    volumes: Mutex<HashMap<String, Arc<MemoryVolume>>>,
    next_fsid: Mutex<u64>,
}

impl MemoryVolumeProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self {
            volumes: Mutex::new(HashMap::new()),
            next_fsid: Mutex::new(1),
        }
    }

    /// Creates (or returns the existing) volume with the given name.
    pub fn create_volume(&self, name: &str) -> Arc<MemoryVolume> {
        let mut volumes = self.volumes.lock();
        if let Some(volume) = volumes.get(name) {
            return volume.clone();
        }
        let fsid = {
            let mut next = self.next_fsid.lock();
            let fsid = *next;
            *next += 1;
            fsid
        };
        let volume = Arc::new(MemoryVolume::new(name, fsid));
        volumes.insert(name.to_string(), volume.clone());
        volume
    }
}

impl Default for MemoryVolumeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeProvider for MemoryVolumeProvider {
    fn fetch_volume_handle(&self, volume_name: &str) -> Result<Arc<dyn VolumeHandle>> {
        let volumes = self.volumes.lock();
        volumes
            .get(volume_name)
            .map(|volume| volume.clone() as Arc<dyn VolumeHandle>)
            .ok_or_else(|| FsError::not_found(format!("no such volume '{}'", volume_name)))
    }
}
