//! # 操作层
//!
//! 以 inode 编号为句柄实现 [`FilesystemOps`]。
//!
//! 修改操作都分三步：先在 inode 锁内校验全部前置条件，再分配并载入要改动的块，
//! 最后一次性写回缓存。只有第二步可能失败，失败时退还已分配的资源，
//! 因此调用者看不到改了一半的结构。
//!
//! 同时持有多个 inode 锁时一律按编号从小到大加锁。

use alloc::collections::BTreeSet;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;

use enumflags2::BitFlags;
use spin::{Mutex, RwLockWriteGuard};
use vfs::{DirEntry, DirEntryType, Error, FilesystemOps, RenameFlag, Result, Stat, StatFs};

use crate::block_cache::BlockCache;
use crate::ffs::{FlatFileSystem, InodeState};
use crate::layout::{DIR_ENTRIES, DirBlock, IndexBlock, InodeKind, InodeRecord, validate_name};
use crate::{BLOCK_SIZE, MAX_FILE_SIZE, ROOT_INODE};

impl FilesystemOps for FlatFileSystem {
    #[inline]
    fn root(&self) -> u32 {
        ROOT_INODE
    }

    fn lookup(&self, dir: u32, name: &str) -> Result<Option<u32>> {
        validate_name(name)?;
        let dir = self.iget(dir)?;
        let record = dir.read();
        live_dir(&record)?;

        let entries = self.read_dir_block(record.index_block)?;
        entries
            .find_entry(record.entry_count(), name)
            .map(|slot| self.entry_target(entries.entry(slot).inode()))
            .transpose()
    }

    fn create(&self, dir: u32, name: &str, mode: u32) -> Result<u32> {
        self.new_node(dir, name, mode, InodeKind::File)
    }

    fn mkdir(&self, dir: u32, name: &str, mode: u32) -> Result<u32> {
        self.new_node(dir, name, mode, InodeKind::Directory)
    }

    fn unlink(&self, dir: u32, name: &str) -> Result<()> {
        self.remove_node(dir, name, InodeKind::File)
    }

    fn rmdir(&self, dir: u32, name: &str) -> Result<()> {
        self.remove_node(dir, name, InodeKind::Directory)
    }

    fn rename(
        &self,
        old_dir: u32,
        old_name: &str,
        new_dir: u32,
        new_name: &str,
        flags: BitFlags<RenameFlag>,
    ) -> Result<()> {
        // 从不覆盖已有项，NoReplace 本就是默认语义
        if flags.intersects(RenameFlag::Exchange | RenameFlag::Whiteout) {
            log::warn!("rename: unsupported flags {flags:?}");
            return Err(Error::InvalidArgument);
        }
        validate_name(old_name)?;
        validate_name(new_name)?;

        if old_dir == new_dir {
            self.rename_in_place(old_dir, old_name, new_name)
        } else {
            self.move_entry(old_dir, old_name, new_dir, new_name)
        }
    }

    fn read(&self, inode: u32, offset: usize, len: usize) -> Result<Vec<u8>> {
        let state = self.iget(inode)?;
        let record = state.read();
        live_file(&record)?;

        let size = record.filesize as usize;
        if offset >= size || len == 0 {
            return Ok(Vec::new());
        }
        let end = offset + len.min(size - offset);

        let index = self.read_index_block(record.index_block)?;
        let mut blocks = index.data_blocks().skip(offset / BLOCK_SIZE);
        let mut buf = Vec::with_capacity(end - offset);
        let mut pos = offset;
        while pos < end {
            let block_id = blocks
                .next()
                .ok_or(Error::Corrupted("file size exceeds its index block"))?;
            self.check_data_block(block_id)?;

            let lo = pos % BLOCK_SIZE;
            let n = (BLOCK_SIZE - lo).min(end - pos);
            self.block(block_id)?
                .lock()
                .map(|data| buf.extend_from_slice(&data[lo..lo + n]));
            pos += n;
        }

        Ok(buf)
    }

    fn write(&self, inode: u32, offset: usize, buf: &[u8], append: bool) -> Result<usize> {
        let state = self.iget(inode)?;
        let mut record = state.write();
        live_file(&record)?;

        let start = if append {
            record.filesize as usize
        } else {
            offset
        };
        let end = match start.checked_add(buf.len()) {
            Some(end) if end <= MAX_FILE_SIZE => end,
            _ => {
                log::warn!(
                    "write of {} bytes at {start} to inode {inode} passes the size limit",
                    buf.len()
                );
                return Err(Error::NoSpace);
            }
        };
        if buf.is_empty() {
            return Ok(0);
        }

        let slot = self.record_slot(inode)?;
        let (mut index, old_index) = match record.index_block {
            0 => (IndexBlock::default(), None),
            block_id => {
                self.check_data_block(block_id)?;
                let handle = self.block(block_id)?;
                let index = handle.lock().map(IndexBlock::decode);
                (index, Some(handle))
            }
        };

        let populated = index.populated();
        let needed = end.div_ceil(BLOCK_SIZE);
        // 写入区间之前的空洞也要补上数据块，索引里不能有缺口
        let from = (start / BLOCK_SIZE).min(populated);
        let reserved =
            self.alloc_blocks(needed.saturating_sub(populated) + usize::from(old_index.is_none()))?;

        let pinned = (|| -> Result<_> {
            let mut reserved = reserved.iter().copied();
            let (index_block, index_handle) = match old_index {
                Some(handle) => (record.index_block, handle),
                None => {
                    let block_id = reserved.next().ok_or(Error::NoSpace)?;
                    (block_id, self.zeroed_block(block_id)?)
                }
            };
            for _ in populated..needed {
                index.grow_by_one(|| reserved.next().ok_or(Error::NoSpace))?;
            }

            let mut data = Vec::with_capacity(needed - from);
            for (logical, block_id) in index.data_blocks().enumerate().skip(from).take(needed - from) {
                self.check_data_block(block_id)?;
                data.push(if logical < populated {
                    self.block(block_id)?
                } else {
                    self.zeroed_block(block_id)?
                });
            }
            Ok((index_block, index_handle, data))
        })();
        let (index_block, index_handle, data) = match pinned {
            Ok(pinned) => pinned,
            Err(err) => {
                log::warn!("write to inode {inode} failed, releasing {} blocks: {err}", reserved.len());
                self.free_blocks(&reserved);
                return Err(err);
            }
        };

        let mut pos = start;
        for (logical, handle) in (from..).zip(&data) {
            let block_start = logical * BLOCK_SIZE;
            if block_start + BLOCK_SIZE <= pos {
                continue;
            }
            let lo = pos - block_start;
            let n = (BLOCK_SIZE - lo).min(end - pos);
            let src = &buf[pos - start..pos - start + n];
            handle
                .lock()
                .map_mut(|block| block[lo..lo + n].copy_from_slice(src));
            pos += n;
        }
        debug_assert_eq!(pos, end);

        index_handle.lock().map_mut(|block| index.encode(block));
        record.index_block = index_block;
        record.filesize = record.filesize.max(end as u32);
        record.set_used_blocks(index.populated());
        slot.store(&record);

        log::trace!("wrote {} bytes at {start} to inode {inode}", buf.len());
        Ok(buf.len())
    }

    fn readdir(&self, dir: u32) -> Result<Vec<DirEntry>> {
        let dir = self.iget(dir)?;
        let record = dir.read();
        live_dir(&record)?;

        let entries = self.read_dir_block(record.index_block)?;
        entries
            .live(record.entry_count())
            .iter()
            .map(|entry| {
                Ok(DirEntry {
                    inode: entry.inode(),
                    ty: self.entry_type(entry.inode())?,
                    name: entry.name()?.to_string(),
                })
            })
            .collect()
    }

    fn stat(&self, inode: u32) -> Result<Stat> {
        let state = self.iget(inode)?;
        let record = state.read();
        live(&record)?;

        let (ty, links, blocks) = if record.is_dir() {
            let entries = self.read_dir_block(record.index_block)?;
            let mut subdirs = 0;
            for entry in entries.live(record.entry_count()) {
                if self.entry_type(entry.inode())? == DirEntryType::Directory {
                    subdirs += 1;
                }
            }
            (DirEntryType::Directory, 2 + subdirs, 1)
        } else {
            let index = usize::from(record.index_block != 0);
            (DirEntryType::Regular, 1, record.used_blocks() + index)
        };

        Ok(Stat {
            inode,
            mode: record.mode,
            ty,
            links,
            size: record.filesize as u64,
            block_size: BLOCK_SIZE as u64,
            blocks: blocks as u64,
        })
    }

    fn statfs(&self) -> StatFs {
        FlatFileSystem::statfs(self)
    }

    fn sync(&self) -> Result<()> {
        FlatFileSystem::sync(self)
    }
}

impl FlatFileSystem {
    fn new_node(&self, dir: u32, name: &str, mode: u32, kind: InodeKind) -> Result<u32> {
        validate_name(name)?;
        let parent = self.iget(dir)?;
        let mut parent_record = parent.write();
        live_dir(&parent_record)?;

        let dir_handle = self.dir_handle(&parent_record)?;
        let mut entries = dir_handle.lock().map(DirBlock::decode);
        let count = parent_record.entry_count();
        if entries.find_entry(count, name).is_some() {
            log::warn!("{name:?} already exists in directory {dir}");
            return Err(Error::AlreadyExists);
        }
        if count >= DIR_ENTRIES {
            log::warn!("directory {dir} is full, can't add {name:?}");
            return Err(Error::DirectoryFull);
        }
        let parent_slot = self.record_slot(dir)?;

        let inode = self.alloc_inode()?;
        let block_id = match kind {
            InodeKind::File => 0,
            InodeKind::Directory => match self.alloc_block() {
                Ok(block_id) => block_id,
                Err(err) => {
                    self.free_inode(inode);
                    return Err(err);
                }
            },
        };

        let pinned = (|| -> Result<_> {
            let slot = self.record_slot(inode)?;
            let dir_block = match block_id {
                0 => None,
                block_id => Some(self.zeroed_block(block_id)?),
            };
            entries.insert(count, name, inode)?;
            Ok((slot, dir_block))
        })();
        let (slot, _dir_block) = match pinned {
            Ok(pinned) => pinned,
            Err(err) => {
                log::warn!("rolling back inode {inode} for {name:?}: {err}");
                if block_id != 0 {
                    self.free_blocks(&[block_id]);
                }
                self.free_inode(inode);
                return Err(err);
            }
        };

        slot.store(&InodeRecord::new(kind, mode, block_id));
        dir_handle.lock().map_mut(|block| entries.encode(block));
        parent_record.set_entry_count(count + 1);
        parent_slot.store(&parent_record);

        log::debug!("{kind:?} {name:?} created as inode {inode} in directory {dir}");
        Ok(inode)
    }

    fn remove_node(&self, dir: u32, name: &str, kind: InodeKind) -> Result<()> {
        validate_name(name)?;
        let parent = self.iget(dir)?;

        loop {
            let target = {
                let record = parent.read();
                live_dir(&record)?;
                let entries = self.read_dir_block(record.index_block)?;
                let slot = entries
                    .find_entry(record.entry_count(), name)
                    .ok_or(Error::NotFound)?;
                self.entry_target(entries.entry(slot).inode())?
            };
            if target == dir || target == ROOT_INODE {
                log::error!("directory {dir} has an entry {name:?} pointing at inode {target}");
                return Err(Error::Corrupted("directory entry points at a directory above it"));
            }

            let child = match self.iget(target) {
                Ok(child) => child,
                // 解锁期间目标已被删除，名字可能已指向别处
                Err(Error::NotFound) if self.lookup(dir, name)? != Some(target) => continue,
                Err(err) => return Err(err),
            };
            let (mut parent_record, mut child_record) = lock_pair(&parent, &child);
            live_dir(&parent_record)?;

            let dir_handle = self.dir_handle(&parent_record)?;
            let mut entries = dir_handle.lock().map(DirBlock::decode);
            let count = parent_record.entry_count();
            let slot = match entries.find_entry(count, name) {
                Some(slot) if entries.entry(slot).inode() == target => slot,
                Some(_) => continue,
                None => return Err(Error::NotFound),
            };
            if !child_record.is_live() {
                return Err(Error::Corrupted("directory entry points at a free inode"));
            }

            match (kind, child_record.kind()) {
                (InodeKind::File, InodeKind::Directory) => return Err(Error::IsADirectory),
                (InodeKind::Directory, InodeKind::File) => return Err(Error::NotADirectory),
                (InodeKind::Directory, InodeKind::Directory) if child_record.entry_count() > 0 => {
                    log::warn!("rmdir {name:?}: directory {target} is not empty");
                    return Err(Error::DirectoryNotEmpty);
                }
                _ => {}
            }

            let released = self.owned_blocks(&child_record)?;
            let parent_slot = self.record_slot(dir)?;
            let child_slot = self.record_slot(target)?;

            entries.remove(count, slot);
            dir_handle.lock().map_mut(|block| entries.encode(block));
            parent_record.set_entry_count(count - 1);
            parent_slot.store(&parent_record);

            *child_record = InodeRecord::default();
            child_slot.store(&child_record);
            self.forget(target);
            self.free_blocks(&released);
            self.free_inode(target);

            log::debug!(
                "{name:?} (inode {target}) removed from directory {dir}, {} blocks released",
                released.len()
            );
            return Ok(());
        }
    }

    fn rename_in_place(&self, dir: u32, old_name: &str, new_name: &str) -> Result<()> {
        let parent = self.iget(dir)?;
        let record = parent.write();
        live_dir(&record)?;

        let dir_handle = self.dir_handle(&record)?;
        let mut entries = dir_handle.lock().map(DirBlock::decode);
        let count = record.entry_count();
        let slot = entries.find_entry(count, old_name).ok_or(Error::NotFound)?;
        if old_name == new_name {
            return Ok(());
        }
        if entries.find_entry(count, new_name).is_some() {
            log::warn!("rename {old_name:?}: {new_name:?} already exists in directory {dir}");
            return Err(Error::AlreadyExists);
        }

        entries.rename(slot, new_name)?;
        dir_handle.lock().map_mut(|block| entries.encode(block));

        log::debug!("renamed {old_name:?} to {new_name:?} in directory {dir}");
        Ok(())
    }

    fn move_entry(&self, old_dir: u32, old_name: &str, new_dir: u32, new_name: &str) -> Result<()> {
        let source = self.iget(old_dir)?;
        let dest = self.iget(new_dir)?;
        let _tree = self.rename_lock();
        let (mut src_record, mut dst_record) = lock_pair(&source, &dest);
        live_dir(&src_record)?;
        live_dir(&dst_record)?;

        let src_handle = self.dir_handle(&src_record)?;
        let dst_handle = self.dir_handle(&dst_record)?;
        let mut src_entries = src_handle.lock().map(DirBlock::decode);
        let mut dst_entries = dst_handle.lock().map(DirBlock::decode);
        let src_count = src_record.entry_count();
        let dst_count = dst_record.entry_count();

        let slot = src_entries
            .find_entry(src_count, old_name)
            .ok_or(Error::NotFound)?;
        let moved = self.entry_target(src_entries.entry(slot).inode())?;
        if dst_entries.find_entry(dst_count, new_name).is_some() {
            log::warn!("rename {old_name:?}: {new_name:?} already exists in directory {new_dir}");
            return Err(Error::AlreadyExists);
        }
        if dst_count >= DIR_ENTRIES {
            log::warn!("rename {old_name:?}: directory {new_dir} is full");
            return Err(Error::DirectoryFull);
        }
        if self.peek_record(moved)?.is_dir() && self.in_subtree(moved, new_dir)? {
            log::warn!("rename {old_name:?}: can't move directory {moved} under itself");
            return Err(Error::InvalidArgument);
        }
        let src_slot = self.record_slot(old_dir)?;
        let dst_slot = self.record_slot(new_dir)?;

        dst_entries.insert(dst_count, new_name, moved)?;
        src_entries.remove(src_count, slot);

        dst_handle.lock().map_mut(|block| dst_entries.encode(block));
        src_handle.lock().map_mut(|block| src_entries.encode(block));
        dst_record.set_entry_count(dst_count + 1);
        dst_slot.store(&dst_record);
        src_record.set_entry_count(src_count - 1);
        src_slot.store(&src_record);

        log::debug!("moved {old_name:?} from directory {old_dir} to {new_name:?} in {new_dir}");
        Ok(())
    }
}

impl FlatFileSystem {
    fn dir_handle(&self, record: &InodeRecord) -> Result<Arc<Mutex<BlockCache>>> {
        self.check_data_block(record.index_block)?;
        self.block(record.index_block)
    }

    fn entry_type(&self, inode: u32) -> Result<DirEntryType> {
        Ok(if self.peek_record(self.entry_target(inode)?)?.is_dir() {
            DirEntryType::Directory
        } else {
            DirEntryType::Regular
        })
    }

    /// inode 删除后要退还的全部数据块，包括文件的索引块
    fn owned_blocks(&self, record: &InodeRecord) -> Result<Vec<u32>> {
        if record.is_dir() {
            self.check_data_block(record.index_block)?;
            return Ok(Vec::from([record.index_block]));
        }
        if record.index_block == 0 {
            return Ok(Vec::new());
        }

        let mut blocks = self.read_index_block(record.index_block)?.clear();
        for &block_id in &blocks {
            self.check_data_block(block_id)?;
        }
        blocks.push(record.index_block);
        Ok(blocks)
    }

    /// `inode` 是否位于以目录 `ancestor` 为根的子树中（含其自身）
    fn in_subtree(&self, ancestor: u32, inode: u32) -> Result<bool> {
        let mut visited = BTreeSet::new();
        let mut pending = Vec::from([ancestor]);
        while let Some(dir) = pending.pop() {
            if dir == inode {
                return Ok(true);
            }
            // 损坏的目录树可能成环
            if !visited.insert(dir) {
                continue;
            }
            let record = self.peek_record(dir)?;
            // 遍历期间被删掉的空目录
            if !record.is_live() || !record.is_dir() {
                continue;
            }
            let entries = self.read_dir_block(record.index_block)?;
            for entry in entries.live(record.entry_count()) {
                let child = self.entry_target(entry.inode())?;
                if self.peek_record(child)?.is_dir() {
                    pending.push(child);
                }
            }
        }
        Ok(false)
    }
}

/// 按编号从小到大加写锁，返回的守卫与参数顺序一致
fn lock_pair<'a>(
    a: &'a InodeState,
    b: &'a InodeState,
) -> (
    RwLockWriteGuard<'a, InodeRecord>,
    RwLockWriteGuard<'a, InodeRecord>,
) {
    debug_assert_ne!(a.inode(), b.inode());
    if a.inode() < b.inode() {
        let first = a.write();
        (first, b.write())
    } else {
        let first = b.write();
        (a.write(), first)
    }
}

#[inline]
fn live(record: &InodeRecord) -> Result<()> {
    if !record.is_live() {
        return Err(Error::NotFound);
    }
    Ok(())
}

fn live_dir(record: &InodeRecord) -> Result<()> {
    live(record)?;
    if !record.is_dir() {
        return Err(Error::NotADirectory);
    }
    Ok(())
}

fn live_file(record: &InodeRecord) -> Result<()> {
    live(record)?;
    if record.is_dir() {
        return Err(Error::IsADirectory);
    }
    Ok(())
}
