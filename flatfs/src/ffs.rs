//! # 卷管理层
//!
//! 挂载时把超级块与两张位图读进内存，之后所有分配与回收都只改动内存中的位图，
//! 直到 [`FlatFileSystem::sync`] 才把位图与空闲计数写回磁盘。

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use block_dev::BlockDevice;
use spin::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use vfs::{Error, Result, StatFs};

use crate::block_cache::{BlockCache, BlockCacheManager};
use crate::layout::*;
use crate::{BLOCK_SIZE, ROOT_INODE};

/// 已挂载的卷
pub struct FlatFileSystem {
    layout: Layout,
    cache: BlockCacheManager,
    table: InodeTable,
    /// 分配锁：两张位图与空闲计数一起更新
    allocator: Mutex<Allocator>,
    /// 正在使用中的 inode，按编号索引
    active: Mutex<BTreeMap<u32, Weak<InodeState>>>,
    /// 跨目录移动目录时持有，保证目录树不会成环
    rename_lock: Mutex<()>,
}

struct Allocator {
    inode_bitmap: Bitmap,
    block_bitmap: Bitmap,
    free_inodes: u32,
    free_blocks: u32,
}

/// 内存中的 inode：磁盘记录的副本，外加保护它的读写锁。
///
/// 磁盘上的记录才是真相，每次修改副本后都会立刻写回缓存。
pub struct InodeState {
    inode: u32,
    record: RwLock<InodeRecord>,
}

impl InodeState {
    #[inline]
    pub fn inode(&self) -> u32 {
        self.inode
    }

    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, InodeRecord> {
        self.record.read()
    }

    #[inline]
    pub fn write(&self) -> RwLockWriteGuard<'_, InodeRecord> {
        self.record.write()
    }
}

impl FlatFileSystem {
    pub fn mount(block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let cache = BlockCacheManager::new(block_device);

        let sb = cache.get(0)?.lock().map(SuperBlock::decode);
        let layout = Layout::from_super_block(&sb)?;

        let inode_bitmap = Bitmap::load(
            &Self::read_region(&cache, layout.ifree_start(), layout.ifree_blocks)?,
            layout.total_inodes as usize,
        );
        let block_bitmap = Bitmap::load(
            &Self::read_region(&cache, layout.bfree_start(), layout.bfree_blocks)?,
            layout.total_blocks as usize,
        );

        // 超级块里的计数只在同步时落盘，以位图为准
        let free_inodes = inode_bitmap.count_free() as u32;
        let free_blocks = block_bitmap.count_free() as u32;
        if free_inodes != sb.free_inodes || free_blocks != sb.free_blocks {
            log::warn!(
                "superblock counters ({}, {}) disagree with bitmaps ({free_inodes}, {free_blocks})",
                sb.free_inodes,
                sb.free_blocks,
            );
        }

        let fs = Self {
            layout,
            table: InodeTable::new(layout.istore_start(), layout.total_inodes),
            cache,
            allocator: Mutex::new(Allocator {
                inode_bitmap,
                block_bitmap,
                free_inodes,
                free_blocks,
            }),
            active: Mutex::new(BTreeMap::new()),
            rename_lock: Mutex::new(()),
        };

        let root = fs.iget(ROOT_INODE)?;
        if !root.read().is_dir() {
            log::error!("inode {ROOT_INODE} is not a directory");
            return Err(Error::Corrupted("root inode is not a directory"));
        }

        log::info!(
            "mounted: {} blocks, {} inodes, {free_blocks} free blocks, {free_inodes} free inodes",
            layout.total_blocks,
            layout.total_inodes,
        );
        Ok(fs)
    }

    /// 把位图与空闲计数写回，再写回全部脏块
    pub fn sync(&self) -> Result<()> {
        let (inode_bytes, block_bytes, free_inodes, free_blocks) = {
            let allocator = self.allocator.lock();
            (
                allocator.inode_bitmap.serialize(),
                allocator.block_bitmap.serialize(),
                allocator.free_inodes,
                allocator.free_blocks,
            )
        };

        self.write_region(self.layout.ifree_start(), self.layout.ifree_blocks, &inode_bytes)?;
        self.write_region(self.layout.bfree_start(), self.layout.bfree_blocks, &block_bytes)?;

        let sb = SuperBlock::new(&self.layout, free_inodes, free_blocks);
        self.cache.get(0)?.lock().map_mut(|block| sb.encode(block));

        self.cache.sync_all()?;
        self.cache.block_device().sync()?;
        log::debug!("synced: {free_blocks} free blocks, {free_inodes} free inodes");
        Ok(())
    }

    pub fn unmount(self) -> Result<()> {
        self.sync()?;
        log::info!("unmounted");
        Ok(())
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn statfs(&self) -> StatFs {
        let allocator = self.allocator.lock();
        StatFs {
            block_size: BLOCK_SIZE as u64,
            total_blocks: self.layout.total_blocks as u64,
            free_blocks: allocator.free_blocks as u64,
            total_inodes: self.layout.total_inodes as u64,
            free_inodes: allocator.free_inodes as u64,
            name_len: NAME_LEN as u64,
        }
    }
}

/* inode 的获取与记录读写 */
impl FlatFileSystem {
    /// 获取正在使用的 inode，未激活时从磁盘读出记录
    pub fn iget(&self, inode: u32) -> Result<Arc<InodeState>> {
        let mut active = self.active.lock();

        if let Some(state) = active.get(&inode).and_then(Weak::upgrade) {
            return Ok(state);
        }

        self.table.position(inode)?;
        if self.allocator.lock().inode_bitmap.is_free(inode as usize) {
            return Err(Error::NotFound);
        }
        let record = self.table.read(&self.cache, inode)?;
        // 刚分配、记录尚未写入的 inode
        if !record.is_live() {
            log::debug!("inode {inode} is allocated but not initialized yet");
            return Err(Error::NotFound);
        }

        let state = Arc::new(InodeState {
            inode,
            record: RwLock::new(record),
        });
        active.retain(|_, state| state.strong_count() > 0);
        active.insert(inode, Arc::downgrade(&state));

        Ok(state)
    }

    #[inline]
    pub(crate) fn rename_lock(&self) -> spin::MutexGuard<'_, ()> {
        self.rename_lock.lock()
    }

    /// 已删除的 inode 不再能被 [`Self::iget`] 取到
    pub(crate) fn forget(&self, inode: u32) {
        self.active.lock().remove(&inode);
    }

    #[inline]
    pub(crate) fn record_slot(&self, inode: u32) -> Result<RecordSlot> {
        self.table.slot(&self.cache, inode)
    }

    /// 不加锁地读出记录，只用于查看子项类型等只读场合
    #[inline]
    pub(crate) fn peek_record(&self, inode: u32) -> Result<InodeRecord> {
        self.table.read(&self.cache, inode)
    }

    #[inline]
    pub(crate) fn block(&self, block_id: u32) -> Result<Arc<Mutex<BlockCache>>> {
        Ok(self.cache.get(block_id as usize)?)
    }

    #[inline]
    pub(crate) fn zeroed_block(&self, block_id: u32) -> Result<Arc<Mutex<BlockCache>>> {
        Ok(self.cache.get_zeroed(block_id as usize)?)
    }

    pub(crate) fn read_dir_block(&self, block_id: u32) -> Result<DirBlock> {
        self.check_data_block(block_id)?;
        Ok(self.block(block_id)?.lock().map(DirBlock::decode))
    }

    pub(crate) fn read_index_block(&self, block_id: u32) -> Result<IndexBlock> {
        self.check_data_block(block_id)?;
        Ok(self.block(block_id)?.lock().map(IndexBlock::decode))
    }

    /// 记录中的块编号必须落在数据区
    pub(crate) fn check_data_block(&self, block_id: u32) -> Result<()> {
        if block_id < self.layout.data_start || block_id >= self.layout.total_blocks {
            log::error!("block {block_id} is outside the data region");
            return Err(Error::Corrupted("block pointer outside the data region"));
        }
        Ok(())
    }

    /// 目录项里读出的 inode 编号，超出 inode 区域即为损坏
    pub(crate) fn entry_target(&self, inode: u32) -> Result<u32> {
        if inode >= self.table.inodes() {
            log::error!(
                "directory entry points at inode {inode}, volume has {}",
                self.table.inodes()
            );
            return Err(Error::Corrupted("entry inode out of range"));
        }
        Ok(inode)
    }
}

/* 分配与回收，全部在分配锁内完成 */
impl FlatFileSystem {
    pub fn alloc_inode(&self) -> Result<u32> {
        let mut allocator = self.allocator.lock();
        let Some(inode) = allocator.inode_bitmap.find_first_free() else {
            log::warn!("out of inodes");
            return Err(Error::NoSpace);
        };
        allocator.inode_bitmap.mark_used(inode);
        allocator.free_inodes -= 1;
        Ok(inode as u32)
    }

    pub fn alloc_block(&self) -> Result<u32> {
        Ok(self.alloc_blocks(1)?[0])
    }

    /// 一次分配 `count` 个块：要么全部成功，要么什么都不分配
    pub fn alloc_blocks(&self, count: usize) -> Result<Vec<u32>> {
        let mut allocator = self.allocator.lock();
        if count > allocator.free_blocks as usize {
            log::warn!(
                "need {count} blocks but only {} are free",
                allocator.free_blocks
            );
            return Err(Error::NoSpace);
        }

        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(block_id) = allocator.block_bitmap.find_first_free() else {
                // 计数与位图不符，退回已拿到的块
                for &block_id in &blocks {
                    allocator.block_bitmap.mark_free(block_id as usize);
                }
                allocator.free_blocks += blocks.len() as u32;
                log::error!("block bitmap exhausted while counter says otherwise");
                return Err(Error::NoSpace);
            };
            debug_assert!(block_id >= self.layout.data_start as usize);
            allocator.block_bitmap.mark_used(block_id);
            allocator.free_blocks -= 1;
            blocks.push(block_id as u32);
        }

        Ok(blocks)
    }

    pub fn free_inode(&self, inode: u32) {
        debug_assert_ne!(inode, ROOT_INODE);
        let mut allocator = self.allocator.lock();
        allocator.inode_bitmap.mark_free(inode as usize);
        allocator.free_inodes += 1;
    }

    pub fn free_blocks(&self, blocks: &[u32]) {
        let mut allocator = self.allocator.lock();
        for &block_id in blocks {
            debug_assert!(block_id >= self.layout.data_start);
            allocator.block_bitmap.mark_free(block_id as usize);
        }
        allocator.free_blocks += blocks.len() as u32;
    }
}

/* 一致性检查 */
impl FlatFileSystem {
    /// 检查磁盘结构的不变式：
    /// - 位图中空闲位数与空闲计数一致，元数据块全部占用；
    /// - 从根目录可达的每个目录只出现一次，其目录项紧凑、互不重名，且指向已分配的 inode；
    /// - 每个文件的索引块从 0 起连续占用，块数与文件大小相符，数据块都已分配。
    pub fn check(&self) -> Result<()> {
        let allocator = self.allocator.lock();
        if allocator.inode_bitmap.count_free() != allocator.free_inodes as usize
            || allocator.block_bitmap.count_free() != allocator.free_blocks as usize
        {
            return Err(Error::Corrupted("free counters disagree with bitmaps"));
        }
        if (0..self.layout.data_start as usize).any(|id| allocator.block_bitmap.is_free(id)) {
            return Err(Error::Corrupted("metadata block marked free"));
        }
        if allocator.inode_bitmap.is_free(ROOT_INODE as usize) {
            return Err(Error::Corrupted("root inode marked free"));
        }

        let block_used = |id: u32| -> Result<()> {
            self.check_data_block(id)?;
            if allocator.block_bitmap.is_free(id as usize) {
                return Err(Error::Corrupted("referenced block marked free"));
            }
            Ok(())
        };

        let mut visited = BTreeSet::from([ROOT_INODE]);
        let mut pending = Vec::from([ROOT_INODE]);
        while let Some(dir) = pending.pop() {
            let record = self.peek_record(dir)?;
            block_used(record.index_block)?;
            let count = record.entry_count();
            if count > DIR_ENTRIES {
                return Err(Error::Corrupted("entry count exceeds directory capacity"));
            }

            let block = self.read_dir_block(record.index_block)?;
            for (slot, entry) in block.live(count).iter().enumerate() {
                if entry.is_empty() {
                    return Err(Error::Corrupted("hole inside live directory entries"));
                }
                if block.find_entry(count, entry.name()?) != Some(slot) {
                    return Err(Error::Corrupted("duplicate name in directory"));
                }
                let inode = entry.inode();
                if inode as usize >= allocator.inode_bitmap.units() {
                    return Err(Error::Corrupted("entry inode out of range"));
                }
                if allocator.inode_bitmap.is_free(inode as usize) {
                    return Err(Error::Corrupted("entry points at a free inode"));
                }

                let child = self.peek_record(inode)?;
                if child.is_dir() {
                    // 目录没有硬链接，第二次遇到说明目录树里有环或重复引用
                    if !visited.insert(inode) {
                        return Err(Error::Corrupted("directory reachable twice"));
                    }
                    pending.push(inode);
                } else if child.index_block != 0 {
                    block_used(child.index_block)?;
                    let index = self.read_index_block(child.index_block)?;
                    if !index.is_dense() {
                        return Err(Error::Corrupted("hole inside file index block"));
                    }
                    let populated = index.populated();
                    if populated != child.used_blocks()
                        || populated != (child.filesize as usize).div_ceil(BLOCK_SIZE)
                    {
                        return Err(Error::Corrupted("file size disagrees with its blocks"));
                    }
                    index.data_blocks().try_for_each(&block_used)?;
                } else if child.filesize != 0 || child.used_blocks() != 0 {
                    return Err(Error::Corrupted("non-empty file without index block"));
                }
            }
            if (count..DIR_ENTRIES).any(|slot| !block.entry(slot).is_empty()) {
                return Err(Error::Corrupted("live entry past entry count"));
            }
        }

        Ok(())
    }
}

impl FlatFileSystem {
    fn read_region(cache: &BlockCacheManager, start: u32, blocks: u32) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(blocks as usize * BLOCK_SIZE);
        for block_id in start..start + blocks {
            cache
                .get(block_id as usize)?
                .lock()
                .map(|data| bytes.extend_from_slice(data));
        }
        Ok(bytes)
    }

    fn write_region(&self, start: u32, blocks: u32, bytes: &[u8]) -> Result<()> {
        for (block_id, chunk) in (start..start + blocks).zip(bytes.chunks(BLOCK_SIZE)) {
            self.cache
                .get(block_id as usize)?
                .lock()
                .map_mut(|data| data[..chunk.len()].copy_from_slice(chunk));
        }
        Ok(())
    }
}
