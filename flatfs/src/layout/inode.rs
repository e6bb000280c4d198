//! inode 存储区
//!
//! 每条 inode 记录定长 16 字节，按编号顺序平铺在 inode 存储区，
//! 一个块恰好容纳 [`INODES_PER_BLOCK`] 条。
//!
//! 目录与文件共用记录格式，只是对字段的解释不同：
//! - 目录的 `index_block` 指向唯一的目录块，`count` 为目录项数；
//! - 文件的 `index_block` 指向索引块，`count` 为已用数据块数。

use alloc::sync::Arc;

use enumflags2::{BitFlags, bitflags};
use spin::Mutex;
use vfs::{Error, Result};

use super::{get_u32, put_u32};
use crate::BLOCK_SIZE;
use crate::block_cache::{BlockCache, BlockCacheManager};

pub const INODE_SIZE: usize = 16;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// 权限位，只存储不解释
const PERMISSION_MASK: u32 = 0o7777;

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileType {
    DIR = 0o040000,
    REG = 0o100000,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InodeRecord {
    /// 类型位 + 权限位
    pub mode: u32,
    /// 文件的索引块或目录的目录块，0 表示尚未分配
    pub index_block: u32,
    /// 字节数
    pub filesize: u32,
    /// 文件：已用数据块数；目录：目录项数
    count: u32,
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum InodeKind {
    #[default]
    File,
    Directory,
}

impl InodeRecord {
    pub fn new(kind: InodeKind, mode: u32, index_block: u32) -> Self {
        let ty = match kind {
            InodeKind::File => FileType::REG,
            InodeKind::Directory => FileType::DIR,
        };
        let filesize = match kind {
            InodeKind::File => 0,
            InodeKind::Directory => BLOCK_SIZE as u32,
        };

        Self {
            mode: ty as u32 | (mode & PERMISSION_MASK),
            index_block,
            filesize,
            count: 0,
        }
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            mode: get_u32(bytes, 0),
            index_block: get_u32(bytes, 4),
            filesize: get_u32(bytes, 8),
            count: get_u32(bytes, 12),
        }
    }

    pub fn encode(&self, bytes: &mut [u8]) {
        put_u32(bytes, 0, self.mode);
        put_u32(bytes, 4, self.index_block);
        put_u32(bytes, 8, self.filesize);
        put_u32(bytes, 12, self.count);
    }

    /// 模式为零的记录不对应任何文件
    #[inline]
    pub fn is_live(&self) -> bool {
        self.mode != 0
    }

    pub fn kind(&self) -> InodeKind {
        if BitFlags::<FileType>::from_bits_truncate(self.mode).contains(FileType::DIR) {
            InodeKind::Directory
        } else {
            InodeKind::File
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == InodeKind::Directory
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn set_entry_count(&mut self, entries: usize) {
        debug_assert!(self.is_dir());
        self.count = entries as u32;
    }

    #[inline]
    pub fn used_blocks(&self) -> usize {
        self.count as usize
    }

    #[inline]
    pub fn set_used_blocks(&mut self, blocks: usize) {
        debug_assert!(!self.is_dir());
        self.count = blocks as u32;
    }
}

/// inode 编号到磁盘位置的翻译
#[derive(Debug, Clone, Copy)]
pub struct InodeTable {
    start_block: u32,
    inodes: u32,
}

/// 已载入缓存的一条 inode 记录；持有期间其所在块不会被换出，
/// 因而对它的读写不会再触发 I/O。
pub struct RecordSlot {
    cache: Arc<Mutex<BlockCache>>,
    offset: usize,
}

impl InodeTable {
    pub fn new(start_block: u32, inodes: u32) -> Self {
        Self {
            start_block,
            inodes,
        }
    }

    #[inline]
    pub fn inodes(&self) -> u32 {
        self.inodes
    }

    /// 通过编号获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
    pub fn position(&self, inode: u32) -> Result<(u32, usize)> {
        if inode >= self.inodes {
            log::warn!("inode {inode} is out of range {}", self.inodes);
            return Err(Error::NotFound);
        }

        let per_block = INODES_PER_BLOCK as u32;
        let block_id = self.start_block + inode / per_block;
        let block_offset = (inode % per_block) as usize * INODE_SIZE;

        Ok((block_id, block_offset))
    }

    pub fn slot(&self, cache: &BlockCacheManager, inode: u32) -> Result<RecordSlot> {
        let (block_id, offset) = self.position(inode)?;
        Ok(RecordSlot {
            cache: cache.get(block_id as usize)?,
            offset,
        })
    }

    #[inline]
    pub fn read(&self, cache: &BlockCacheManager, inode: u32) -> Result<InodeRecord> {
        Ok(self.slot(cache, inode)?.load())
    }

    #[inline]
    pub fn write(&self, cache: &BlockCacheManager, inode: u32, record: &InodeRecord) -> Result<()> {
        self.slot(cache, inode)?.store(record);
        Ok(())
    }
}

impl RecordSlot {
    pub fn load(&self) -> InodeRecord {
        self.cache
            .lock()
            .map(|block| InodeRecord::decode(&block[self.offset..self.offset + INODE_SIZE]))
    }

    pub fn store(&self, record: &InodeRecord) {
        self.cache
            .lock()
            .map_mut(|block| record.encode(&mut block[self.offset..self.offset + INODE_SIZE]));
    }
}
