//! 索引块
//!
//! 普通文件只有一级间接索引：索引块连续存储**块编号**，
//! 每个编号指向一个**数据块**，0 表示空槽。
//! 第 i 个非零槽位就是文件的第 i 个逻辑块；良构的文件槽位从 0 起连续占用，不留空洞。

use alloc::vec::Vec;

use vfs::{Error, Result};

use super::{get_u32, put_u32};
use crate::{BLOCK_SIZE, DataBlock};

/// 索引块的编号容量
pub const INDEX_SLOTS: usize = BLOCK_SIZE / 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    blocks: [u32; INDEX_SLOTS],
}

impl Default for IndexBlock {
    fn default() -> Self {
        Self {
            blocks: [0; INDEX_SLOTS],
        }
    }
}

impl IndexBlock {
    pub fn decode(block: &DataBlock) -> Self {
        let mut index = Self::default();
        for (slot, id) in index.blocks.iter_mut().enumerate() {
            *id = get_u32(block, slot * 4);
        }
        index
    }

    pub fn encode(&self, block: &mut DataBlock) {
        for (slot, &id) in self.blocks.iter().enumerate() {
            put_u32(block, slot * 4, id);
        }
    }

    /// 逻辑块 -> 物理块：第 `logical` 个非零槽位，不足时返回空
    pub fn block_for_logical(&self, logical: usize) -> Option<u32> {
        self.data_blocks().nth(logical)
    }

    /// 已占用的槽位数
    pub fn populated(&self) -> usize {
        self.data_blocks().count()
    }

    /// 按逻辑顺序列出全部数据块
    pub fn data_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.iter().copied().filter(|&id| id != 0)
    }

    /// 占用的槽位是否从 0 起连续
    pub fn is_dense(&self) -> bool {
        let populated = self.populated();
        self.blocks[..populated].iter().all(|&id| id != 0)
    }

    /// 分配一个数据块填入第一个空槽位并返回其编号。
    ///
    /// 索引块已满时不会调用 `alloc`。
    pub fn grow_by_one(&mut self, alloc: impl FnOnce() -> Result<u32>) -> Result<u32> {
        let slot = self
            .blocks
            .iter()
            .position(|&id| id == 0)
            .ok_or(Error::NoSpace)?;
        let id = alloc()?;
        debug_assert_ne!(id, 0);
        self.blocks[slot] = id;
        Ok(id)
    }

    /// 清空索引，返回原有的全部数据块
    pub fn clear(&mut self) -> Vec<u32> {
        let blocks = self.data_blocks().collect();
        self.blocks.fill(0);
        blocks
    }
}
