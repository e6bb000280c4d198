use alloc::vec;
use alloc::vec::Vec;

use crate::BLOCK_SIZE;

/// 位图区域在内存中的镜像，记录其指示区域内各单元的分配情况。
///
/// 位为 1 表示空闲，为 0 表示已占用。
/// 分配总是取编号最小的空闲单元。
#[derive(Debug, Clone)]
pub struct Bitmap {
    /// 与磁盘上的位图块逐字节对应
    groups: Vec<u64>,
    /// 位图所指示的单元数，之后的位不参与分配
    units: usize,
}

/// 位图区域内一个块能容下的 u64 组数
const GROUPS_PER_BLOCK: usize = BLOCK_SIZE / 8;

impl Bitmap {
    /// 全部空闲的位图，占用 `blocks` 个位图块
    pub fn new(blocks: usize, units: usize) -> Self {
        debug_assert!(units <= blocks * BLOCK_SIZE * 8);
        Self {
            groups: vec![u64::MAX; blocks * GROUPS_PER_BLOCK],
            units,
        }
    }

    /// 从磁盘上连续的位图块载入
    pub fn load(bytes: &[u8], units: usize) -> Self {
        debug_assert!(units <= bytes.len() * 8);
        let groups = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0; 8];
                raw.copy_from_slice(chunk);
                u64::from_le_bytes(raw)
            })
            .collect();

        Self { groups, units }
    }

    #[inline]
    pub fn units(&self) -> usize {
        self.units
    }

    /// 编号最小的空闲单元；位图用尽时返回空
    pub fn find_first_free(&self) -> Option<usize> {
        self.groups
            .iter()
            .enumerate()
            .find_map(|(group_index, &bits)| {
                (bits != 0).then(|| group_index * 64 + bits.trailing_zeros() as usize)
            })
            .filter(|&index| index < self.units)
    }

    #[inline]
    pub fn is_free(&self, index: usize) -> bool {
        let (group_index, ingroup_index) = Self::locate(index);
        self.groups[group_index] & (1 << ingroup_index) != 0
    }

    pub fn mark_used(&mut self, index: usize) {
        debug_assert!(index < self.units);
        debug_assert!(self.is_free(index), "unit {index} is already in use");
        let (group_index, ingroup_index) = Self::locate(index);
        self.groups[group_index] &= !(1 << ingroup_index);
    }

    pub fn mark_free(&mut self, index: usize) {
        debug_assert!(index < self.units);
        debug_assert!(!self.is_free(index), "unit {index} is already free");
        let (group_index, ingroup_index) = Self::locate(index);
        self.groups[group_index] |= 1 << ingroup_index;
    }

    /// 指示区域内的空闲单元数
    pub fn count_free(&self) -> usize {
        let full = self.units / 64;
        let rest = self.units % 64;
        let mut free: usize = self.groups[..full]
            .iter()
            .map(|bits| bits.count_ones() as usize)
            .sum();
        if rest > 0 {
            free += (self.groups[full] & ((1 << rest) - 1)).count_ones() as usize;
        }
        free
    }

    /// 序列化为磁盘上的位图块，长度是块大小的整数倍
    pub fn serialize(&self) -> Vec<u8> {
        self.groups
            .iter()
            .flat_map(|bits| bits.to_le_bytes())
            .collect()
    }

    /// 编号 -> (组索引, 组内索引)
    #[inline]
    fn locate(index: usize) -> (usize, usize) {
        (index / 64, index % 64)
    }
}
