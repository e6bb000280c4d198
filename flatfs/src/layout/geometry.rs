use vfs::{Error, Result};

use super::{INODES_PER_BLOCK, SuperBlock};
use crate::BLOCK_BITS;

/// 自举所需的最少块数：
/// 超级块 + 1 个 inode 存储块 + 两种位图各 1 块 + 3 个数据块
/// （根目录块、种子文件的索引块与数据块）
pub const MIN_BLOCKS: u32 = 7;

/// 分区布局，完全由总块数推出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub total_blocks: u32,
    pub total_inodes: u32,
    pub istore_blocks: u32,
    pub ifree_blocks: u32,
    pub bfree_blocks: u32,
    /// 数据区的起始块
    pub data_start: u32,
}

impl Layout {
    /// 由设备块数推出各区域大小。
    ///
    /// 每块配一个 inode，inode 数向上取整到整块 inode 存储区。
    pub fn compute(total_blocks: u32) -> Result<Self> {
        if total_blocks < MIN_BLOCKS {
            log::warn!("device of {total_blocks} blocks is below the bootstrap footprint");
            return Err(Error::InvalidArgument);
        }

        let per_block = INODES_PER_BLOCK as u32;
        let istore_blocks = total_blocks.div_ceil(per_block);
        let total_inodes = istore_blocks
            .checked_mul(per_block)
            .ok_or(Error::InvalidArgument)?;
        let ifree_blocks = total_inodes.div_ceil(BLOCK_BITS as u32);
        let bfree_blocks = total_blocks.div_ceil(BLOCK_BITS as u32);

        Self::new(
            total_blocks,
            total_inodes,
            istore_blocks,
            ifree_blocks,
            bfree_blocks,
        )
    }

    /// 由超级块恢复布局并校验其自洽
    pub fn from_super_block(sb: &SuperBlock) -> Result<Self> {
        if !sb.is_valid() {
            log::error!("bad magic {:#x}", sb.magic());
            return Err(Error::InvalidArgument);
        }

        let layout = Self::new(
            sb.total_blocks,
            sb.total_inodes,
            sb.istore_blocks,
            sb.ifree_blocks,
            sb.bfree_blocks,
        )?;

        let per_block = INODES_PER_BLOCK as u64;
        let bits = BLOCK_BITS as u64;
        if (layout.istore_blocks as u64) * per_block < layout.total_inodes as u64
            || (layout.ifree_blocks as u64) * bits < layout.total_inodes as u64
            || (layout.bfree_blocks as u64) * bits < layout.total_blocks as u64
        {
            log::error!("superblock regions can't cover its counts: {layout:?}");
            return Err(Error::InvalidArgument);
        }

        Ok(layout)
    }

    fn new(
        total_blocks: u32,
        total_inodes: u32,
        istore_blocks: u32,
        ifree_blocks: u32,
        bfree_blocks: u32,
    ) -> Result<Self> {
        let data_start = [istore_blocks, ifree_blocks, bfree_blocks]
            .into_iter()
            .try_fold(1u32, |acc, blocks| acc.checked_add(blocks))
            .ok_or(Error::InvalidArgument)?;

        // 数据区至少容下根目录与种子文件
        if total_inodes < 2 || data_start.checked_add(3).is_none_or(|end| end > total_blocks) {
            log::warn!("{total_blocks} blocks can't hold metadata ending at block {data_start}");
            return Err(Error::InvalidArgument);
        }

        Ok(Self {
            total_blocks,
            total_inodes,
            istore_blocks,
            ifree_blocks,
            bfree_blocks,
            data_start,
        })
    }

    #[inline]
    pub fn istore_start(&self) -> u32 {
        1
    }

    #[inline]
    pub fn ifree_start(&self) -> u32 {
        self.istore_start() + self.istore_blocks
    }

    #[inline]
    pub fn bfree_start(&self) -> u32 {
        self.ifree_start() + self.ifree_blocks
    }

    #[inline]
    pub fn data_blocks(&self) -> u32 {
        self.total_blocks - self.data_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_sum_to_total() {
        for total in [MIN_BLOCKS, 8, 100, 101, 255, 256, 257, 4096, 32768, 32769, 1 << 20] {
            let layout = Layout::compute(total).unwrap();
            assert_eq!(
                1 + layout.istore_blocks
                    + layout.ifree_blocks
                    + layout.bfree_blocks
                    + layout.data_blocks(),
                total
            );
            assert_eq!(
                layout.istore_blocks,
                layout.total_inodes.div_ceil(INODES_PER_BLOCK as u32)
            );
            assert!(layout.total_inodes >= total);
            assert!(layout.data_blocks() >= 3);
        }
    }

    #[test]
    fn small_device() {
        let layout = Layout::compute(MIN_BLOCKS).unwrap();
        assert_eq!(layout.total_inodes, 256);
        assert_eq!(layout.istore_blocks, 1);
        assert_eq!(layout.ifree_blocks, 1);
        assert_eq!(layout.bfree_blocks, 1);
        assert_eq!(layout.data_start, 4);
        assert_eq!(layout.data_blocks(), 3);

        assert_eq!(Layout::compute(MIN_BLOCKS - 1), Err(Error::InvalidArgument));
        assert_eq!(Layout::compute(0), Err(Error::InvalidArgument));
    }

    #[test]
    fn bitmaps_grow_with_device() {
        let layout = Layout::compute(32769).unwrap();
        assert_eq!(layout.bfree_blocks, 2);
        assert_eq!(layout.istore_blocks, 129);
        assert_eq!(layout.ifree_blocks, 2);
    }
}
