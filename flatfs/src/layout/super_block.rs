use super::{Layout, get_u32, put_u32};
use crate::{DataBlock, MAGIC};

/// 超级块：
/// - 提供文件系统合法性校验；
/// - 定位其它连续区域；
/// - 记录空闲 inode 与空闲块的数量（只在同步时落盘）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    /// 魔数：用于校验文件系统合法性
    magic: u32,
    /// 文件系统占据块数，含超级块与元数据
    pub total_blocks: u32,
    pub total_inodes: u32,
    pub istore_blocks: u32,
    pub ifree_blocks: u32,
    pub bfree_blocks: u32,
    pub free_inodes: u32,
    pub free_blocks: u32,
}

impl SuperBlock {
    /// 编码后占用的字节数，块内其余部分补零
    pub const SIZE: usize = 32;

    pub fn new(layout: &Layout, free_inodes: u32, free_blocks: u32) -> Self {
        Self {
            magic: MAGIC,
            total_blocks: layout.total_blocks,
            total_inodes: layout.total_inodes,
            istore_blocks: layout.istore_blocks,
            ifree_blocks: layout.ifree_blocks,
            bfree_blocks: layout.bfree_blocks,
            free_inodes,
            free_blocks,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }

    #[inline]
    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn decode(block: &DataBlock) -> Self {
        Self {
            magic: get_u32(block, 0),
            total_blocks: get_u32(block, 4),
            total_inodes: get_u32(block, 8),
            istore_blocks: get_u32(block, 12),
            ifree_blocks: get_u32(block, 16),
            bfree_blocks: get_u32(block, 20),
            free_inodes: get_u32(block, 24),
            free_blocks: get_u32(block, 28),
        }
    }

    pub fn encode(&self, block: &mut DataBlock) {
        block.fill(0);
        put_u32(block, 0, self.magic);
        put_u32(block, 4, self.total_blocks);
        put_u32(block, 8, self.total_inodes);
        put_u32(block, 12, self.istore_blocks);
        put_u32(block, 16, self.ifree_blocks);
        put_u32(block, 20, self.bfree_blocks);
        put_u32(block, 24, self.free_inodes);
        put_u32(block, 28, self.free_blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_SIZE;

    #[test]
    fn field_offsets() {
        let layout = Layout::compute(200).unwrap();
        let sb = SuperBlock::new(&layout, 254, 193);
        let mut block = [0xffu8; BLOCK_SIZE];
        sb.encode(&mut block);

        assert_eq!(&block[..4], &MAGIC.to_le_bytes());
        assert_eq!(&block[4..8], &200u32.to_le_bytes());
        assert_eq!(&block[24..28], &254u32.to_le_bytes());
        assert_eq!(&block[28..32], &193u32.to_le_bytes());
        assert!(block[SuperBlock::SIZE..].iter().all(|&b| b == 0));
        assert_eq!(SuperBlock::decode(&block), sb);
    }

    #[test]
    fn zeroed_block_is_not_valid() {
        let sb = SuperBlock::decode(&[0; BLOCK_SIZE]);
        assert!(!sb.is_valid());
    }
}
