use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::{BLOCK_SIZE, BlockDevice, BlockError};

/// 内存盘，整个设备就是一段堆内存
#[derive(Debug)]
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    blocks: usize,
}

impl RamDisk {
    pub fn new(blocks: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; blocks * BLOCK_SIZE]),
            blocks,
        }
    }

    /// 用现成的镜像构造，多余的尾部字节会被舍去
    pub fn from_image(mut image: Vec<u8>) -> Self {
        let blocks = image.len() / BLOCK_SIZE;
        image.truncate(blocks * BLOCK_SIZE);
        Self {
            data: Mutex::new(image),
            blocks,
        }
    }

    #[inline]
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// 导出整个镜像的拷贝
    pub fn image(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn range(&self, block_id: usize, len: usize) -> Result<core::ops::Range<usize>, BlockError> {
        if block_id >= self.blocks || len != BLOCK_SIZE {
            return Err(BlockError::OutOfRange(block_id));
        }
        let start = block_id * BLOCK_SIZE;
        Ok(start..start + BLOCK_SIZE)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockError> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.data.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockError> {
        let range = self.range(block_id, buf.len())?;
        self.data.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_is_rejected() {
        let disk = RamDisk::new(2);
        let mut buf = [0u8; BLOCK_SIZE];
        assert_eq!(disk.read_block(2, &mut buf), Err(BlockError::OutOfRange(2)));
        assert_eq!(disk.write_block(0, &buf[..10]), Err(BlockError::OutOfRange(0)));
    }

    #[test]
    fn blocks_are_independent() {
        let disk = RamDisk::new(3);
        disk.write_block(1, &[0xab; BLOCK_SIZE]).unwrap();

        let mut buf = [0u8; BLOCK_SIZE];
        disk.read_block(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        disk.read_block(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xab));
    }
}
