#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use block_dev::{BlockDevice, BlockError, RamDisk};
use flatfs::FlatFileSystem;
use flatfs::layout::Layout;

pub const BLOCKS: u32 = 256;

/// 256 块的卷：数据区从第 4 块开始，格式化后占去 3 个数据块与 2 个 inode
pub const FREE_INODES: u64 = 256 - 2;
pub const FREE_BLOCKS: u64 = 256 - 4 - 3;

pub fn disk(blocks: u32) -> (Arc<RamDisk>, Layout) {
    let disk = Arc::new(RamDisk::new(blocks as usize));
    let layout = flatfs::format(disk.as_ref(), blocks).unwrap();
    (disk, layout)
}

pub fn mounted(blocks: u32) -> FlatFileSystem {
    let (disk, _) = disk(blocks);
    FlatFileSystem::mount(disk).unwrap()
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 7) as u8).collect()
}

/// 包在内存盘外面，对登记过的块返回读写错误
pub struct FailingDisk {
    inner: Arc<RamDisk>,
    bad_reads: Mutex<BTreeSet<usize>>,
    bad_writes: Mutex<BTreeSet<usize>>,
}

impl FailingDisk {
    pub fn new(inner: Arc<RamDisk>) -> Self {
        Self {
            inner,
            bad_reads: Mutex::new(BTreeSet::new()),
            bad_writes: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn fail_reads(&self, block_id: u32) {
        self.bad_reads.lock().unwrap().insert(block_id as usize);
    }

    pub fn fail_writes(&self, block_id: u32) {
        self.bad_writes.lock().unwrap().insert(block_id as usize);
    }

    pub fn heal(&self) {
        self.bad_reads.lock().unwrap().clear();
        self.bad_writes.lock().unwrap().clear();
    }
}

impl BlockDevice for FailingDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockError> {
        if self.bad_reads.lock().unwrap().contains(&block_id) {
            return Err(BlockError::Read(block_id));
        }
        self.inner.read_block(block_id, buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockError> {
        if self.bad_writes.lock().unwrap().contains(&block_id) {
            return Err(BlockError::Write(block_id));
        }
        self.inner.write_block(block_id, buf)
    }
}
