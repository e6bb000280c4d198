//! # 磁盘数据结构层
//!
//! flatfs 的磁盘布局（块大小 4 KiB，整数一律小端）：
//! 超级块 | inode 存储区 | inode 位图 | 数据块位图 | 数据区
//!
//! 各结构都以显式的编解码读写块内字节，不做指针转换。

mod geometry;
pub use geometry::{Layout, MIN_BLOCKS};

mod super_block;
pub use super_block::SuperBlock;

mod bitmap;
pub use bitmap::Bitmap;

mod inode;
pub use inode::{INODE_SIZE, INODES_PER_BLOCK, InodeKind, InodeRecord, InodeTable, RecordSlot};

/// 目录块，也属于磁盘文件系统数据结构
mod dir_block;
pub use dir_block::{DIR_ENTRIES, DirBlock, DirEntry, NAME_LEN, validate_name};

mod index_block;
pub use index_block::{INDEX_SLOTS, IndexBlock};

#[inline]
fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
