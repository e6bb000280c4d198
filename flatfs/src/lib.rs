#![no_std]

extern crate alloc;

/* flatfs 的整体架构，自上而下 */

// 操作层：实现查找、创建、删除、重命名、读写等操作
mod ops;

// 卷管理层：挂载、分配、同步
mod ffs;
pub use ffs::{FlatFileSystem, InodeState};

// 格式化：写出一个空文件系统
mod format;
pub use format::format;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
pub mod layout;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

pub use block_dev::{BLOCK_SIZE, BlockDevice};
pub use vfs::{Error, FilesystemOps, RenameFlag, Result};

pub const MAGIC: u32 = 0x434F5746;
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;
/// 根目录的 inode 编号
pub const ROOT_INODE: u32 = 0;
/// 单个文件的最大字节数：索引块能编号的数据块数 * 块大小
pub const MAX_FILE_SIZE: usize = layout::INDEX_SLOTS * BLOCK_SIZE;

type DataBlock = [u8; BLOCK_SIZE];
