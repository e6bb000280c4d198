//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 文件系统只通过块设备驱动读写块设备，读写单位恒为 [`BLOCK_SIZE`] 字节。

#![no_std]

extern crate alloc;

mod ram;

use core::any::Any;

pub use self::ram::RamDisk;

/// 块大小：4 KiB
pub const BLOCK_SIZE: usize = 4096;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 读出第 `block_id` 块，`buf` 长度必须为 [`BLOCK_SIZE`]
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockError>;

    /// 写入第 `block_id` 块，`buf` 长度必须为 [`BLOCK_SIZE`]
    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockError>;

    /// 把设备自身的缓冲落盘
    fn sync(&self) -> Result<(), BlockError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("block {0} is out of device range")]
    OutOfRange(usize),
    #[error("failed to read block {0}")]
    Read(usize),
    #[error("failed to write block {0}")]
    Write(usize),
    #[error("failed to flush device")]
    Flush,
}
