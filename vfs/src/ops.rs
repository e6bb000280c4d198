use alloc::vec::Vec;

use enumflags2::{BitFlags, bitflags};

use crate::{DirEntry, Result, Stat, StatFs};

/// `rename` 的标志位，取值与 Linux `renameat2` 一致
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameFlag {
    NoReplace = 1 << 0,
    Exchange = 1 << 1,
    Whiteout = 1 << 2,
}

/// 文件系统向宿主暴露的全部操作，inode 一律以编号指代。
///
/// 宿主适配层（例如内核的 VFS 胶水代码）只需面向这个特质，
/// 不必了解磁盘布局。每个操作都返回 [`Result`]，失败时不会留下半完成的修改。
pub trait FilesystemOps {
    /// 根目录的 inode 编号
    fn root(&self) -> u32;

    /// 在目录 `dir` 下按名查找
    fn lookup(&self, dir: u32, name: &str) -> Result<Option<u32>>;

    /// 在目录 `dir` 下创建普通文件，返回新 inode 编号
    fn create(&self, dir: u32, name: &str, mode: u32) -> Result<u32>;

    /// 在目录 `dir` 下创建子目录，返回新 inode 编号
    fn mkdir(&self, dir: u32, name: &str, mode: u32) -> Result<u32>;

    /// 删除普通文件
    fn unlink(&self, dir: u32, name: &str) -> Result<()>;

    /// 删除空目录
    fn rmdir(&self, dir: u32, name: &str) -> Result<()>;

    /// 重命名，只支持不覆盖语义
    fn rename(
        &self,
        old_dir: u32,
        old_name: &str,
        new_dir: u32,
        new_name: &str,
        flags: BitFlags<RenameFlag>,
    ) -> Result<()>;

    /// 从 `offset` 起读出至多 `len` 字节
    fn read(&self, inode: u32, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// 在 `offset` 处写入 `buf`；`append` 为真时忽略 `offset`，写到文件末尾。
    /// 返回写入的字节数。
    fn write(&self, inode: u32, offset: usize, buf: &[u8], append: bool) -> Result<usize>;

    /// 列出目录下的全部目录项
    fn readdir(&self, dir: u32) -> Result<Vec<DirEntry>>;

    fn stat(&self, inode: u32) -> Result<Stat>;

    fn statfs(&self) -> StatFs;

    /// 把空闲空间记录与脏块写回块设备
    fn sync(&self) -> Result<()>;
}
