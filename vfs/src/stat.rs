use crate::DirEntryType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Inode number
    pub inode: u32,
    /// 类型位与权限位，权限位只存不管
    pub mode: u32,
    pub ty: DirEntryType,
    /// 硬链接数，由目录项推出
    pub links: u32,
    /// File size
    pub size: u64,
    /// Optimal I/O block size
    pub block_size: u64,
    /// Occupying blocks
    pub blocks: u64,
}

/// 整个卷的空间统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub block_size: u64,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u64,
    pub free_inodes: u64,
    /// 文件名最大字节数
    pub name_len: u64,
}
