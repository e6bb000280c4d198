use block_dev::BlockError;

pub type Result<T> = core::result::Result<T, Error>;

/// 文件系统操作的错误分类，每一种都对应唯一的 errno，见 [`Error::to_errno`]。
///
/// 所有错误都直接交给调用者，文件系统内部不做重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("file name too long")]
    NameTooLong,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory has no free entry")]
    DirectoryFull,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("no space left on device")]
    NoSpace,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("block I/O failed: {0}")]
    Io(#[from] BlockError),
    /// 磁盘上的结构违背了不变式
    #[error("corrupted filesystem: {0}")]
    Corrupted(&'static str),
}

impl Error {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const ENAMETOOLONG: i32 = 36;
    pub const ENOTEMPTY: i32 = 39;

    /// 映射到 POSIX errno。
    /// 不使用通配分支，新增变体时必须在此处给出对应值。
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::NotFound => Self::ENOENT,
            Error::AlreadyExists => Self::EEXIST,
            Error::NameTooLong => Self::ENAMETOOLONG,
            Error::NotADirectory => Self::ENOTDIR,
            Error::IsADirectory => Self::EISDIR,
            Error::DirectoryFull => Self::ENOSPC,
            Error::DirectoryNotEmpty => Self::ENOTEMPTY,
            Error::NoSpace => Self::ENOSPC,
            Error::InvalidArgument => Self::EINVAL,
            Error::Io(_) => Self::EIO,
            Error::Corrupted(_) => Self::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(Error::NotFound.to_errno(), 2);
        assert_eq!(Error::DirectoryFull.to_errno(), Error::NoSpace.to_errno());
        assert_eq!(Error::from(BlockError::Read(3)).to_errno(), 5);
        assert_eq!(Error::Corrupted("bad entry").to_errno(), 5);
        assert_eq!(Error::DirectoryNotEmpty.to_errno(), 39);
    }
}
