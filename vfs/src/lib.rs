//! # 虚拟文件系统接口
//!
//! 宿主（内核 VFS 层或者用户态工具）与具体文件系统之间的约定：
//! 错误分类、目录项、文件状态，以及文件系统须实现的 [`FilesystemOps`]。

#![no_std]

extern crate alloc;

mod dirent;
mod error;
mod ops;
mod stat;

pub use self::{
    dirent::{DirEntry, DirEntryType},
    error::{Error, Result},
    ops::{FilesystemOps, RenameFlag},
    stat::{Stat, StatFs},
};
