//! 目录块
//!
//! 每个目录恰有一个目录块，块内是 [`DIR_ENTRIES`] 个定长目录项。
//! 活跃目录项总是紧凑地排在 `0..entry_count`，删除时后面的项依次前移；
//! 查找只扫描前 `entry_count` 项。

use vfs::{Error, Result};

use super::{get_u32, put_u32};
use crate::DataBlock;

/// 文件名最大字节数，不含结尾的 \0
pub const NAME_LEN: usize = 28;
/// 目录块的目录项容量
pub const DIR_ENTRIES: usize = 128;

/// 目录项：inode 编号 + 文件名。编号为 0 表示空槽。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    inode: u32,
    // 名字满 28 字节时没有 \0
    name: [u8; NAME_LEN],
}

/// 检查文件名能否放进目录项
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > NAME_LEN {
        return Err(Error::NameTooLong);
    }
    if name.is_empty() || name.bytes().any(|c| c == b'/' || c == 0) {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

impl DirEntry {
    /// 目录项大小恒为32字节
    pub const SIZE: usize = 32;

    pub fn new(name: &str, inode: u32) -> Result<Self> {
        validate_name(name)?;
        let mut entry = Self {
            inode,
            name: [0; NAME_LEN],
        };
        entry.set_name(name);
        Ok(entry)
    }

    #[inline]
    pub fn inode(&self) -> u32 {
        self.inode
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inode == 0
    }

    /// 名字的有效字节，截止于第一个 \0 或缓冲区末尾
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_LEN);
        &self.name[..len]
    }

    pub fn name(&self) -> Result<&str> {
        core::str::from_utf8(self.name_bytes())
            .map_err(|_| Error::Corrupted("directory entry name is not UTF-8"))
    }

    #[inline]
    pub fn matches(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }

    fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        self.name = [0; NAME_LEN];
        self.name[..bytes.len()].copy_from_slice(bytes);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut name = [0; NAME_LEN];
        name.copy_from_slice(&bytes[4..Self::SIZE]);
        Self {
            inode: get_u32(bytes, 0),
            name,
        }
    }

    fn encode(&self, bytes: &mut [u8]) {
        put_u32(bytes, 0, self.inode);
        bytes[4..Self::SIZE].copy_from_slice(&self.name);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBlock {
    entries: [DirEntry; DIR_ENTRIES],
}

impl Default for DirBlock {
    fn default() -> Self {
        Self {
            entries: [DirEntry::default(); DIR_ENTRIES],
        }
    }
}

impl DirBlock {
    pub fn decode(block: &DataBlock) -> Self {
        let mut dir = Self::default();
        for (entry, bytes) in dir
            .entries
            .iter_mut()
            .zip(block.chunks_exact(DirEntry::SIZE))
        {
            *entry = DirEntry::decode(bytes);
        }
        dir
    }

    pub fn encode(&self, block: &mut DataBlock) {
        for (entry, bytes) in self
            .entries
            .iter()
            .zip(block.chunks_exact_mut(DirEntry::SIZE))
        {
            entry.encode(bytes);
        }
    }

    #[inline]
    pub fn entry(&self, slot: usize) -> &DirEntry {
        &self.entries[slot]
    }

    /// 前 `count` 个目录项，即全部活跃项
    #[inline]
    pub fn live(&self, count: usize) -> &[DirEntry] {
        &self.entries[..count.min(DIR_ENTRIES)]
    }

    /// 在活跃项中按名查找，返回第一个匹配的槽位
    pub fn find_entry(&self, count: usize, name: &str) -> Option<usize> {
        self.live(count)
            .iter()
            .position(|entry| !entry.is_empty() && entry.matches(name))
    }

    /// 第一个空槽位
    pub fn find_free_slot(&self) -> Option<usize> {
        self.entries.iter().position(DirEntry::is_empty)
    }

    /// 插入新目录项并返回其槽位
    pub fn insert(&mut self, count: usize, name: &str, inode: u32) -> Result<usize> {
        debug_assert_ne!(inode, 0);
        let entry = DirEntry::new(name, inode)?;

        if self.find_entry(count, name).is_some() {
            return Err(Error::AlreadyExists);
        }
        if count >= DIR_ENTRIES {
            return Err(Error::DirectoryFull);
        }
        let slot = self.find_free_slot().ok_or(Error::DirectoryFull)?;
        debug_assert_eq!(slot, count, "directory entries are not compacted");

        self.entries[slot] = entry;
        Ok(slot)
    }

    /// 移除 `slot` 处的目录项，其后的活跃项依次前移
    pub fn remove(&mut self, count: usize, slot: usize) -> DirEntry {
        let count = count.min(DIR_ENTRIES);
        debug_assert!(slot < count);

        let removed = self.entries[slot];
        self.entries.copy_within(slot + 1..count, slot);
        self.entries[count - 1] = DirEntry::default();
        removed
    }

    /// 原地改名，不移动槽位
    pub fn rename(&mut self, slot: usize, name: &str) -> Result<()> {
        validate_name(name)?;
        self.entries[slot].set_name(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::string::String;

    use super::*;
    use crate::BLOCK_SIZE;

    fn names(dir: &DirBlock, count: usize) -> alloc::vec::Vec<String> {
        dir.live(count)
            .iter()
            .map(|entry| String::from(entry.name().unwrap()))
            .collect()
    }

    #[test]
    fn name_limits() {
        assert!(DirEntry::new(&"x".repeat(NAME_LEN), 1).is_ok());
        assert_eq!(
            DirEntry::new(&"x".repeat(NAME_LEN + 1), 1),
            Err(Error::NameTooLong)
        );
        assert_eq!(DirEntry::new("", 1), Err(Error::InvalidArgument));
        assert_eq!(DirEntry::new("a/b", 1), Err(Error::InvalidArgument));

        let full = DirEntry::new(&"y".repeat(NAME_LEN), 7).unwrap();
        let mut bytes = [0u8; DirEntry::SIZE];
        full.encode(&mut bytes);
        assert_eq!(DirEntry::decode(&bytes).name().unwrap(), "y".repeat(NAME_LEN));
    }

    #[test]
    fn prefix_is_not_a_match() {
        let mut dir = DirBlock::default();
        dir.insert(0, "abc", 3).unwrap();
        assert_eq!(dir.find_entry(1, "ab"), None);
        assert_eq!(dir.find_entry(1, "abcd"), None);
        assert_eq!(dir.find_entry(1, "abc"), Some(0));
    }

    #[test]
    fn insert_rejects_duplicates_and_overflow() {
        let mut dir = DirBlock::default();
        for i in 0..DIR_ENTRIES {
            assert_eq!(dir.insert(i, &format!("f{i}"), i as u32 + 1), Ok(i));
        }
        assert_eq!(dir.insert(DIR_ENTRIES, "f3", 500), Err(Error::AlreadyExists));
        assert_eq!(dir.insert(DIR_ENTRIES, "new", 500), Err(Error::DirectoryFull));

        dir.remove(DIR_ENTRIES, 10);
        assert_eq!(dir.insert(DIR_ENTRIES - 1, "new", 500), Ok(DIR_ENTRIES - 1));
    }

    #[test]
    fn remove_compacts() {
        let mut dir = DirBlock::default();
        let mut count = 0;
        for name in ["a", "b", "c", "d", "e"] {
            dir.insert(count, name, count as u32 + 10).unwrap();
            count += 1;
        }

        let removed = dir.remove(count, 1);
        count -= 1;
        assert_eq!(removed.name().unwrap(), "b");
        assert_eq!(names(&dir, count), ["a", "c", "d", "e"]);

        dir.remove(count, count - 1);
        count -= 1;
        dir.remove(count, 0);
        count -= 1;
        assert_eq!(names(&dir, count), ["c", "d"]);

        // 活跃区之后不留任何残余
        assert!(dir.entries[count..].iter().all(DirEntry::is_empty));
        assert_eq!(dir.find_free_slot(), Some(count));
    }

    #[test]
    fn interleaved_sequence_keeps_prefix_dense() {
        let mut dir = DirBlock::default();
        let mut count = 0;
        // 伪随机的插入/删除序列
        let mut seed = 0x2545_f491u32;
        for step in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            if count > 0 && (seed % 3 == 0 || count == DIR_ENTRIES) {
                dir.remove(count, seed as usize % count);
                count -= 1;
            } else {
                dir.insert(count, &format!("n{step}"), step + 1).unwrap();
                count += 1;
            }

            assert!(dir.live(count).iter().all(|entry| !entry.is_empty()));
            assert!(dir.entries[count..].iter().all(DirEntry::is_empty));
        }
    }

    #[test]
    fn rename_in_place() {
        let mut dir = DirBlock::default();
        dir.insert(0, "old", 4).unwrap();
        dir.insert(1, "other", 5).unwrap();
        dir.rename(0, "brand-new").unwrap();
        assert_eq!(dir.find_entry(2, "brand-new"), Some(0));
        assert_eq!(dir.find_entry(2, "old"), None);
        assert_eq!(dir.entry(0).inode(), 4);
    }

    #[test]
    fn block_codec() {
        let mut dir = DirBlock::default();
        dir.insert(0, "foo", 1).unwrap();
        let mut block = [0xeeu8; BLOCK_SIZE];
        dir.encode(&mut block);
        assert_eq!(&block[..4], &1u32.to_le_bytes());
        assert_eq!(&block[4..8], b"foo\0");
        assert!(block[DirEntry::SIZE..].iter().all(|&b| b == 0));
        assert_eq!(DirBlock::decode(&block), dir);
    }
}
