mod common;

use std::sync::Arc;

use block_dev::{BlockDevice, RamDisk};
use enumflags2::BitFlags;
use flatfs::layout::{DirBlock, INODE_SIZE, InodeRecord, SuperBlock};
use flatfs::{BLOCK_SIZE, Error, FilesystemOps, FlatFileSystem, ROOT_INODE};
use vfs::{DirEntry, DirEntryType};

use common::*;

#[test]
fn formatted_volume() {
    let fs = mounted(BLOCKS);

    assert_eq!(
        fs.readdir(ROOT_INODE).unwrap(),
        vec![DirEntry {
            inode: 1,
            ty: DirEntryType::Regular,
            name: "foo".to_string(),
        }]
    );
    assert_eq!(fs.read(1, 0, 100).unwrap(), b"foo\n");

    let statfs = fs.statfs();
    assert_eq!(statfs.free_inodes, FREE_INODES);
    assert_eq!(statfs.free_blocks, FREE_BLOCKS);
    assert_eq!(statfs.total_blocks, BLOCKS as u64);
    assert_eq!(statfs.name_len, 28);

    let root = fs.stat(ROOT_INODE).unwrap();
    assert_eq!(root.ty, DirEntryType::Directory);
    assert_eq!(root.mode, 0o040775);
    assert_eq!(root.links, 2);
    assert_eq!(root.size, BLOCK_SIZE as u64);

    let foo = fs.stat(1).unwrap();
    assert_eq!(foo.mode, 0o100666);
    assert_eq!(foo.size, 4);
    assert_eq!(foo.blocks, 2);

    fs.check().unwrap();
}

#[test]
fn mount_rejects_blank_device() {
    let disk = Arc::new(RamDisk::new(BLOCKS as usize));
    assert_eq!(
        FlatFileSystem::mount(disk).err(),
        Some(Error::InvalidArgument)
    );
}

#[test]
fn format_rejects_tiny_device() {
    let disk = RamDisk::new(6);
    assert_eq!(flatfs::format(&disk, 6).err(), Some(Error::InvalidArgument));
}

#[test]
fn smallest_volume() {
    let fs = mounted(7);
    assert_eq!(fs.statfs().free_blocks, 0);

    assert_eq!(fs.mkdir(ROOT_INODE, "d", 0o755), Err(Error::NoSpace));
    let file = fs.create(ROOT_INODE, "empty", 0o644).unwrap();
    assert_eq!(fs.write(file, 0, b"x", false), Err(Error::NoSpace));
    assert_eq!(fs.stat(file).unwrap().size, 0);
    fs.check().unwrap();
}

#[test]
fn data_survives_remount() {
    let (disk, _) = disk(BLOCKS);
    let data = pattern(3 * BLOCK_SIZE + 17);

    let fs = FlatFileSystem::mount(disk.clone()).unwrap();
    let dir = fs.mkdir(ROOT_INODE, "dir", 0o755).unwrap();
    let file = fs.create(dir, "data", 0o644).unwrap();
    fs.write(file, 0, &data, false).unwrap();
    fs.unlink(ROOT_INODE, "foo").unwrap();
    let statfs = fs.statfs();
    fs.unmount().unwrap();

    let fs = FlatFileSystem::mount(disk).unwrap();
    assert_eq!(fs.statfs(), statfs);
    assert_eq!(fs.lookup(ROOT_INODE, "foo").unwrap(), None);
    assert_eq!(fs.lookup(ROOT_INODE, "dir").unwrap(), Some(dir));
    assert_eq!(fs.lookup(dir, "data").unwrap(), Some(file));
    assert_eq!(fs.read(file, 0, data.len()).unwrap(), data);
    fs.check().unwrap();
}

#[test]
fn mount_recounts_free_space() {
    let (disk, layout) = disk(BLOCKS);

    let mut block = [0; BLOCK_SIZE];
    SuperBlock::new(&layout, 0, 0).encode(&mut block);
    disk.write_block(0, &block).unwrap();

    let fs = FlatFileSystem::mount(disk.clone()).unwrap();
    assert_eq!(fs.statfs().free_inodes, FREE_INODES);
    assert_eq!(fs.statfs().free_blocks, FREE_BLOCKS);
    fs.sync().unwrap();

    disk.read_block(0, &mut block).unwrap();
    let sb = SuperBlock::decode(&block);
    assert_eq!(sb.free_inodes as u64, FREE_INODES);
    assert_eq!(sb.free_blocks as u64, FREE_BLOCKS);
}

#[test]
fn lowest_free_units_are_reused() {
    let fs = mounted(BLOCKS);
    let data_start = fs.layout().data_start;

    let file = fs.create(ROOT_INODE, "a", 0o644).unwrap();
    assert_eq!(file, 2);
    fs.write(file, 0, b"a", false).unwrap();
    let first = fs.iget(file).unwrap().read().index_block;
    assert_eq!(first, data_start + 3);

    fs.unlink(ROOT_INODE, "a").unwrap();
    let file = fs.create(ROOT_INODE, "b", 0o644).unwrap();
    assert_eq!(file, 2);
    fs.write(file, 0, b"b", false).unwrap();
    assert_eq!(fs.iget(file).unwrap().read().index_block, first);
    assert_eq!(fs.read(file, 0, 10).unwrap(), b"b");
}

#[test]
fn concurrent_creates() {
    let fs = Arc::new(mounted(BLOCKS));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let fs = fs.clone();
            std::thread::spawn(move || {
                (0..20)
                    .map(|i| {
                        let name = format!("t{t}-{i}");
                        let inode = fs.create(ROOT_INODE, &name, 0o644).unwrap();
                        fs.write(inode, 0, name.as_bytes(), false).unwrap();
                        inode
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut inodes: Vec<u32> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    inodes.sort_unstable();
    inodes.dedup();
    assert_eq!(inodes.len(), 80);
    assert_eq!(fs.readdir(ROOT_INODE).unwrap().len(), 81);
    assert_eq!(fs.statfs().free_inodes, FREE_INODES - 80);
    assert_eq!(fs.statfs().free_blocks, FREE_BLOCKS - 160);

    let inode = fs.lookup(ROOT_INODE, "t3-19").unwrap().unwrap();
    assert_eq!(fs.read(inode, 0, 100).unwrap(), b"t3-19");
    fs.check().unwrap();
}

#[test]
fn check_finds_stray_entry() {
    let (disk, layout) = disk(BLOCKS);

    // 根目录块里多出一项，但记录中的目录项数仍是 1
    let mut block = [0; BLOCK_SIZE];
    disk.read_block(layout.data_start as usize, &mut block).unwrap();
    let mut entries = DirBlock::decode(&block);
    entries.insert(1, "ghost", 5).unwrap();
    entries.encode(&mut block);
    disk.write_block(layout.data_start as usize, &block).unwrap();

    let fs = FlatFileSystem::mount(disk).unwrap();
    assert_eq!(fs.lookup(ROOT_INODE, "ghost").unwrap(), None);
    assert!(matches!(fs.check(), Err(Error::Corrupted(_))));
}

#[test]
fn entry_past_inode_area_is_corruption() {
    const OUT_OF_RANGE: Error = Error::Corrupted("entry inode out of range");
    let (disk, layout) = disk(BLOCKS);

    // foo 的目录项改指向 inode 区域之外
    let mut block = [0; BLOCK_SIZE];
    disk.read_block(layout.data_start as usize, &mut block).unwrap();
    let mut entries = DirBlock::decode(&block);
    entries.remove(1, 0);
    entries.insert(0, "foo", 40000).unwrap();
    entries.encode(&mut block);
    disk.write_block(layout.data_start as usize, &block).unwrap();

    let fs = FlatFileSystem::mount(disk).unwrap();
    assert_eq!(fs.check(), Err(OUT_OF_RANGE));
    assert_eq!(fs.lookup(ROOT_INODE, "foo"), Err(OUT_OF_RANGE));
    assert_eq!(fs.readdir(ROOT_INODE), Err(OUT_OF_RANGE));
    assert_eq!(fs.unlink(ROOT_INODE, "foo"), Err(OUT_OF_RANGE));
    let dir = fs.mkdir(ROOT_INODE, "dir", 0o755).unwrap();
    assert_eq!(
        fs.rename(ROOT_INODE, "foo", dir, "foo", BitFlags::empty()),
        Err(OUT_OF_RANGE)
    );
}

#[test]
fn directory_cycle_terminates() {
    let (disk, layout) = disk(BLOCKS);
    let fs = FlatFileSystem::mount(disk.clone()).unwrap();
    let looped = fs.mkdir(ROOT_INODE, "looped", 0o755).unwrap();
    fs.create(looped, "file", 0o644).unwrap();
    let other = fs.mkdir(ROOT_INODE, "other", 0o755).unwrap();
    fs.unmount().unwrap();

    // looped 唯一的目录项改指向它自己
    let store = layout.istore_start() as usize;
    let mut block = [0; BLOCK_SIZE];
    disk.read_block(store, &mut block).unwrap();
    let offset = looped as usize * INODE_SIZE;
    let dir_block = InodeRecord::decode(&block[offset..offset + INODE_SIZE]).index_block as usize;

    disk.read_block(dir_block, &mut block).unwrap();
    let mut entries = DirBlock::decode(&block);
    entries.remove(1, 0);
    entries.insert(0, "self", looped).unwrap();
    entries.encode(&mut block);
    disk.write_block(dir_block, &block).unwrap();

    let fs = FlatFileSystem::mount(disk).unwrap();
    assert_eq!(fs.check(), Err(Error::Corrupted("directory reachable twice")));
    fs.rename(ROOT_INODE, "looped", other, "looped", BitFlags::empty())
        .unwrap();
    assert_eq!(fs.lookup(other, "looped").unwrap(), Some(looped));
}
