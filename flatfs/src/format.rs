use block_dev::BlockDevice;
use vfs::Result;

use crate::layout::*;
use crate::{BLOCK_SIZE, DataBlock};

/// 种子文件的名字与内容
const SEED_NAME: &str = "foo";
const SEED_DATA: &[u8] = b"foo\n";

/// 在块设备的前 `total_blocks` 块上写出一个新文件系统。
///
/// 写出后根目录（inode 0）下只有一个文件 `foo`（inode 1），内容为 `"foo\n"`。
/// 数据区的前三块依次是根目录块、`foo` 的索引块和数据块，
/// 其余数据块不清零，分配时再清。
pub fn format(block_device: &dyn BlockDevice, total_blocks: u32) -> Result<Layout> {
    let layout = Layout::compute(total_blocks)?;
    let root_dir = layout.data_start;
    let seed_index = root_dir + 1;
    let seed_data = root_dir + 2;

    let mut block: DataBlock = [0; BLOCK_SIZE];

    SuperBlock::new(&layout, layout.total_inodes - 2, layout.data_blocks() - 3).encode(&mut block);
    block_device.write_block(0, &block)?;

    // inode 存储区，只有前两条记录非空
    let mut root = InodeRecord::new(InodeKind::Directory, 0o775, root_dir);
    root.set_entry_count(1);
    let mut seed = InodeRecord::new(InodeKind::File, 0o666, seed_index);
    seed.filesize = SEED_DATA.len() as u32;
    seed.set_used_blocks(1);
    block.fill(0);
    root.encode(&mut block[..INODE_SIZE]);
    seed.encode(&mut block[INODE_SIZE..2 * INODE_SIZE]);
    block_device.write_block(layout.istore_start() as usize, &block)?;
    block.fill(0);
    for block_id in layout.istore_start() + 1..layout.ifree_start() {
        block_device.write_block(block_id as usize, &block)?;
    }

    let mut inode_bitmap = Bitmap::new(layout.ifree_blocks as usize, layout.total_inodes as usize);
    inode_bitmap.mark_used(0);
    inode_bitmap.mark_used(1);
    write_region(block_device, layout.ifree_start(), &inode_bitmap.serialize())?;

    let mut block_bitmap = Bitmap::new(layout.bfree_blocks as usize, layout.total_blocks as usize);
    for block_id in 0..=seed_data {
        block_bitmap.mark_used(block_id as usize);
    }
    write_region(block_device, layout.bfree_start(), &block_bitmap.serialize())?;

    let mut entries = DirBlock::default();
    entries.insert(0, SEED_NAME, 1)?;
    entries.encode(&mut block);
    block_device.write_block(root_dir as usize, &block)?;

    let mut index = IndexBlock::default();
    index.grow_by_one(|| Ok(seed_data))?;
    index.encode(&mut block);
    block_device.write_block(seed_index as usize, &block)?;

    block.fill(0);
    block[..SEED_DATA.len()].copy_from_slice(SEED_DATA);
    block_device.write_block(seed_data as usize, &block)?;

    block_device.sync()?;
    log::info!(
        "formatted {total_blocks} blocks: {} inodes, data region starts at block {}",
        layout.total_inodes,
        layout.data_start,
    );
    Ok(layout)
}

fn write_region(block_device: &dyn BlockDevice, start: u32, bytes: &[u8]) -> Result<()> {
    for (block_id, chunk) in (start..).zip(bytes.chunks(BLOCK_SIZE)) {
        block_device.write_block(block_id as usize, chunk)?;
    }
    Ok(())
}
