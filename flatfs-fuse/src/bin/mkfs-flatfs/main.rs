mod cli;

use std::io;

use clap::Parser;
use cli::Cli;
use flatfs::{MAGIC, layout::{INODE_SIZE, Layout, SuperBlock}};
use flatfs_fuse::format_image;
use typed_bytesize::ByteSizeIec;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let layout = format_image(&cli.image, cli.create_blocks)?;
    if !cli.quiet {
        print_summary(&layout);
    }

    Ok(())
}

fn print_summary(layout: &Layout) {
    let data_blocks = layout.data_blocks();
    println!("Superblock: ({})", SuperBlock::SIZE);
    println!("\tmagic={MAGIC:#x}");
    println!(
        "\tnr_blocks={} ({})",
        layout.total_blocks,
        ByteSizeIec(layout.total_blocks as u64 * flatfs::BLOCK_SIZE as u64)
    );
    println!(
        "\tnr_inodes={} (istore={} blocks)",
        layout.total_inodes, layout.istore_blocks
    );
    println!("\tnr_ifree_blocks={}", layout.ifree_blocks);
    println!("\tnr_bfree_blocks={}", layout.bfree_blocks);
    println!("\tnr_free_inodes={}", layout.total_inodes - 2);
    println!("\tnr_free_blocks={}", data_blocks - 3);
    println!(
        "Inode store: wrote {} blocks\n\tinode size = {INODE_SIZE}",
        layout.istore_blocks
    );
    println!("Ifree blocks: wrote {} blocks", layout.ifree_blocks);
    println!("Bfree blocks: wrote {} blocks", layout.bfree_blocks);
    println!(
        "Data region: {data_blocks} blocks from block {}",
        layout.data_start
    );
}
