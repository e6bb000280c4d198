use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "Write an empty flatfs onto a disk image")]
pub struct Cli {
    /// Disk image to format
    pub image: PathBuf,

    /// Create (or truncate) the image with this many 4 KiB blocks first
    #[arg(long, short = 'c', value_name = "N")]
    pub create_blocks: Option<u64>,

    /// Don't print the layout summary
    #[arg(long, short)]
    pub quiet: bool,
}
