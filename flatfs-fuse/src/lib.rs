
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use block_dev::{BLOCK_SIZE, BlockDevice, BlockError};
use flatfs::layout::Layout;
use typed_bytesize::ByteSizeIec;

/// 镜像至少要比这么多块大
pub const MIN_IMAGE_BLOCKS: u64 = 100;

/// 以宿主文件为后端的块设备
#[derive(Debug)]
pub struct BlockFile(Mutex<File>);

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self(Mutex::new(fd))
    }

    /// 文件能容下的整块数
    pub fn blocks(&self) -> io::Result<u64> {
        let file = self.0.lock().map_err(|_| io::Error::other("block file lock poisoned"))?;
        Ok(file.metadata()?.len() / BLOCK_SIZE as u64)
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SIZE {
            return Err(BlockError::OutOfRange(block_id));
        }
        let mut file = self.0.lock().map_err(|_| BlockError::Read(block_id))?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .and_then(|_| file.read_exact(buf))
            .map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => BlockError::OutOfRange(block_id),
                _ => {
                    log::error!("reading block {block_id}: {err}");
                    BlockError::Read(block_id)
                }
            })
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() != BLOCK_SIZE {
            return Err(BlockError::OutOfRange(block_id));
        }
        let mut file = self.0.lock().map_err(|_| BlockError::Write(block_id))?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .and_then(|_| file.write_all(buf))
            .map_err(|err| {
                log::error!("writing block {block_id}: {err}");
                BlockError::Write(block_id)
            })
    }

    fn sync(&self) -> Result<(), BlockError> {
        let file = self.0.lock().map_err(|_| BlockError::Flush)?;
        file.sync_all().map_err(|err| {
            log::error!("flushing block file: {err}");
            BlockError::Flush
        })
    }
}

/// 把 `path` 处的镜像格式化为 flatfs。
///
/// 给出 `create_blocks` 时先创建（或截断）出这么多块的镜像，
/// 否则镜像须已存在。镜像不大于 [`MIN_IMAGE_BLOCKS`] 块时拒绝格式化。
pub fn format_image(path: &Path, create_blocks: Option<u64>) -> io::Result<Layout> {
    let fd = match create_blocks {
        Some(blocks) => {
            let fd = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            fd.set_len(blocks * BLOCK_SIZE as u64)?;
            fd
        }
        None => OpenOptions::new().read(true).write(true).open(path)?,
    };

    let size = fd.metadata()?.len();
    let min_size = MIN_IMAGE_BLOCKS * BLOCK_SIZE as u64;
    if size <= min_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "image is not large enough (size={}, min size={})",
                ByteSizeIec(size),
                ByteSizeIec(min_size)
            ),
        ));
    }

    let block_file = BlockFile::new(fd);
    let blocks = u32::try_from(block_file.blocks()?)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "image has too many blocks"))?;
    log::debug!("formatting {} ({blocks} blocks)", path.display());

    flatfs::format(&block_file, blocks).map_err(io::Error::other)
}
