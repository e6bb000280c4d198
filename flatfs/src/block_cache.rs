//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的块复制到内存中，提高对块设备的操作效率。
//! 同时，块缓存层也会尝试返回已缓存的块。
//!
//! 每个挂载的卷独占一个 [`BlockCacheManager`]，**操作块时一定在缓冲区当中**。
//! 脏块只在被换出或同步时写回。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::{BlockDevice, BlockError};
use spin::Mutex;

use crate::{BLOCK_SIZE, DataBlock};

/// 内存中的块缓存
pub struct BlockCache {
    /// 缓存的数据
    data: Box<DataBlock>,
    /// 对应的块ID
    block_id: usize,
    /// 底层块设备的引用
    block_device: Arc<dyn BlockDevice>,
    /// 是否为脏块
    modified: bool,
}

impl BlockCache {
    fn load(block_id: usize, block_device: Arc<dyn BlockDevice>) -> Result<Self, BlockError> {
        let mut data = Box::new([0; BLOCK_SIZE]);
        block_device.read_block(block_id, data.as_mut_slice())?;

        Ok(Self {
            data,
            block_id,
            block_device,
            modified: false,
        })
    }

    /// 新分配的块：内容全零，无需从设备读出
    fn zeroed(block_id: usize, block_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            data: Box::new([0; BLOCK_SIZE]),
            block_id,
            block_device,
            modified: true,
        }
    }

    pub fn sync(&mut self) -> Result<(), BlockError> {
        if self.modified {
            self.block_device
                .write_block(self.block_id, self.data.as_slice())?;
            self.modified = false;
        }
        Ok(())
    }

    #[inline]
    pub fn map<V>(&self, f: impl FnOnce(&DataBlock) -> V) -> V {
        f(&self.data)
    }

    #[inline]
    pub fn map_mut<V>(&mut self, f: impl FnOnce(&mut DataBlock) -> V) -> V {
        self.modified = true;
        f(&mut self.data)
    }

    #[inline]
    pub fn zeroize(&mut self) {
        self.data.fill(0);
        self.modified = true;
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        if let Err(err) = self.sync() {
            log::error!("dropping dirty block {}: {err}", self.block_id);
        }
    }
}

/// 块缓存管理，缓存、调度块缓存
pub struct BlockCacheManager {
    block_device: Arc<dyn BlockDevice>,
    queue: Mutex<Vec<(usize, Arc<Mutex<BlockCache>>)>>,
}

impl BlockCacheManager {
    /// 块缓存个数的上限；
    /// 全部缓存都被引用时允许暂时超出
    const CAPACITY: usize = 16;

    pub fn new(block_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            block_device,
            queue: Mutex::new(Vec::with_capacity(Self::CAPACITY)),
        }
    }

    #[inline]
    pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
        &self.block_device
    }

    pub fn get(&self, block_id: usize) -> Result<Arc<Mutex<BlockCache>>, BlockError> {
        let mut queue = self.queue.lock();

        // 尝试从缓冲区中读取块
        if let Some(cache) = Self::touch(&mut queue, block_id) {
            return Ok(cache);
        }

        Self::make_room(&mut queue)?;

        // 缓存新块
        let block_cache = Arc::new(Mutex::new(BlockCache::load(
            block_id,
            self.block_device.clone(),
        )?));
        queue.push((block_id, block_cache.clone()));

        Ok(block_cache)
    }

    /// 获取一个内容清零的块，用于刚分配出去的块
    pub fn get_zeroed(&self, block_id: usize) -> Result<Arc<Mutex<BlockCache>>, BlockError> {
        let mut queue = self.queue.lock();

        if let Some(cache) = Self::touch(&mut queue, block_id) {
            cache.lock().zeroize();
            return Ok(cache);
        }

        Self::make_room(&mut queue)?;

        let block_cache = Arc::new(Mutex::new(BlockCache::zeroed(
            block_id,
            self.block_device.clone(),
        )));
        queue.push((block_id, block_cache.clone()));

        Ok(block_cache)
    }

    /// 写回全部脏块
    pub fn sync_all(&self) -> Result<(), BlockError> {
        self.queue
            .lock()
            .iter()
            .try_for_each(|(_, cache)| cache.lock().sync())
    }

    /// 命中时把块挪到队尾，队首即最久未用的块
    fn touch(
        queue: &mut Vec<(usize, Arc<Mutex<BlockCache>>)>,
        block_id: usize,
    ) -> Option<Arc<Mutex<BlockCache>>> {
        let index = queue.iter().position(|(id, _)| *id == block_id)?;
        let entry = queue.remove(index);
        let cache = Arc::clone(&entry.1);
        queue.push(entry);
        Some(cache)
    }

    // 块缓存调度策略：写回并踢走最久未用的闲置块
    fn make_room(queue: &mut Vec<(usize, Arc<Mutex<BlockCache>>)>) -> Result<(), BlockError> {
        while queue.len() >= Self::CAPACITY {
            // 没有其它引用的才能写回
            let Some(index) = queue
                .iter()
                .position(|(_, cache)| Arc::strong_count(cache) == 1)
            else {
                log::debug!("all {} cached blocks are pinned", queue.len());
                break;
            };
            queue[index].1.lock().sync()?;
            queue.remove(index);
        }
        Ok(())
    }
}
