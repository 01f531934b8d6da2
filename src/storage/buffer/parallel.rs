use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;
use crate::storage::buffer::BufferPoolConfig;
use crate::storage::disk::DiskManager;

/// A pool of buffer pool instances sharing one disk manager.
///
/// Page id `p` is owned by instance `p % num_instances`, so routing needs no
/// coordination: each instance latches only its own state. `new_page` probes
/// instances round-robin from a rotating start so allocation spreads evenly.
pub struct ParallelBufferPool {
    instances: Vec<BufferPoolManager>,
    next_instance: Mutex<usize>,
}

impl ParallelBufferPool {
    pub fn new(config: BufferPoolConfig, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(config, disk_manager))
    }

    pub fn with_disk_manager(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        let instances = (0..config.num_instances)
            .map(|i| {
                BufferPoolManager::new_multi(
                    config.pool_size,
                    config.num_instances,
                    i,
                    disk_manager.clone(),
                )
            })
            .collect();
        Self {
            instances,
            next_instance: Mutex::new(0),
        }
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Total frames across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        &self.instances[(page_id as usize) % self.instances.len()]
    }

    /// Create a page on the first instance with a frame to spare.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let start = {
            let mut next = self.next_instance.lock();
            let start = *next;
            *next = (*next + 1) % self.instances.len();
            start
        };

        for offset in 0..self.instances.len() {
            let idx = (start + offset) % self.instances.len();
            match self.instances[idx].new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::BufferPoolFull) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BufferPoolError::BufferPoolFull)
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }
}
