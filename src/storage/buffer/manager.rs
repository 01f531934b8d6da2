use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// One slot of the buffer pool. Metadata lives under the pool latch; the
/// page payload has its own reader/writer latch (`PagePtr`).
struct Frame {
    page: PagePtr,
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolInner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    next_page_id: PageId,
}

/// A buffer pool instance: a fixed-size cache of pages with pin/unpin
/// semantics, backed by a disk manager.
///
/// Several instances can be composed into a parallel pool in which page id
/// `p` is owned by instance `p % num_instances`; each instance latches its
/// own state and there is no cross-instance coordination. Page ids handed
/// out by this instance always satisfy
/// `page_id % num_instances == instance_index`.
///
/// Invariants maintained under the pool latch:
/// - a frame is in the page table iff its page id is not INVALID_PAGE_ID
/// - a frame is in the replacer iff it is resident with pin count zero
/// - a frame is on the free list iff it holds no resident page
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    disk_manager: Arc<DiskManager>,
    inner: Mutex<PoolInner>,
}

impl BufferPoolManager {
    /// Create a standalone instance backed by the database file at `db_path`
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::new_multi(pool_size, 1, 0, disk_manager))
    }

    /// Create one instance of a parallel pool of `num_instances` members
    pub fn new_multi(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "pool must have at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index out of range"
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Frame {
                page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            disk_manager,
            inner: Mutex::new(PoolInner {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                next_page_id: instance_index,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    /// Allocate a frame from the free list, or evict the LRU victim,
    /// flushing it first if dirty. Fails when every frame is pinned.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match inner.replacer.victim() {
            Some(id) => id,
            None => return Err(BufferPoolError::BufferPoolFull),
        };

        let (old_page_id, dirty, page) = {
            let frame = &inner.frames[frame_id as usize];
            (frame.page_id, frame.is_dirty, frame.page.clone())
        };

        if dirty {
            let page_guard = page.read();
            if let Err(e) = self.disk_manager.write_page(&page_guard) {
                // Put the victim back; the page is still resident.
                inner.replacer.unpin(frame_id);
                return Err(e.into());
            }
        }

        inner.page_table.remove(&old_page_id);
        inner.frames[frame_id as usize].is_dirty = false;
        Ok(frame_id)
    }

    /// Create a brand-new page, pinned once.
    ///
    /// Fails with [`BufferPoolError::BufferPoolFull`] when every resident
    /// page is pinned. The fresh page is zero-filled and starts clean.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let page_id = inner.next_page_id;
        inner.next_page_id += self.num_instances;
        debug_assert_eq!(page_id % self.num_instances, self.instance_index);

        let page = {
            let frame = &mut inner.frames[frame_id as usize];
            frame.page_id = page_id;
            frame.pin_count = 1;
            frame.is_dirty = false;
            frame.page.clone()
        };
        {
            let mut page_guard = page.write();
            page_guard.reset();
            page_guard.page_id = page_id;
        }

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);
        Ok((page, page_id))
    }

    /// Fetch a page, reading it from disk if it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let page = {
                let frame = &mut inner.frames[frame_id as usize];
                frame.pin_count += 1;
                frame.page.clone()
            };
            inner.replacer.pin(frame_id);
            return Ok(page);
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let page = {
            let frame = &mut inner.frames[frame_id as usize];
            frame.page_id = page_id;
            frame.pin_count = 1;
            frame.is_dirty = false;
            frame.page.clone()
        };

        {
            let mut page_guard = page.write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page_guard) {
                drop(page_guard);
                let frame = &mut inner.frames[frame_id as usize];
                frame.page_id = INVALID_PAGE_ID;
                frame.pin_count = 0;
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);
        Ok(page)
    }

    /// Drop one pin on a page, OR-ing in the dirty flag.
    ///
    /// Returns false when the page is not resident or was not pinned; such
    /// calls are caller errors and leave the pool untouched.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return false,
        };

        let now_unpinned = {
            let frame = &mut inner.frames[frame_id as usize];
            if frame.pin_count == 0 {
                return false;
            }
            frame.pin_count -= 1;
            if is_dirty {
                frame.is_dirty = true;
            }
            frame.pin_count == 0
        };

        if now_unpinned {
            inner.replacer.unpin(frame_id);
        }
        true
    }

    /// Write a resident page back to disk and mark it clean.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let page = inner.frames[frame_id as usize].page.clone();
        {
            let page_guard = page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        inner.frames[frame_id as usize].is_dirty = false;
        Ok(())
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let resident: Vec<FrameId> = inner.page_table.values().copied().collect();
        for frame_id in resident {
            let page = inner.frames[frame_id as usize].page.clone();
            {
                let page_guard = page.read();
                self.disk_manager.write_page(&page_guard)?;
            }
            inner.frames[frame_id as usize].is_dirty = false;
        }
        Ok(())
    }

    /// Delete a page from the pool and deallocate it on disk.
    ///
    /// Deallocation happens regardless of residency. Returns `Ok(true)` when
    /// the page is gone from the pool (including the not-resident case) and
    /// `Ok(false)` when a pin prevented the deletion.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();

        self.disk_manager.deallocate_page(page_id);

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(true),
        };

        let (dirty, page) = {
            let frame = &inner.frames[frame_id as usize];
            if frame.pin_count > 0 {
                return Ok(false);
            }
            (frame.is_dirty, frame.page.clone())
        };

        if dirty {
            let page_guard = page.read();
            self.disk_manager.write_page(&page_guard)?;
        }

        inner.page_table.remove(&page_id);
        inner.replacer.pin(frame_id);
        {
            let frame = &mut inner.frames[frame_id as usize];
            frame.page_id = INVALID_PAGE_ID;
            frame.pin_count = 0;
            frame.is_dirty = false;
        }
        page.write().reset();
        inner.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Pin count of a resident page, for assertions in tests
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        let &frame_id = inner.page_table.get(&page_id)?;
        Some(inner.frames[frame_id as usize].pin_count)
    }
}
