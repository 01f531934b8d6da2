use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for handling the actual disk I/O operations.
///
/// The database file is treated as a flat array of fixed-size pages; page id
/// `n` lives at byte offset `n * PAGE_SIZE`. Pages that have never been
/// written read back as zeroes. Deallocation is bookkeeping only; the file is
/// never shrunk.
pub struct DiskManager {
    db_file: Mutex<File>,
    free_pages: Mutex<HashSet<PageId>>,
    next_page_id: Mutex<PageId>,
}

impl DiskManager {
    /// Create a new DiskManager with the specified database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let file_size = file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as PageId;

        Ok(Self {
            db_file: Mutex::new(file),
            free_pages: Mutex::new(HashSet::new()),
            next_page_id: Mutex::new(next_page_id),
        })
    }

    /// Read a page from disk.
    ///
    /// Reading a page the file does not yet cover yields an all-zero page,
    /// so freshly allocated pages come back blank without an explicit write.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            if offset >= file_size {
                page.data = buffer;
                page.page_id = page_id;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk, extending the file if needed
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page.page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        {
            let mut next = self.next_page_id.lock();
            if page.page_id >= *next {
                *next = page.page_id + 1;
            }
        }

        Ok(())
    }

    /// Allocate a page on disk and return its ID.
    ///
    /// Prefers a previously deallocated page; otherwise hands out the next
    /// id past the current high-water mark. Buffer pool instances composed
    /// into a parallel pool assign their own ids instead (they must satisfy
    /// the `page_id % num_instances` ownership rule) and only use the disk
    /// manager for I/O and deallocation.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut free = self.free_pages.lock();
        if let Some(&page_id) = free.iter().next() {
            free.remove(&page_id);
            return Ok(page_id);
        }

        let mut next = self.next_page_id.lock();
        let page_id = *next;
        *next += 1;
        Ok(page_id)
    }

    /// Mark a page as free for future allocation
    pub fn deallocate_page(&self, page_id: PageId) {
        if page_id == INVALID_PAGE_ID {
            return;
        }
        self.free_pages.lock().insert(page_id);
    }

    /// Number of pages the backing file currently covers
    pub fn num_pages(&self) -> Result<u64, DiskManagerError> {
        let file = self.db_file.lock();
        Ok(file.metadata()?.len() / PAGE_SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_disk_manager() -> (DiskManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let dm = DiskManager::new(file.path()).unwrap();
        (dm, file)
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (dm, _file) = temp_disk_manager();

        let mut page = Page::new(3);
        page.data[0] = 0xAB;
        page.data[PAGE_SIZE - 1] = 0xCD;
        dm.write_page(&page).unwrap();

        let mut read_back = Page::new(0);
        dm.read_page(3, &mut read_back).unwrap();
        assert_eq!(read_back.page_id, 3);
        assert_eq!(read_back.data[0], 0xAB);
        assert_eq!(read_back.data[PAGE_SIZE - 1], 0xCD);
        assert_eq!(dm.num_pages().unwrap(), 4);
    }

    #[test]
    fn test_read_past_eof_is_zeroed() {
        let (dm, _file) = temp_disk_manager();

        let mut page = Page::new(0);
        page.data = [0xFF; PAGE_SIZE];
        dm.read_page(42, &mut page).unwrap();
        assert_eq!(page.page_id, 42);
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_reuses_deallocated() {
        let (dm, _file) = temp_disk_manager();

        let a = dm.allocate_page().unwrap();
        let b = dm.allocate_page().unwrap();
        assert_ne!(a, b);

        dm.deallocate_page(a);
        let c = dm.allocate_page().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let (dm, _file) = temp_disk_manager();

        let mut page = Page::new(INVALID_PAGE_ID);
        assert!(dm.read_page(INVALID_PAGE_ID, &mut page).is_err());
        assert!(dm.write_page(&page).is_err());
    }
}
