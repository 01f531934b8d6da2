use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::common::types::{Lsn, Page, PageId, PAGE_SIZE};

/// Hard cap on directory growth: the directory holds up to 2^MAX_DEPTH
/// entries and still fits one page.
pub const MAX_DEPTH: u32 = 9;

/// Physical entry capacity of the directory array
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_DEPTH;

// On-page layout, all little-endian:
//   [0..4)        self page id
//   [4..12)       lsn
//   [12..16)      global depth
//   [16..528)     local depths, one byte per entry
//   [528..2576)   bucket page ids, four bytes per entry
const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 12;
const LOCAL_DEPTHS_OFFSET: usize = 16;
const BUCKET_PAGE_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;
const DIRECTORY_END: usize = BUCKET_PAGE_IDS_OFFSET + DIRECTORY_ARRAY_SIZE * 4;

const _: () = assert!(DIRECTORY_END <= PAGE_SIZE);

/// Read-only view of an extendible hash directory page.
///
/// The directory maps the low `global_depth` bits of a key's hash to a
/// bucket page id. Mutation goes through [`HashDirectoryPageMut`]; callers
/// serialize structural changes with the table-level latch.
pub struct HashDirectoryPage<'a> {
    data: &'a [u8; PAGE_SIZE],
}

impl<'a> HashDirectoryPage<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { data: &page.data }
    }

    pub fn page_id(&self) -> PageId {
        LittleEndian::read_u32(&self.data[PAGE_ID_OFFSET..])
    }

    pub fn lsn(&self) -> Lsn {
        LittleEndian::read_u64(&self.data[LSN_OFFSET..])
    }

    pub fn global_depth(&self) -> u32 {
        LittleEndian::read_u32(&self.data[GLOBAL_DEPTH_OFFSET..])
    }

    /// Mask selecting the hash bits the directory currently indexes by
    pub fn global_depth_mask(&self) -> u32 {
        (1 << self.global_depth()) - 1
    }

    /// Logical number of directory entries, `2^global_depth`
    pub fn size(&self) -> usize {
        1 << self.global_depth()
    }

    pub fn local_depth(&self, bucket_idx: usize) -> u32 {
        self.data[LOCAL_DEPTHS_OFFSET + bucket_idx] as u32
    }

    pub fn local_depth_mask(&self, bucket_idx: usize) -> u32 {
        (1 << self.local_depth(bucket_idx)) - 1
    }

    pub fn bucket_page_id(&self, bucket_idx: usize) -> PageId {
        LittleEndian::read_u32(&self.data[BUCKET_PAGE_IDS_OFFSET + bucket_idx * 4..])
    }

    /// Companion index of a just-split bucket: flips the highest bit the
    /// bucket's local depth distinguishes.
    pub fn split_image_index(&self, bucket_idx: usize) -> usize {
        bucket_idx ^ (1 << (self.local_depth(bucket_idx) - 1))
    }

    /// High bits of `bucket_idx` shared by every entry of the same bucket
    pub fn local_high_bit(&self, bucket_idx: usize) -> usize {
        let shift = self.global_depth() - self.local_depth(bucket_idx);
        (bucket_idx >> shift) << shift
    }

    /// The directory can halve only when no bucket uses every indexed bit
    pub fn can_shrink(&self) -> bool {
        if self.global_depth() == 0 {
            return false;
        }
        (0..self.size()).all(|i| self.local_depth(i) < self.global_depth())
    }

    /// Check the directory invariants:
    /// (1) every local depth is at most the global depth,
    /// (2) each bucket page has exactly 2^(global - local) entries,
    /// (3) entries sharing a bucket page share a local depth.
    ///
    /// Panics on violation; this is a debugging aid, not a recovery path.
    pub fn verify_integrity(&self) {
        use std::collections::HashMap;

        let mut page_id_to_count: HashMap<PageId, u32> = HashMap::new();
        let mut page_id_to_ld: HashMap<PageId, u32> = HashMap::new();

        for idx in 0..self.size() {
            let page_id = self.bucket_page_id(idx);
            let ld = self.local_depth(idx);
            assert!(
                ld <= self.global_depth(),
                "local depth {} exceeds global depth {} at index {}",
                ld,
                self.global_depth(),
                idx
            );

            *page_id_to_count.entry(page_id).or_insert(0) += 1;

            match page_id_to_ld.get(&page_id) {
                Some(&seen) if seen != ld => {
                    warn!(
                        "directory integrity: local depth {} != {} for page {}",
                        ld, seen, page_id
                    );
                    self.log_directory();
                    panic!("inconsistent local depths for bucket page {}", page_id);
                }
                Some(_) => {}
                None => {
                    page_id_to_ld.insert(page_id, ld);
                }
            }
        }

        for (page_id, count) in &page_id_to_count {
            let ld = page_id_to_ld[page_id];
            let required = 1u32 << (self.global_depth() - ld);
            if *count != required {
                warn!(
                    "directory integrity: {} entries != required {} for page {}",
                    count, required, page_id
                );
                self.log_directory();
                panic!("wrong entry count for bucket page {}", page_id);
            }
        }
    }

    fn log_directory(&self) {
        warn!("directory dump, global depth {}", self.global_depth());
        for idx in 0..self.size() {
            warn!(
                "  idx {:4}  page {:8}  local depth {}",
                idx,
                self.bucket_page_id(idx),
                self.local_depth(idx)
            );
        }
    }
}

/// Mutable view of a directory page; reads go through [`Self::as_view`].
pub struct HashDirectoryPageMut<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> HashDirectoryPageMut<'a> {
    pub fn new(page: &'a mut Page) -> Self {
        Self {
            data: &mut page.data,
        }
    }

    pub fn as_view(&self) -> HashDirectoryPage<'_> {
        HashDirectoryPage { data: self.data }
    }

    /// Format a freshly allocated page as an empty directory of depth zero
    pub fn init(&mut self, page_id: PageId) {
        self.data[..DIRECTORY_END].fill(0);
        self.set_page_id(page_id);
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        LittleEndian::write_u32(&mut self.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4], page_id);
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        LittleEndian::write_u64(&mut self.data[LSN_OFFSET..LSN_OFFSET + 8], lsn);
    }

    fn set_global_depth(&mut self, depth: u32) {
        LittleEndian::write_u32(
            &mut self.data[GLOBAL_DEPTH_OFFSET..GLOBAL_DEPTH_OFFSET + 4],
            depth,
        );
    }

    pub fn set_local_depth(&mut self, bucket_idx: usize, depth: u32) {
        debug_assert!(depth <= MAX_DEPTH);
        self.data[LOCAL_DEPTHS_OFFSET + bucket_idx] = depth as u8;
    }

    pub fn incr_local_depth(&mut self, bucket_idx: usize) {
        let depth = self.as_view().local_depth(bucket_idx);
        self.set_local_depth(bucket_idx, depth + 1);
    }

    pub fn decr_local_depth(&mut self, bucket_idx: usize) {
        let depth = self.as_view().local_depth(bucket_idx);
        self.set_local_depth(bucket_idx, depth - 1);
    }

    pub fn set_bucket_page_id(&mut self, bucket_idx: usize, bucket_page_id: PageId) {
        LittleEndian::write_u32(
            &mut self.data[BUCKET_PAGE_IDS_OFFSET + bucket_idx * 4..],
            bucket_page_id,
        );
    }

    /// Double the directory by copying entries `[0, size)` into
    /// `[size, 2*size)`; local depths carry over unchanged.
    pub fn incr_global_depth(&mut self) {
        let view = self.as_view();
        let size = view.size();
        debug_assert!(view.global_depth() < MAX_DEPTH);

        for idx in 0..size {
            let page_id = self.as_view().bucket_page_id(idx);
            let depth = self.as_view().local_depth(idx);
            self.set_bucket_page_id(size + idx, page_id);
            self.set_local_depth(size + idx, depth);
        }
        let depth = self.as_view().global_depth();
        self.set_global_depth(depth + 1);
    }

    /// Halve the directory; callers check [`HashDirectoryPage::can_shrink`].
    pub fn decr_global_depth(&mut self) {
        let depth = self.as_view().global_depth();
        debug_assert!(depth > 0);
        self.set_global_depth(depth - 1);
    }
}
