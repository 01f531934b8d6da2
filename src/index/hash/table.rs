use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;

use crate::common::types::{PageId, TxnId};
use crate::index::hash::bucket_page::{HashBucketPage, HashBucketPageMut};
use crate::index::hash::directory_page::{HashDirectoryPage, HashDirectoryPageMut, MAX_DEPTH};
use crate::index::hash::error::IndexError;
use crate::index::hash::storable::Storable;
use crate::storage::buffer::BufferPoolManager;

/// Hash a key with the std hasher, truncated to the 32 bits the directory
/// indexes by. Deterministic within a process, which is all the directory
/// needs; tests substitute their own function to pin specific bits.
pub fn default_hash<K: Hash>(key: &K) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as u32
}

/// Extendible hash table built on buffer-pool pages.
///
/// One directory page maps hash prefixes to bucket pages; buckets split on
/// overflow (growing the directory when needed) and merge with their split
/// image when emptied, shrinking the directory back.
///
/// The table-level latch orders before any page latch and protects the
/// directory structure; individual buckets are protected by their page
/// latches. Readers take the table latch shared, structural changes
/// (split, merge) take it exclusive.
pub struct ExtendibleHashTable<K, V> {
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: PageId,
    table_latch: RwLock<()>,
    hash_fn: fn(&K) -> u32,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Storable + Hash,
    V: Storable,
{
    /// Create a fresh table: one directory of depth zero pointing at a
    /// single empty bucket.
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Result<Self, IndexError> {
        Self::with_hash_fn(buffer_pool, default_hash::<K>)
    }

    pub fn with_hash_fn(
        buffer_pool: Arc<BufferPoolManager>,
        hash_fn: fn(&K) -> u32,
    ) -> Result<Self, IndexError> {
        let (directory_page, directory_page_id) = buffer_pool.new_page()?;
        let (_bucket_page, bucket_page_id) = buffer_pool.new_page()?;

        {
            let mut dir_guard = directory_page.write();
            let mut dir = HashDirectoryPageMut::new(&mut dir_guard);
            dir.init(directory_page_id);
            dir.set_bucket_page_id(0, bucket_page_id);
        }

        // A zeroed page is already a valid empty bucket.
        let unpinned = buffer_pool.unpin_page(directory_page_id, true);
        debug_assert!(unpinned);
        let unpinned = buffer_pool.unpin_page(bucket_page_id, true);
        debug_assert!(unpinned);

        Ok(Self {
            buffer_pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            hash_fn,
            _marker: PhantomData,
        })
    }

    /// Attach to a directory created earlier through the same buffer pool.
    /// Remembering the directory page id across sessions is the caller's
    /// business.
    pub fn open(
        buffer_pool: Arc<BufferPoolManager>,
        directory_page_id: PageId,
        hash_fn: fn(&K) -> u32,
    ) -> Self {
        Self {
            buffer_pool,
            directory_page_id,
            table_latch: RwLock::new(()),
            hash_fn,
            _marker: PhantomData,
        }
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id
    }

    fn hash(&self, key: &K) -> u32 {
        (self.hash_fn)(key)
    }

    /// Unpin a page this table pinned. Failure would mean a pin accounting
    /// bug inside the table itself.
    fn unpin(&self, page_id: PageId, is_dirty: bool) {
        let unpinned = self.buffer_pool.unpin_page(page_id, is_dirty);
        debug_assert!(unpinned, "unpin of page {} failed", page_id);
    }

    fn key_to_directory_index(&self, key: &K, dir: &HashDirectoryPage<'_>) -> usize {
        (self.hash(key) & dir.global_depth_mask()) as usize
    }

    /// Collect every value stored under `key`. The `txn` id is only for
    /// tracing; the table latch does the synchronization.
    pub fn get_value(&self, txn: Option<TxnId>, key: &K) -> Result<Vec<V>, IndexError> {
        let _table = self.table_latch.read();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let bucket_page_id = {
            let dir_guard = directory_page.read();
            let dir = HashDirectoryPage::new(&dir_guard);
            dir.bucket_page_id(self.key_to_directory_index(key, &dir))
        };

        let bucket_page = match self.buffer_pool.fetch_page(bucket_page_id) {
            Ok(page) => page,
            Err(e) => {
                self.unpin(self.directory_page_id, false);
                return Err(e.into());
            }
        };

        let values = {
            let bucket_guard = bucket_page.read();
            HashBucketPage::<K, V>::new(&bucket_guard).get_value(key)
        };

        self.unpin(bucket_page_id, false);
        self.unpin(self.directory_page_id, false);

        if let Some(txn_id) = txn {
            debug!("txn {} read {} values from hash index", txn_id, values.len());
        }
        Ok(values)
    }

    /// Insert a `(key, value)` pair. Duplicate pairs are rejected. A full
    /// bucket triggers a split and a retry; returns false when the bucket
    /// can no longer split because the directory is at its depth cap.
    pub fn insert(&self, txn: Option<TxnId>, key: &K, value: &V) -> Result<bool, IndexError> {
        loop {
            match self.try_insert(key, value)? {
                Some(inserted) => {
                    if let Some(txn_id) = txn {
                        debug!("txn {} hash index insert: {}", txn_id, inserted);
                    }
                    return Ok(inserted);
                }
                None => {
                    // Bucket full. Split, then retry against the regrown
                    // directory; every retry increases a depth or lowers
                    // the target bucket's utilization, so this terminates.
                    if !self.split_insert(key)? {
                        debug!("hash index bucket unsplittable at max depth, insert fails");
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Fast path under the shared table latch: write-latch the bucket and
    /// re-check fullness before mutating. `None` means the bucket is full.
    fn try_insert(&self, key: &K, value: &V) -> Result<Option<bool>, IndexError> {
        let _table = self.table_latch.read();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let bucket_page_id = {
            let dir_guard = directory_page.read();
            let dir = HashDirectoryPage::new(&dir_guard);
            dir.bucket_page_id(self.key_to_directory_index(key, &dir))
        };

        let bucket_page = match self.buffer_pool.fetch_page(bucket_page_id) {
            Ok(page) => page,
            Err(e) => {
                self.unpin(self.directory_page_id, false);
                return Err(e.into());
            }
        };

        let outcome = {
            let mut bucket_guard = bucket_page.write();
            let mut bucket = HashBucketPageMut::<K, V>::new(&mut bucket_guard);
            if bucket.as_view().is_full() {
                None
            } else {
                Some(bucket.insert(key, value))
            }
        };

        let dirtied = outcome == Some(true);
        self.unpin(bucket_page_id, dirtied);
        self.unpin(self.directory_page_id, false);
        Ok(outcome)
    }

    /// Split the bucket `key` hashes to, growing the directory when the
    /// bucket already uses every indexed bit. Returns false when the
    /// directory is saturated and no split is possible.
    fn split_insert(&self, key: &K) -> Result<bool, IndexError> {
        let _table = self.table_latch.write();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;

        // Recompute against the directory as it is now; a concurrent
        // splitter may have gotten here first.
        let (split_idx, image_idx, split_page_id) = {
            let mut dir_guard = directory_page.write();
            let mut dir = HashDirectoryPageMut::new(&mut dir_guard);

            let idx = self.key_to_directory_index(key, &dir.as_view());
            let local_depth = dir.as_view().local_depth(idx);
            if local_depth == MAX_DEPTH {
                self.unpin(self.directory_page_id, false);
                return Ok(false);
            }
            if local_depth == dir.as_view().global_depth() {
                dir.incr_global_depth();
            }
            dir.incr_local_depth(idx);

            let image_idx = dir.as_view().split_image_index(idx);
            (idx, image_idx, dir.as_view().bucket_page_id(idx))
        };

        // Drain the overflowing bucket. The exclusive table latch keeps the
        // transiently empty bucket invisible.
        let split_page = match self.buffer_pool.fetch_page(split_page_id) {
            Ok(page) => page,
            Err(e) => {
                self.unpin(self.directory_page_id, true);
                return Err(e.into());
            }
        };
        let saved = {
            let mut split_guard = split_page.write();
            let mut bucket = HashBucketPageMut::<K, V>::new(&mut split_guard);
            let saved = bucket.as_view().entries();
            bucket.clear();
            saved
        };

        let (image_page, image_page_id) = match self.buffer_pool.new_page() {
            Ok(result) => result,
            Err(e) => {
                self.unpin(split_page_id, true);
                self.unpin(self.directory_page_id, true);
                return Err(e.into());
            }
        };

        {
            let mut dir_guard = directory_page.write();
            let mut dir = HashDirectoryPageMut::new(&mut dir_guard);

            // Point every directory entry of the two halves at its bucket.
            let new_local_depth = dir.as_view().local_depth(split_idx);
            let diff = 1usize << new_local_depth;
            let size = dir.as_view().size();
            for idx in ((split_idx % diff)..size).step_by(diff) {
                dir.set_local_depth(idx, new_local_depth);
                dir.set_bucket_page_id(idx, split_page_id);
            }
            for idx in ((image_idx % diff)..size).step_by(diff) {
                dir.set_local_depth(idx, new_local_depth);
                dir.set_bucket_page_id(idx, image_page_id);
            }

            // Redistribute the saved pairs by the freshly uncovered bit.
            let mut split_guard = split_page.write();
            let mut image_guard = image_page.write();
            let mut split_bucket = HashBucketPageMut::<K, V>::new(&mut split_guard);
            let mut image_bucket = HashBucketPageMut::<K, V>::new(&mut image_guard);
            for (pair_key, pair_value) in &saved {
                let target =
                    dir.as_view().bucket_page_id(self.key_to_directory_index(pair_key, &dir.as_view()));
                debug_assert!(target == split_page_id || target == image_page_id);
                let reinserted = if target == split_page_id {
                    split_bucket.insert(pair_key, pair_value)
                } else {
                    image_bucket.insert(pair_key, pair_value)
                };
                debug_assert!(reinserted);
            }
        }

        debug!(
            "hash index split: bucket page {} -> image page {}",
            split_page_id, image_page_id
        );

        self.unpin(split_page_id, true);
        self.unpin(image_page_id, true);
        self.unpin(self.directory_page_id, true);
        Ok(true)
    }

    /// Remove one `(key, value)` pair. Emptying a bucket triggers a merge
    /// with its split image.
    pub fn remove(&self, txn: Option<TxnId>, key: &K, value: &V) -> Result<bool, IndexError> {
        let (removed, became_empty) = {
            let _table = self.table_latch.read();

            let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
            let bucket_page_id = {
                let dir_guard = directory_page.read();
                let dir = HashDirectoryPage::new(&dir_guard);
                dir.bucket_page_id(self.key_to_directory_index(key, &dir))
            };

            let bucket_page = match self.buffer_pool.fetch_page(bucket_page_id) {
                Ok(page) => page,
                Err(e) => {
                    self.unpin(self.directory_page_id, false);
                    return Err(e.into());
                }
            };

            let (removed, became_empty) = {
                let mut bucket_guard = bucket_page.write();
                let mut bucket = HashBucketPageMut::<K, V>::new(&mut bucket_guard);
                let removed = bucket.remove(key, value);
                (removed, bucket.as_view().is_empty())
            };

            self.unpin(bucket_page_id, removed);
            self.unpin(self.directory_page_id, false);
            (removed, became_empty)
        };

        if became_empty {
            self.merge(key)?;
        }
        if let Some(txn_id) = txn {
            debug!("txn {} hash index remove: {}", txn_id, removed);
        }
        Ok(removed)
    }

    /// Fold an empty bucket into its split image and shrink the directory
    /// while possible. Races with inserters are rechecked under the
    /// exclusive table latch; a no-longer-empty bucket aborts the merge.
    fn merge(&self, key: &K) -> Result<(), IndexError> {
        let _table = self.table_latch.write();

        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;

        let (target_idx, image_idx, target_page_id, image_page_id) = {
            let dir_guard = directory_page.read();
            let dir = HashDirectoryPage::new(&dir_guard);

            let target_idx = self.key_to_directory_index(key, &dir);
            let local_depth = dir.local_depth(target_idx);
            if local_depth == 0 {
                self.unpin(self.directory_page_id, false);
                return Ok(());
            }
            let image_idx = dir.split_image_index(target_idx);
            if dir.local_depth(image_idx) != local_depth {
                self.unpin(self.directory_page_id, false);
                return Ok(());
            }
            (
                target_idx,
                image_idx,
                dir.bucket_page_id(target_idx),
                dir.bucket_page_id(image_idx),
            )
        };

        // A concurrent inserter may have refilled the bucket.
        let target_page = match self.buffer_pool.fetch_page(target_page_id) {
            Ok(page) => page,
            Err(e) => {
                self.unpin(self.directory_page_id, false);
                return Err(e.into());
            }
        };
        let still_empty = {
            let target_guard = target_page.read();
            HashBucketPage::<K, V>::new(&target_guard).is_empty()
        };
        self.unpin(target_page_id, false);
        if !still_empty {
            self.unpin(self.directory_page_id, false);
            return Ok(());
        }

        let deleted = self.buffer_pool.delete_page(target_page_id)?;
        debug_assert!(deleted);

        {
            let mut dir_guard = directory_page.write();
            let mut dir = HashDirectoryPageMut::new(&mut dir_guard);

            dir.set_bucket_page_id(target_idx, image_page_id);
            dir.decr_local_depth(target_idx);
            dir.decr_local_depth(image_idx);
            let new_local_depth = dir.as_view().local_depth(image_idx);

            // Sweep any remaining references to the deleted page.
            for idx in 0..dir.as_view().size() {
                let page_id = dir.as_view().bucket_page_id(idx);
                if page_id == target_page_id || page_id == image_page_id {
                    dir.set_bucket_page_id(idx, image_page_id);
                    dir.set_local_depth(idx, new_local_depth);
                }
            }

            // One merge can enable several halvings.
            while dir.as_view().can_shrink() {
                dir.decr_global_depth();
            }
        }

        debug!(
            "hash index merge: bucket page {} folded into {}",
            target_page_id, image_page_id
        );
        self.unpin(self.directory_page_id, true);
        Ok(())
    }

    pub fn get_global_depth(&self) -> Result<u32, IndexError> {
        let _table = self.table_latch.read();
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        let depth = {
            let dir_guard = directory_page.read();
            HashDirectoryPage::new(&dir_guard).global_depth()
        };
        self.unpin(self.directory_page_id, false);
        Ok(depth)
    }

    /// Panic if the directory invariants do not hold
    pub fn verify_integrity(&self) -> Result<(), IndexError> {
        let _table = self.table_latch.read();
        let directory_page = self.buffer_pool.fetch_page(self.directory_page_id)?;
        {
            let dir_guard = directory_page.read();
            HashDirectoryPage::new(&dir_guard).verify_integrity();
        }
        self.unpin(self.directory_page_id, false);
        Ok(())
    }
}
