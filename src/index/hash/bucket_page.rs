use std::marker::PhantomData;

use crate::common::types::{Page, PAGE_SIZE};
use crate::index::hash::storable::Storable;

/// Slots a bucket page can hold for the given key/value widths.
///
/// Reserves one bit per slot in each of the two bitmaps:
/// `4 * PAGE_SIZE / (4 * pair_size + 1)` slots leave room for
/// `2 * ceil(n/8)` bitmap bytes plus `n * pair_size` slot bytes.
pub fn bucket_array_size<K: Storable, V: Storable>() -> usize {
    4 * PAGE_SIZE / (4 * (K::ENCODED_SIZE + V::ENCODED_SIZE) + 1)
}

fn bitmap_bytes(array_size: usize) -> usize {
    (array_size + 7) / 8
}

// Layout: occupied bitmap, readable bitmap, then the slot array.
// occupied[i] means slot i has held a pair since the last clear; readable[i]
// means it currently holds a live pair. readable implies occupied, and the
// occupied bits form a contiguous prefix, so a scan may stop at the first
// unoccupied slot.

/// Read-only view of a hash bucket page.
pub struct HashBucketPage<'a, K, V> {
    data: &'a [u8; PAGE_SIZE],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: Storable, V: Storable> HashBucketPage<'a, K, V> {
    pub fn new(page: &'a Page) -> Self {
        Self {
            data: &page.data,
            _marker: PhantomData,
        }
    }

    fn slot_offset(slot: usize) -> usize {
        let array_size = bucket_array_size::<K, V>();
        2 * bitmap_bytes(array_size) + slot * (K::ENCODED_SIZE + V::ENCODED_SIZE)
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.data[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        let array_size = bucket_array_size::<K, V>();
        self.data[bitmap_bytes(array_size) + slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn key_at(&self, slot: usize) -> K {
        K::read_from(&self.data[Self::slot_offset(slot)..])
    }

    pub fn value_at(&self, slot: usize) -> V {
        V::read_from(&self.data[Self::slot_offset(slot) + K::ENCODED_SIZE..])
    }

    /// Collect every live value stored under `key`
    pub fn get_value(&self, key: &K) -> Vec<V> {
        let mut result = Vec::new();
        for slot in 0..bucket_array_size::<K, V>() {
            if !self.is_occupied(slot) {
                break;
            }
            if self.is_readable(slot) && self.key_at(slot) == *key {
                result.push(self.value_at(slot));
            }
        }
        result
    }

    pub fn num_readable(&self) -> usize {
        let mut count = 0;
        for slot in 0..bucket_array_size::<K, V>() {
            if !self.is_occupied(slot) {
                break;
            }
            if self.is_readable(slot) {
                count += 1;
            }
        }
        count
    }

    pub fn is_full(&self) -> bool {
        self.num_readable() == bucket_array_size::<K, V>()
    }

    pub fn is_empty(&self) -> bool {
        self.num_readable() == 0
    }

    /// Copy of the live pairs, used when a split redistributes the bucket
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut pairs = Vec::with_capacity(self.num_readable());
        for slot in 0..bucket_array_size::<K, V>() {
            if !self.is_occupied(slot) {
                break;
            }
            if self.is_readable(slot) {
                pairs.push((self.key_at(slot), self.value_at(slot)));
            }
        }
        pairs
    }
}

/// Mutable view of a hash bucket page. The caller holds the page write
/// latch; there is no locking at this level.
pub struct HashBucketPageMut<'a, K, V> {
    data: &'a mut [u8; PAGE_SIZE],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: Storable, V: Storable> HashBucketPageMut<'a, K, V> {
    pub fn new(page: &'a mut Page) -> Self {
        Self {
            data: &mut page.data,
            _marker: PhantomData,
        }
    }

    pub fn as_view(&self) -> HashBucketPage<'_, K, V> {
        HashBucketPage {
            data: self.data,
            _marker: PhantomData,
        }
    }

    fn set_occupied(&mut self, slot: usize) {
        self.data[slot / 8] |= 1 << (slot % 8);
    }

    fn set_readable(&mut self, slot: usize) {
        let array_size = bucket_array_size::<K, V>();
        self.data[bitmap_bytes(array_size) + slot / 8] |= 1 << (slot % 8);
    }

    fn clear_readable(&mut self, slot: usize) {
        let array_size = bucket_array_size::<K, V>();
        self.data[bitmap_bytes(array_size) + slot / 8] &= !(1 << (slot % 8));
    }

    /// Insert a pair, reusing the earliest tombstoned or unoccupied slot.
    ///
    /// Returns false when the exact `(key, value)` pair is already present
    /// or when no slot is free.
    pub fn insert(&mut self, key: &K, value: &V) -> bool {
        let array_size = bucket_array_size::<K, V>();
        let mut free_slot = None;

        for slot in 0..array_size {
            let view = self.as_view();
            if free_slot.is_none() && (!view.is_readable(slot) || !view.is_occupied(slot)) {
                free_slot = Some(slot);
            }
            if !view.is_occupied(slot) {
                break;
            }
            if view.is_readable(slot) && view.key_at(slot) == *key && view.value_at(slot) == *value
            {
                return false;
            }
        }

        let slot = match free_slot {
            Some(slot) => slot,
            None => return false,
        };

        let offset = HashBucketPage::<K, V>::slot_offset(slot);
        key.write_to(&mut self.data[offset..]);
        value.write_to(&mut self.data[offset + K::ENCODED_SIZE..]);
        self.set_occupied(slot);
        self.set_readable(slot);
        true
    }

    /// Remove a matching pair by clearing its readable bit. The occupied
    /// bit stays set so scans keep terminating on the occupied prefix.
    pub fn remove(&mut self, key: &K, value: &V) -> bool {
        let array_size = bucket_array_size::<K, V>();
        for slot in 0..array_size {
            let view = self.as_view();
            if !view.is_occupied(slot) {
                break;
            }
            if view.is_readable(slot) && view.key_at(slot) == *key && view.value_at(slot) == *value
            {
                self.clear_readable(slot);
                return true;
            }
        }
        false
    }

    /// Wipe bitmaps and slots; used when a split rebuilds the bucket
    pub fn clear(&mut self) {
        let array_size = bucket_array_size::<K, V>();
        let end = HashBucketPage::<K, V>::slot_offset(array_size);
        self.data[..end].fill(0);
    }
}
