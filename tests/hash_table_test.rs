use std::sync::Arc;
use std::thread;
use anyhow::Result;
use rookdb::index::hash::bucket_page::bucket_array_size;
use rookdb::index::ExtendibleHashTable;

mod common;
use common::create_test_buffer_pool;

// Identity hashing lets tests choose the exact directory bits a key maps to.
fn identity_hash(key: &u32) -> u32 {
    *key
}

#[test]
fn test_insert_and_get_value() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;
    let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(buffer_pool)?;

    assert!(table.insert(None, &1, &100)?);
    assert!(table.insert(None, &1, &101)?);
    assert!(table.insert(None, &2, &200)?);

    let mut values = table.get_value(None, &1)?;
    values.sort_unstable();
    assert_eq!(values, vec![100, 101]);
    assert_eq!(table.get_value(None, &3)?, Vec::<u32>::new());

    table.verify_integrity()?;
    Ok(())
}

#[test]
fn test_duplicate_pair_rejected() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;
    let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(buffer_pool)?;

    assert!(table.insert(None, &7, &70)?);
    assert!(!table.insert(None, &7, &70)?);
    assert_eq!(table.get_value(None, &7)?, vec![70]);
    Ok(())
}

#[test]
fn test_remove_tracks_multiset() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;
    let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(buffer_pool)?;

    assert!(table.insert(None, &5, &50)?);
    assert!(table.insert(None, &5, &51)?);
    assert!(table.remove(None, &5, &50)?);
    assert!(!table.remove(None, &5, &50)?);

    assert_eq!(table.get_value(None, &5)?, vec![51]);
    table.verify_integrity()?;
    Ok(())
}

// Bucket split scenario: fill the depth-zero bucket with even-hash keys,
// then one odd-hash key forces a split. Global depth grows to one, the even
// keys stay in the low bucket, the odd key lands in its image.
#[test]
fn test_bucket_split_on_overflow() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;
    let table: ExtendibleHashTable<u32, u32> =
        ExtendibleHashTable::with_hash_fn(buffer_pool, identity_hash)?;

    let capacity = bucket_array_size::<u32, u32>() as u32;
    let even_keys: Vec<u32> = (0..capacity).map(|i| i * 2).collect();
    for key in &even_keys {
        assert!(table.insert(None, key, &(key * 10))?);
    }
    assert_eq!(table.get_global_depth()?, 0);

    // The overflowing odd key splits bucket zero.
    assert!(table.insert(None, &1, &10)?);
    assert_eq!(table.get_global_depth()?, 1);
    table.verify_integrity()?;

    for key in &even_keys {
        assert_eq!(table.get_value(None, key)?, vec![key * 10]);
    }
    assert_eq!(table.get_value(None, &1)?, vec![10]);
    Ok(())
}

// Merge and shrink scenario, continuing the split: removing every even key
// empties the even bucket, which folds into its image and the directory
// collapses back to depth zero.
#[test]
fn test_merge_and_shrink_after_removals() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;
    let table: ExtendibleHashTable<u32, u32> =
        ExtendibleHashTable::with_hash_fn(buffer_pool, identity_hash)?;

    let capacity = bucket_array_size::<u32, u32>() as u32;
    let even_keys: Vec<u32> = (0..capacity).map(|i| i * 2).collect();
    for key in &even_keys {
        assert!(table.insert(None, key, &(key * 10))?);
    }
    assert!(table.insert(None, &1, &10)?);
    assert_eq!(table.get_global_depth()?, 1);

    for key in &even_keys {
        assert!(table.remove(None, key, &(key * 10))?);
    }

    assert_eq!(table.get_global_depth()?, 0);
    table.verify_integrity()?;
    assert_eq!(table.get_value(None, &1)?, vec![10]);
    assert_eq!(table.get_value(None, &0)?, Vec::<u32>::new());
    Ok(())
}

#[test]
fn test_grow_two_levels_and_drain() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(20)?;
    let table: ExtendibleHashTable<u32, u32> =
        ExtendibleHashTable::with_hash_fn(buffer_pool, identity_hash)?;

    let capacity = bucket_array_size::<u32, u32>() as u32;

    // Keys congruent to 0 mod 4 overflow through two splits.
    let stride_keys: Vec<u32> = (0..capacity + 1).map(|i| i * 4).collect();
    for key in &stride_keys {
        assert!(table.insert(None, key, key)?);
    }
    assert!(table.get_global_depth()? >= 1);
    table.verify_integrity()?;

    for key in &stride_keys {
        assert_eq!(table.get_value(None, key)?, vec![*key]);
        assert!(table.remove(None, key, key)?);
    }
    table.verify_integrity()?;
    // Buckets that never held a key cannot trigger a merge, so the
    // directory may stop one level short of fully collapsing.
    assert!(table.get_global_depth()? <= 1);
    Ok(())
}

// Mass round-trip with the default hasher: everything inserted is found,
// everything removed is gone, and the directory invariants hold throughout.
#[test]
fn test_mass_insert_remove_round_trip() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(40)?;
    let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(buffer_pool)?;

    let n = 3000u32;
    for key in 0..n {
        assert!(table.insert(None, &key, &(key + 1))?);
    }
    let grown_depth = table.get_global_depth()?;
    assert!(grown_depth >= 1);
    table.verify_integrity()?;

    for key in 0..n {
        assert_eq!(table.get_value(None, &key)?, vec![key + 1]);
    }

    for key in 0..n {
        assert!(table.remove(None, &key, &(key + 1))?);
    }
    for key in 0..n {
        assert_eq!(table.get_value(None, &key)?, Vec::<u32>::new());
    }
    table.verify_integrity()?;
    assert!(table.get_global_depth()? <= grown_depth);
    Ok(())
}

#[test]
fn test_concurrent_inserts_and_reads() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(50)?;
    let table: Arc<ExtendibleHashTable<u32, u32>> =
        Arc::new(ExtendibleHashTable::new(buffer_pool)?);

    let threads = 4u32;
    let per_thread = 500u32;

    let mut handles = Vec::new();
    for t in 0..threads {
        let table = table.clone();
        handles.push(thread::spawn(move || {
            let base = t * per_thread;
            for key in base..base + per_thread {
                assert!(table.insert(None, &key, &key).unwrap());
            }
            // Read back a slice while other threads keep splitting.
            for key in base..base + per_thread {
                assert_eq!(table.get_value(None, &key).unwrap(), vec![key]);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    table.verify_integrity()?;
    for key in 0..threads * per_thread {
        assert_eq!(table.get_value(None, &key)?, vec![key]);
    }
    Ok(())
}

#[test]
fn test_directory_page_id_reattach() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;
    let table: ExtendibleHashTable<u32, u32> =
        ExtendibleHashTable::with_hash_fn(buffer_pool.clone(), identity_hash)?;
    let directory_page_id = table.directory_page_id();

    assert!(table.insert(None, &9, &90)?);
    drop(table);

    // The caller remembered the directory page id; a new handle sees the
    // same index through the same buffer pool.
    let reopened: ExtendibleHashTable<u32, u32> =
        ExtendibleHashTable::open(buffer_pool, directory_page_id, identity_hash);
    assert_eq!(reopened.get_value(None, &9)?, vec![90]);
    Ok(())
}
