use anyhow::Result;
use rookdb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;

    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }
    assert_eq!(buffer_pool.pin_count(page_id), Some(1));

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    assert!(buffer_pool.unpin_page(page_id, false));

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }
    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_page_modification_survives_eviction() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    assert!(buffer_pool.unpin_page(page_id, true));

    // Churn every frame so the page must be written out and reloaded.
    for _ in 0..3 {
        let (_, fill_id) = buffer_pool.new_page()?;
        assert!(buffer_pool.unpin_page(fill_id, false));
    }

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(&page_guard.data[100..109], b"Test Data");
    }
    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

// Pool churn end to end: a full pool refuses NewPage, an unpin frees
// exactly one frame, and the evicted page comes back from disk.
#[test]
fn test_pool_churn() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page0, p0) = buffer_pool.new_page()?;
    let (page1, p1) = buffer_pool.new_page()?;
    let (_page2, p2) = buffer_pool.new_page()?;

    page0.write().data[0] = 10;
    page1.write().data[0] = 11;

    // All three frames pinned: no room for a fourth page.
    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));

    // Give up p1; its frame is reused by the next allocation.
    assert!(buffer_pool.unpin_page(p1, true));
    let (_page3, p3) = buffer_pool.new_page()?;
    assert_ne!(p3, p1);

    // p1 is no longer resident; fetching reads it back from disk into a
    // different frame (freed by unpinning p0).
    assert!(buffer_pool.unpin_page(p0, true));
    let refetched = buffer_pool.fetch_page(p1)?;
    assert_eq!(refetched.read().data[0], 11);

    assert!(buffer_pool.unpin_page(p1, false));
    assert!(buffer_pool.unpin_page(p2, false));
    assert!(buffer_pool.unpin_page(p3, false));
    Ok(())
}

#[test]
fn test_flush_page_persists_without_unpin_dirty() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    page.write().data[7] = 99;
    buffer_pool.flush_page(page_id)?;

    // A clean unpin after the flush must not lose the flushed bytes.
    assert!(buffer_pool.unpin_page(page_id, false));
    for _ in 0..3 {
        let (_, fill_id) = buffer_pool.new_page()?;
        assert!(buffer_pool.unpin_page(fill_id, false));
    }

    let fetched = buffer_pool.fetch_page(page_id)?;
    assert_eq!(fetched.read().data[7], 99);
    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_flush_of_unknown_page_fails() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;
    assert!(matches!(
        buffer_pool.flush_page(12345),
        Err(BufferPoolError::PageNotFound(12345))
    ));
    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (_temp_file, path) = common::create_temp_db_file()?;
    let buffer_pool = rookdb::BufferPoolManager::new(5, &path)?;

    let mut page_ids = Vec::new();
    for i in 0..5u8 {
        let (page, page_id) = buffer_pool.new_page()?;
        page.write().data[0] = i + 1;
        assert!(buffer_pool.unpin_page(page_id, true));
        page_ids.push(page_id);
    }
    buffer_pool.flush_all_pages()?;

    // A fresh pool over the same file sees every flushed byte.
    let reopened = rookdb::BufferPoolManager::new(5, &path)?;
    for (i, page_id) in page_ids.iter().enumerate() {
        let page = reopened.fetch_page(*page_id)?;
        assert_eq!(page.read().data[0], i as u8 + 1);
        assert!(reopened.unpin_page(*page_id, false));
    }
    Ok(())
}

#[test]
fn test_delete_page_frees_frame() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(1)?;

    let (_, page_id) = buffer_pool.new_page()?;
    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(buffer_pool.delete_page(page_id)?);

    // The single frame is free again.
    let (_, replacement) = buffer_pool.new_page()?;
    assert_ne!(replacement, page_id);
    assert!(buffer_pool.unpin_page(replacement, false));
    Ok(())
}

#[test]
fn test_unpin_contract_violations() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (_, page_id) = buffer_pool.new_page()?;
    assert!(buffer_pool.unpin_page(page_id, false));
    assert!(!buffer_pool.unpin_page(page_id, false));
    assert!(!buffer_pool.unpin_page(4242, false));
    Ok(())
}

#[test]
fn test_pinned_pages_survive_pressure() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    let (page, page_id) = buffer_pool.new_page()?;
    page.write().data[0] = 55;

    // Heavy churn on the other three frames never evicts the pinned page.
    for _ in 0..20 {
        let (_, fill_id) = buffer_pool.new_page()?;
        assert!(buffer_pool.unpin_page(fill_id, false));
    }

    assert_eq!(buffer_pool.pin_count(page_id), Some(1));
    assert_eq!(page.read().data[0], 55);
    assert!(buffer_pool.unpin_page(page_id, true));
    Ok(())
}
