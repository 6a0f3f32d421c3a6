//! Integration tests for the VectorIndex facade
//!
//! Tests cover the complete lifecycle: open -> insert -> search -> delete -> flush

use keel_core::{
    BuildOptions, CompressionMode, IndexError, IndexOptions, MemoryPageStore, PageStore, VectorIndex,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::NamedTempFile;

fn memory_index(dims: usize, options: &str) -> VectorIndex<MemoryPageStore> {
    let options = IndexOptions::parse(options).unwrap();
    let config = options.resolve(dims).unwrap();
    VectorIndex::create(MemoryPageStore::new(config.record_size()), dims, options).unwrap()
}

fn random_rows(n: u64, dims: usize, seed: u64) -> Vec<(u64, Vec<f32>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|i| (i, (0..dims).map(|_| rng.random_range(-1.0..1.0)).collect())).collect()
}

#[test]
fn test_index_lifecycle_basic() {
    let temp_file = NamedTempFile::new().unwrap();

    // Create index
    let mut index = VectorIndex::open(temp_file.path(), 128, IndexOptions::default()).unwrap();

    // Verify initial state
    assert_eq!(index.len(), 0);
    assert!(index.is_empty());
    assert_eq!(index.dimensions(), 128);
    assert_eq!(index.config().max_neighbors, 33);

    // Insert vectors under host row ids
    index.insert(100, &vec![0.1; 128]).unwrap();
    index.insert(200, &[vec![0.2; 64], vec![-0.2; 64]].concat()).unwrap();
    index.insert(300, &[vec![-0.3; 64], vec![0.3; 64]].concat()).unwrap();
    assert_eq!(index.len(), 3);

    // Search
    let top = index.search(&vec![0.15; 128], 2).unwrap();
    assert_eq!(top.row_ids.len(), 2);
    assert_eq!(top.row_ids[0], 100);
    assert_eq!(top.skipped_records, 0);

    // Flush
    index.flush().unwrap();
}

#[test]
fn test_index_persistence() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_owned();
    let rows = random_rows(40, 16, 1);

    let before = {
        let mut index = VectorIndex::open(&path, 16, "metric=l2,max_neighbors=8".parse().unwrap()).unwrap();
        for (row_id, vector) in &rows {
            index.insert(*row_id, vector).unwrap();
        }
        index.delete(5).unwrap();
        index.flush().unwrap();
        index.search(&rows[9].1, 5).unwrap()
    };

    let index = VectorIndex::open(&path, 16, IndexOptions::default()).unwrap();
    assert_eq!(index.len(), 39);
    assert!(!index.contains(5));
    assert_eq!(index.config().max_neighbors, 8);
    assert_eq!(index.search(&rows[9].1, 5).unwrap(), before);
}

#[test]
fn test_reopen_reuses_freed_pages() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_owned();
    let rows = random_rows(10, 4, 2);

    {
        let mut index = VectorIndex::open(&path, 4, IndexOptions::default()).unwrap();
        for (row_id, vector) in &rows {
            index.insert(*row_id, vector).unwrap();
        }
        index.delete(3).unwrap();
        index.delete(7).unwrap();
        index.flush().unwrap();
    }

    let mut index = VectorIndex::open(&path, 4, IndexOptions::default()).unwrap();
    let pages_before = index.stats().unwrap().storage_bytes;
    index.insert(50, &[0.5, 0.5, 0.5, 0.5]).unwrap();
    index.insert(51, &[-0.5, 0.5, -0.5, 0.5]).unwrap();
    assert_eq!(index.stats().unwrap().storage_bytes, pages_before);
    assert_eq!(index.len(), 10);
}

#[test]
fn test_insert_then_delete_leaves_empty_index() {
    let mut index = memory_index(3, "");
    index.insert(1, &[1.0, 2.0, 3.0]).unwrap();
    index.delete(1).unwrap();

    assert!(index.is_empty());
    assert_eq!(index.entry_point(), None);
    assert!(matches!(index.search(&[1.0, 2.0, 3.0], 1), Err(IndexError::EmptyIndex)));

    // The index is still usable afterwards
    index.insert(2, &[3.0, 2.0, 1.0]).unwrap();
    assert_eq!(index.entry_point(), Some(2));
}

#[test]
fn test_preconditions_fail_without_mutation() {
    let mut index = memory_index(4, "max_neighbors=4");
    index.insert(1, &[1.0, 0.0, 0.0, 0.0]).unwrap();

    assert!(matches!(
        index.insert(2, &[1.0, 0.0]),
        Err(IndexError::DimensionMismatch { expected: 4, actual: 2 })
    ));
    assert!(matches!(index.insert(1, &[0.0, 1.0, 0.0, 0.0]), Err(IndexError::DuplicateRowId(1))));
    assert!(matches!(index.delete(9), Err(IndexError::NotFound(9))));
    assert!(matches!(index.search(&[0.0; 4], 0), Err(IndexError::InvalidK(0))));
    assert!(matches!(index.search(&[0.0; 3], 1), Err(IndexError::DimensionMismatch { .. })));
    assert_eq!(index.len(), 1);
}

#[test]
fn test_non_finite_vectors_are_rejected() {
    let mut index = memory_index(3, "metric=l2,max_neighbors=4");
    index.insert(1, &[1.0, 0.0, 0.0]).unwrap();

    assert!(matches!(index.insert(2, &[0.0, f32::NAN, 0.0]), Err(IndexError::NonFiniteVector { index: 1 })));
    assert!(matches!(index.insert(3, &[f32::INFINITY, 0.0, 0.0]), Err(IndexError::NonFiniteVector { index: 0 })));
    assert!(matches!(
        index.insert(4, &[0.0, 0.0, f32::NEG_INFINITY]),
        Err(IndexError::NonFiniteVector { index: 2 })
    ));
    assert!(matches!(index.search(&[0.0, 0.0, f32::NAN], 1), Err(IndexError::NonFiniteVector { index: 2 })));
    assert_eq!(index.len(), 1);

    // the rejected ids stay free
    index.insert(2, &[0.0, 1.0, 0.0]).unwrap();
    let top = index.search(&[0.0, 1.0, 0.0], 1).unwrap();
    assert_eq!(top.row_ids, vec![2]);
}

#[test]
fn test_search_with_huge_k_returns_every_row() {
    let mut index = memory_index(2, "metric=l2,max_neighbors=4");
    for i in 0..10u64 {
        index.insert(i, &[i as f32, 0.0]).unwrap();
    }

    let top = index.search(&[1.0, 0.0], usize::MAX).unwrap();
    assert_eq!(top.row_ids[0], 1);
    assert!(top.row_ids.len() <= 10);
    assert!(top.is_short());
    assert_eq!(top.skipped_records, 0);

    let top = index.search_with_beam(&[9.0, 0.0], 1 << 58, usize::MAX).unwrap();
    assert_eq!(top.row_ids[0], 9);
}

#[test]
fn test_invalid_options_are_rejected() {
    let temp_file = NamedTempFile::new().unwrap();
    for bad in ["compress_neighbors=float4", "max_neighbors=0", "metric=hamming", "alpha=0.5", "colour=blue"] {
        let err = IndexOptions::parse(bad).unwrap_err();
        assert!(matches!(err, IndexError::InvalidOptions(_)), "{bad}");
    }

    let options = IndexOptions { search_beam: 0, ..Default::default() };
    assert!(matches!(VectorIndex::open(temp_file.path(), 8, options), Err(IndexError::InvalidOptions(_))));
}

#[test]
fn test_storage_size_is_precomputable() {
    let compact = IndexOptions::parse("compress_neighbors=float8,max_neighbors=20").unwrap().resolve(512).unwrap();
    let full = IndexOptions::parse("compress_neighbors=float32,max_neighbors=70").unwrap().resolve(512).unwrap();

    // Full vector + slots of (id, encoded neighbor vector)
    assert_eq!(compact.record_size(), 16 + 512 * 4 + 20 * (8 + 512 + 8));
    assert_eq!(full.record_size(), 16 + 512 * 4 + 70 * (8 + 512 * 4));
    let ratio = full.storage_bytes(1000) as f64 / compact.storage_bytes(1000) as f64;
    assert!(ratio > 8.0, "ratio was {ratio}");

    // A real build allocates exactly one record per row
    let rows = random_rows(60, 512, 3);
    let mut small = VectorIndex::create(
        MemoryPageStore::new(compact.record_size()),
        512,
        "compress_neighbors=float8,max_neighbors=20".parse().unwrap(),
    )
    .unwrap();
    let mut large = VectorIndex::create(
        MemoryPageStore::new(full.record_size()),
        512,
        "compress_neighbors=float32,max_neighbors=70".parse().unwrap(),
    )
    .unwrap();
    small.bulk_build_with(rows.clone(), &BuildOptions::seeded(1, 0)).unwrap();
    large.bulk_build_with(rows, &BuildOptions::seeded(1, 0)).unwrap();

    assert_eq!(small.stats().unwrap().storage_bytes, compact.storage_bytes(60) as u64);
    assert_eq!(large.stats().unwrap().storage_bytes, full.storage_bytes(60) as u64);
}

#[test]
fn test_bulk_build_cancellation_leaves_usable_index() {
    let mut index = memory_index(8, "max_neighbors=6");
    let cancel = Arc::new(AtomicBool::new(true));
    let options = BuildOptions { cancel: Some(Arc::clone(&cancel)), ..BuildOptions::seeded(4, 1) };

    let err = index.bulk_build_with(random_rows(30, 8, 4), &options).unwrap_err();
    assert!(matches!(err, IndexError::Cancelled { inserted: 0 }));

    cancel.store(false, std::sync::atomic::Ordering::Relaxed);
    assert_eq!(index.bulk_build_with(random_rows(30, 8, 4), &options).unwrap(), 30);
    assert_eq!(index.len(), 30);
}

#[test]
fn test_corrupt_record_is_skipped_and_reported() {
    let mut index = memory_index(4, "metric=l2,max_neighbors=6");
    let rows = random_rows(30, 4, 5);
    for (row_id, vector) in &rows {
        index.insert(*row_id, vector).unwrap();
    }

    // Break the neighbor count of one of the entry point's neighbors
    let entry = index.entry_point().unwrap();
    let victim = index.neighbors(entry).unwrap()[0];
    let page = index.graph().directory().page_of(victim).unwrap();
    let mut bytes = index.graph().store().read(page).unwrap().to_vec();
    bytes[8..10].copy_from_slice(&u16::MAX.to_le_bytes());
    index.graph_mut().store_mut().write(page, &bytes).unwrap();

    let top = index.search(&rows[victim as usize].1, 30).unwrap();
    assert!(top.skipped_records >= 1);
    assert!(!top.row_ids.contains(&victim));
    assert!(top.is_degraded());
    assert!(matches!(index.neighbors(victim), Err(IndexError::CorruptRecord { .. })));
}

#[test]
fn test_every_compression_mode_round_trips_an_index() {
    let rows = random_rows(50, 12, 6);
    for mode in CompressionMode::ALL {
        let options = IndexOptions { compression: mode, max_neighbors: Some(8), ..Default::default() };
        let config = options.resolve(12).unwrap();
        let mut index = VectorIndex::create(MemoryPageStore::new(config.record_size()), 12, options).unwrap();
        for (row_id, vector) in &rows {
            index.insert(*row_id, vector).unwrap();
        }

        let store = index.graph().store().clone();
        let reloaded = VectorIndex::load(store).unwrap();
        assert_eq!(reloaded.len(), 50, "{mode}");
        assert_eq!(reloaded.config().compression, mode);
        assert_eq!(reloaded.search(&rows[0].1, 3).unwrap(), index.search(&rows[0].1, 3).unwrap());
    }
}
