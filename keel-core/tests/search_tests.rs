//! Search quality tests against brute force.

use keel_core::{
    BuildOptions, CompressionMode, DistanceMetric, IndexOptions, MemoryPageStore, RowId, VectorIndex, distance,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

fn gaussian(rng: &mut StdRng, dims: usize) -> Vec<f32> {
    // Sum of uniforms: close enough to normal for these tests
    (0..dims).map(|_| (0..4).map(|_| rng.random_range(-1.0_f32..1.0)).sum()).collect()
}

fn unit(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter_mut().for_each(|x| *x /= norm);
    v
}

fn build(rows: &[Vec<f32>], options: IndexOptions) -> VectorIndex<MemoryPageStore> {
    let dims = rows[0].len();
    let config = options.resolve(dims).unwrap();
    let mut index = VectorIndex::create(MemoryPageStore::new(config.record_size()), dims, options).unwrap();
    for (i, v) in rows.iter().enumerate() {
        index.insert(i as RowId, v).unwrap();
    }
    index
}

fn brute_force(rows: &[Vec<f32>], query: &[f32], k: usize, metric: DistanceMetric) -> Vec<RowId> {
    let mut scored: Vec<(f32, RowId)> =
        rows.iter().enumerate().map(|(i, v)| (distance(query, v, metric).unwrap(), i as RowId)).collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}

fn recall(index: &VectorIndex<MemoryPageStore>, rows: &[Vec<f32>], queries: &[Vec<f32>], k: usize, beam: usize) -> f64 {
    let metric = index.config().metric;
    let mut hits = 0usize;
    for query in queries {
        let truth: HashSet<RowId> = brute_force(rows, query, k, metric).into_iter().collect();
        let found = index.search_with_beam(query, k, beam).unwrap();
        hits += found.row_ids.iter().filter(|id| truth.contains(id)).count();
    }
    hits as f64 / (queries.len() * k) as f64
}

#[test]
fn test_unit_vectors_find_themselves() {
    let mut rng = StdRng::seed_from_u64(100);
    let rows: Vec<Vec<f32>> = (0..100).map(|_| unit(gaussian(&mut rng, 8))).collect();
    let index = build(&rows, IndexOptions { max_neighbors: Some(10), ..Default::default() });

    let top = index.search(&rows[0], 5).unwrap();
    assert_eq!(top.row_ids.len(), 5);
    assert_eq!(top.row_ids[0], 0);

    let results = index.search_results(&rows[0], 5).unwrap();
    assert!(results[0].distance.abs() < 1e-5);
    assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn test_search_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(101);
    let rows: Vec<Vec<f32>> = (0..200).map(|_| gaussian(&mut rng, 12)).collect();
    let index = build(&rows, IndexOptions { compression: CompressionMode::Int8, ..Default::default() });

    for q in 0..10 {
        let query = gaussian(&mut rng, 12);
        let first = index.search(&query, 7).unwrap();
        for _ in 0..3 {
            assert_eq!(index.search(&query, 7).unwrap(), first, "query {q}");
        }
    }
}

#[test]
fn test_recall_per_compression_mode() {
    let mut rng = StdRng::seed_from_u64(102);
    let rows: Vec<Vec<f32>> = (0..300).map(|_| gaussian(&mut rng, 16)).collect();
    let queries: Vec<Vec<f32>> = (0..20).map(|_| gaussian(&mut rng, 16)).collect();

    for mode in CompressionMode::ALL {
        let index = build(&rows, IndexOptions { compression: mode, max_neighbors: Some(12), ..Default::default() });
        let r = recall(&index, &rows, &queries, 10, 64);
        let floor = if mode == CompressionMode::Float1Bit { 0.6 } else { 0.9 };
        assert!(r >= floor, "{mode}: recall@10 = {r}");
    }
}

#[test]
fn test_more_neighbors_do_not_hurt_recall() {
    let mut rng = StdRng::seed_from_u64(103);
    let rows: Vec<Vec<f32>> = (0..400).map(|_| gaussian(&mut rng, 16)).collect();
    let queries: Vec<Vec<f32>> = (0..30).map(|_| gaussian(&mut rng, 16)).collect();

    let options = |m| IndexOptions { max_neighbors: Some(m), metric: DistanceMetric::L2, ..Default::default() };
    let sparse = recall(&build(&rows, options(20)), &rows, &queries, 10, 10);
    let dense = recall(&build(&rows, options(70)), &rows, &queries, 10, 10);

    assert!(dense + 0.05 >= sparse, "M=70 recall {dense} vs M=20 recall {sparse}");
    assert!(sparse > 0.8);
}

#[test]
fn test_deleted_rows_never_returned() {
    let mut rng = StdRng::seed_from_u64(104);
    let rows: Vec<Vec<f32>> = (0..150).map(|_| gaussian(&mut rng, 8)).collect();
    let mut index = build(&rows, IndexOptions { compression: CompressionMode::Float16, ..Default::default() });

    let deleted: Vec<RowId> = (0..150).step_by(5).collect();
    for row in &deleted {
        index.delete(*row).unwrap();
    }

    for row in &deleted {
        let top = index.search(&rows[*row as usize], 10).unwrap();
        assert!(top.row_ids.iter().all(|id| !deleted.contains(id)));
        assert_eq!(top.row_ids.len(), 10);
    }
    for row in 0..150 {
        if let Ok(ids) = index.neighbors(row) {
            assert!(ids.iter().all(|id| !deleted.contains(id)), "row {row} lists a deleted row");
        }
    }
}

#[test]
fn test_bulk_build_with_refinement() {
    let mut rng = StdRng::seed_from_u64(105);
    let rows: Vec<Vec<f32>> = (0..300).map(|_| gaussian(&mut rng, 16)).collect();
    let queries: Vec<Vec<f32>> = (0..20).map(|_| gaussian(&mut rng, 16)).collect();

    let options = IndexOptions { max_neighbors: Some(12), compression: CompressionMode::Float8, ..Default::default() };
    let config = options.resolve(16).unwrap();
    let mut index = VectorIndex::create(MemoryPageStore::new(config.record_size()), 16, options).unwrap();
    let batch = rows.iter().enumerate().map(|(i, v)| (i as RowId, v.clone()));
    assert_eq!(index.bulk_build_with(batch, &BuildOptions::seeded(9, 2)).unwrap(), 300);

    let stats = index.stats().unwrap();
    assert_eq!(stats.nodes, 300);
    assert!(stats.max_degree <= 12);
    assert!(recall(&index, &rows, &queries, 10, 64) >= 0.9);
}

#[test]
fn test_beam_is_never_narrower_than_k() {
    let mut rng = StdRng::seed_from_u64(106);
    let rows: Vec<Vec<f32>> = (0..80).map(|_| gaussian(&mut rng, 6)).collect();
    let index = build(&rows, IndexOptions::default());

    let top = index.search_with_beam(&rows[3], 50, 1).unwrap();
    assert_eq!(top.row_ids.len(), 50);
    let unique: HashSet<RowId> = top.row_ids.iter().copied().collect();
    assert_eq!(unique.len(), 50);
}
