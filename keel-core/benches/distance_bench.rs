//! Full-precision distance kernel benchmarks.
//!
//! Measures:
//! - SIMD vs scalar L2 across embedding sizes
//! - Each metric at a typical embedding size
//! - Unaligned inputs (vectors read straight out of node records)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use keel_core::DistanceMetric;
use keel_core::distance::{cosine_distance, dot_product, euclidean_distance, euclidean_distance_scalar};
use std::hint::black_box;

fn pair(dims: usize) -> (Vec<f32>, Vec<f32>) {
    let a = (0..dims).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
    let b = (0..dims).map(|i| (i as f32 * 0.1).cos() * 0.5).collect();
    (a, b)
}

/// Benchmark: L2 at various dimensions
fn bench_l2_by_dimension(c: &mut Criterion) {
    let mut group = c.benchmark_group("l2_by_dimension");
    group.sample_size(500);

    for dims in [8, 64, 128, 384, 512, 768, 1536] {
        group.throughput(Throughput::Elements(dims as u64));
        let (a, b) = pair(dims);

        group.bench_with_input(BenchmarkId::new("simd", dims), &dims, |bench, _| {
            bench.iter(|| black_box(euclidean_distance(black_box(&a), black_box(&b))));
        });

        group.bench_with_input(BenchmarkId::new("scalar", dims), &dims, |bench, _| {
            bench.iter(|| black_box(euclidean_distance_scalar(black_box(&a), black_box(&b))));
        });
    }

    group.finish();
}

/// Benchmark: every metric at 768 dimensions
fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_768d");
    group.sample_size(500);
    let (a, b) = pair(768);

    group.bench_function("cosine", |bench| bench.iter(|| black_box(cosine_distance(&a, &b))));
    group.bench_function("dot", |bench| bench.iter(|| black_box(dot_product(&a, &b))));
    for metric in [DistanceMetric::Cosine, DistanceMetric::L2, DistanceMetric::Dot] {
        group.bench_with_input(BenchmarkId::new("dispatch", metric), &metric, |bench, m| {
            bench.iter(|| black_box(m.distance(&a, &b)));
        });
    }

    group.finish();
}

/// Benchmark: unaligned loads
fn bench_unaligned_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("unaligned_access");
    group.sample_size(500);

    let dims = 1024;
    let mut buffer_a = vec![0.0f32; dims + 3];
    let mut buffer_b = vec![0.0f32; dims + 3];
    for i in 0..dims {
        buffer_a[i + 1] = (i as f32).sin();
        buffer_b[i + 2] = (i as f32).cos();
    }
    let a = &buffer_a[1..dims + 1];
    let b = &buffer_b[2..dims + 2];

    group.bench_function("simd_unaligned", |bench| {
        bench.iter(|| black_box(euclidean_distance(black_box(a), black_box(b))));
    });

    group.finish();
}

criterion_group!(benches, bench_l2_by_dimension, bench_metrics, bench_unaligned_access);
criterion_main!(benches);
