//! Transpose Benchmarks
//!
//! Compares the naive transpose against the tiled local memory transpose
//! over several matrix sizes, and the flat against the grouped vector add.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tilekernel::prelude::*;

fn bench_transpose(c: &mut Criterion) {
    let queue = CpuQueue::new().expect("Failed to create queue");
    let mut group = c.benchmark_group("transpose");
    group.sample_size(20);

    for &n in &[256usize, 512, 1024] {
        let range = Range::new([n, n]).unwrap();
        let input = Buffer::<f32, 2>::from_fn(range, |i| i as f32);
        let output = Buffer::<f32, 2>::new(range);

        group.throughput(Throughput::Elements((n * n) as u64));

        for strategy in [TransposeStrategy::Naive, TransposeStrategy::Tiled] {
            group.bench_with_input(BenchmarkId::new(strategy.to_string(), n), &n, |b, _| {
                b.iter(|| {
                    let event = submit_transpose(&queue, strategy, &input, &output, 32).unwrap();
                    queue.wait_and_throw().unwrap();
                    black_box(event);
                });
            });
        }
    }

    group.finish();
}

fn bench_tile_size(c: &mut Criterion) {
    let queue = CpuQueue::new().expect("Failed to create queue");
    let mut group = c.benchmark_group("transpose/tile");
    group.sample_size(20);

    let n = 1024;
    let range = Range::new([n, n]).unwrap();
    let input = Buffer::<f32, 2>::from_fn(range, |i| i as f32);
    let output = Buffer::<f32, 2>::new(range);

    for &tile in &[8usize, 16, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(tile), &tile, |b, &tile| {
            b.iter(|| {
                transpose_tiled(&queue, &input, &output, tile).unwrap();
                queue.wait_and_throw().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_vector_add(c: &mut Criterion) {
    let queue = CpuQueue::new().expect("Failed to create queue");
    let mut group = c.benchmark_group("vector_add");

    let n = 1 << 20;
    let a: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let mut r = vec![0.0f32; n];
    group.throughput(Throughput::Elements(n as u64));

    group.bench_function("range", |b| {
        b.iter(|| black_box(vector_add_range(&queue, &a, &a, &mut r).unwrap()));
    });

    group.bench_function("nd_range_128", |b| {
        b.iter(|| black_box(vector_add_nd_range(&queue, &a, &a, &mut r, 128).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_transpose, bench_tile_size, bench_vector_add);
criterion_main!(benches);
