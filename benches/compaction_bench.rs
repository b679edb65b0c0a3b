//! Benchmarks for the rowpress merge paths
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rowpress::{merge, Cell};

/// One seconds datapoint per cell, ascending offsets, 1-byte integer values.
fn seconds_cells(count: usize) -> Vec<Cell> {
    (0..count)
        .map(|i| {
            let word = (i as u16) << 4;
            Cell::new(word.to_be_bytes().to_vec(), vec![i as u8])
        })
        .collect()
}

/// A previously merged cell covering `count` datapoints plus one stray.
fn partially_merged_cells(count: usize) -> Vec<Cell> {
    let mut qualifier = Vec::with_capacity(count * 2);
    let mut value = Vec::with_capacity(count + 1);
    for i in 0..count {
        qualifier.extend_from_slice(&(((i as u16) << 4).to_be_bytes()));
        value.push(i as u8);
    }
    value.push(0x00);

    let stray_word = (count as u16) << 4;
    vec![
        Cell::new(qualifier, value),
        Cell::new(stray_word.to_be_bytes().to_vec(), vec![0xFF]),
    ]
}

fn bench_trivial_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("trivial_merge");

    for size in [10, 100, 1000] {
        let cells = seconds_cells(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("merge_{}", size), |b| {
            b.iter(|| merge(black_box(cells.clone())).unwrap())
        });
    }

    group.finish();
}

fn bench_complex_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("complex_merge");

    for size in [10, 100, 1000] {
        let cells = partially_merged_cells(size);
        group.throughput(Throughput::Elements(size as u64 + 1));
        group.bench_function(format!("remerge_{}", size), |b| {
            b.iter(|| merge(black_box(cells.clone())).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_trivial_merge, bench_complex_merge);
criterion_main!(benches);
