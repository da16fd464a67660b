//! Build and query benchmarks over a synthetic relation.
//!
//! Run with: `cargo bench`
//! Save baseline: `cargo bench -- --save-baseline main`
//! Compare: `cargo bench -- --baseline main`

use biscuit::{Biscuit, MemoryHeap, Predicate, WindowConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WORDS: &[&str] = &[
    "banana", "bandana", "cherry", "plantain", "nectarine", "grape", "melon", "lemon", "lime",
    "apricot", "currant", "damson",
];

fn synthetic_heap(rows: usize) -> MemoryHeap {
    let mut rng = StdRng::seed_from_u64(42);
    let mut heap = MemoryHeap::new();
    for _ in 0..rows {
        let words = rng.gen_range(2..8);
        let value = (0..words)
            .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
            .collect::<Vec<_>>()
            .join(" ");
        heap.push_row(vec![Some(value)]);
    }
    heap
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for rows in [1_000, 10_000, 50_000] {
        let heap = synthetic_heap(rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &heap, |b, heap| {
            b.iter(|| Biscuit::build(WindowConfig::default(), black_box(heap), None).unwrap())
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let heap = synthetic_heap(50_000);
    let index = Biscuit::build(WindowConfig::default(), &heap, None).unwrap();

    let mut group = c.benchmark_group("search");
    for (name, pattern) in [
        ("short", "an"),
        ("window", "ban"),
        ("long_common", "banana"),
        ("long_rare", "nectarine"),
        ("absent", "zucchini"),
    ] {
        let predicate = Predicate::contains(0, pattern);
        group.bench_function(name, |b| {
            b.iter(|| index.search(black_box(&predicate), &heap, None).unwrap())
        });
    }
    group.bench_function("and_pair", |b| {
        let predicate = Predicate::and(vec![
            Predicate::contains(0, "banana"),
            Predicate::contains(0, "cherry"),
        ]);
        b.iter(|| index.search(black_box(&predicate), &heap, None).unwrap())
    });
    group.finish();
}

fn bench_maintenance(c: &mut Criterion) {
    let heap = synthetic_heap(10_000);
    let index = Biscuit::build(WindowConfig::default(), &heap, None).unwrap();

    c.bench_function("insert_row", |b| {
        let mut next = 1_000_000u32;
        b.iter(|| {
            index
                .insert_row(next, &[Some("banana bread baseline")])
                .unwrap();
            next += 1;
        })
    });
}

criterion_group!(benches, bench_build, bench_search, bench_maintenance);
criterion_main!(benches);
