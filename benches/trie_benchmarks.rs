//! Trie performance benchmarks: insert, match-and-scan, and delete at
//! varying table sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use factgraph::trie::{Match, Trie};
use factgraph::value::{Tuple, Value};
use std::time::Duration;

fn tuple(i: i64) -> Tuple {
    Tuple::new(vec![Value::Int(i), Value::Int(i * 2)])
}

fn filled_trie(size: i64) -> Trie {
    let mut trie = Trie::new(2);
    for i in 0..size {
        trie.insert_tuple(tuple(i), 0);
    }
    trie
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_insert");
    for size in [100i64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled_trie(size),
                |mut trie| {
                    trie.insert_tuple(tuple(size), 0);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_match_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_match_scan");
    for size in [100i64, 1_000, 10_000] {
        let trie = filled_trie(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let mut cursor = trie.match_predicate(Match::all_wildcards(2));
                let mut count = 0;
                while cursor.next(&trie).is_some() {
                    count += 1;
                }
                count
            });
        });
    }
    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_delete");
    for size in [100i64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled_trie(size),
                |mut trie| {
                    trie.delete_tuple(&tuple(size / 2));
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3));
    targets = bench_insert, bench_match_scan, bench_delete
}
criterion_main!(benches);
