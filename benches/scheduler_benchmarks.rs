//! Scheduler throughput benchmarks: draining a fixed number of independent
//! nodes to a fixpoint, varying node count and worker count.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use factgraph::gc::GcCandidateSet;
use factgraph::node::{NodeId, QueuedDerivation};
use factgraph::predicate::{Predicate, PredicateCatalog};
use factgraph::registry::NodeRegistry;
use factgraph::scheduler::worker::Worker;
use factgraph::scheduler::{NodeProcessor, Scheduler};
use factgraph::value::{FieldType, Tuple, Value};
use factgraph::Config;
use std::sync::Arc;
use std::time::Duration;

struct StoreProcessor;

impl NodeProcessor for StoreProcessor {
    fn process(&self, node_id: NodeId, worker: &mut Worker) {
        let node = worker.registry.find_node(node_id).unwrap();
        let derivations: Vec<QueuedDerivation> = {
            let mut inner = node.lock();
            inner.queue.drain(..).collect()
        };
        let mut inner = node.lock();
        for d in derivations {
            inner.store.add_tuple(d.predicate_id, d.tuple, d.depth);
        }
        inner.store.end_iteration();
    }
}

fn seeded_registry(num_nodes: u32) -> (Arc<NodeRegistry>, Vec<NodeId>) {
    let mut cat = PredicateCatalog::new();
    cat.register(Predicate {
        id: 0,
        name: "p".into(),
        field_types: vec![FieldType::Int],
        compact: false,
        persistent_id: 0,
        aggregate: None,
    });
    let registry = Arc::new(NodeRegistry::new(Arc::new(cat)));
    let translated: Vec<(NodeId, NodeId)> = (1..=num_nodes).map(|i| (i, i)).collect();
    registry.load_initial(&translated);

    let mut ids = Vec::with_capacity(num_nodes as usize);
    for fake_id in 1..=num_nodes {
        let node = registry.find_node(fake_id).unwrap();
        node.enqueue(QueuedDerivation {
            predicate_id: 0,
            tuple: Tuple::new(vec![Value::Int(fake_id as i64)]),
            count: 1,
            depth: 0,
            is_agg: false,
        });
        ids.push(fake_id);
    }
    (registry, ids)
}

fn bench_node_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_node_count");
    for num_nodes in [100u32, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(num_nodes), &num_nodes, |b, &num_nodes| {
            b.iter_batched(
                || {
                    let mut config = Config::default();
                    config.scheduler.num_workers = 4;
                    let (registry, ids) = seeded_registry(num_nodes);
                    let scheduler = Scheduler::new(&config, Arc::clone(&registry), Arc::new(GcCandidateSet::new()));
                    (scheduler, ids)
                },
                |(scheduler, ids)| {
                    scheduler.run(Arc::new(StoreProcessor), ids, 1);
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_worker_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_worker_count");
    for num_workers in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(num_workers), &num_workers, |b, &num_workers| {
            b.iter_batched(
                || {
                    let mut config = Config::default();
                    config.scheduler.num_workers = num_workers;
                    let (registry, ids) = seeded_registry(2_000);
                    let scheduler = Scheduler::new(&config, Arc::clone(&registry), Arc::new(GcCandidateSet::new()));
                    (scheduler, ids)
                },
                |(scheduler, ids)| {
                    scheduler.run(Arc::new(StoreProcessor), ids, 1);
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
    targets = bench_node_count, bench_worker_count
}
criterion_main!(benches);
