//! Work-stealing scheduler: a fixed pool of worker threads, each draining
//! its own queue of ready nodes, stealing from siblings when idle, and
//! synchronizing on a round barrier between passes so the fact store
//! reaches a consistent fixpoint before the next round begins.

pub mod barrier;
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::Config;
use crate::gc::GcCandidateSet;
use crate::node::NodeId;
use crate::registry::NodeRegistry;

use barrier::{RoundBarrier, TerminationBarrier};
use worker::{build_workers, Worker};

/// What a worker does with one dequeued node: drain its queued input,
/// mutate its store, and report any newly ready downstream nodes. The
/// scheduler is agnostic to rule semantics; this callback is where the
/// interpreter that owns bytecode execution plugs in.
pub trait NodeProcessor: Send + Sync {
    fn process(&self, node_id: NodeId, worker: &mut Worker);
}

/// Owns the worker pool and the barriers coordinating it. `run` blocks the
/// calling thread until every worker reaches a simultaneous fixpoint (no
/// worker has local work, the injector is empty, and no steal succeeds).
pub struct Scheduler {
    num_workers: usize,
    registry: Arc<NodeRegistry>,
    gc: Arc<GcCandidateSet>,
    term: Arc<TerminationBarrier>,
    round_barrier: Arc<RoundBarrier>,
    stop_flag: Arc<AtomicBool>,
    steal_retries_before_recheck: usize,
    pool_initial_chunk: usize,
    pool_max_chunk: usize,
}

impl Scheduler {
    pub fn new(config: &Config, registry: Arc<NodeRegistry>, gc: Arc<GcCandidateSet>) -> Self {
        let num_workers = config.resolved_num_workers().max(1);
        Scheduler {
            num_workers,
            registry,
            gc,
            term: Arc::new(TerminationBarrier::new(num_workers)),
            round_barrier: Arc::new(RoundBarrier::new(num_workers)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            steal_retries_before_recheck: config.scheduler.steal_retries_before_recheck,
            pool_initial_chunk: config.pool.initial_chunk_elems,
            pool_max_chunk: config.pool.max_chunk_elems,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Seeds the very first round's work: nodes with initial input queued
    /// before any worker starts.
    pub fn seed(&self, seeds: impl IntoIterator<Item = NodeId>) -> crossbeam_deque::Injector<NodeId> {
        let injector = crossbeam_deque::Injector::new();
        for node_id in seeds {
            injector.push(node_id);
        }
        injector
    }

    /// Runs the worker pool to a fixpoint using `num_rules` rule slots per
    /// worker's execution state and `processor` to drive each dequeued
    /// node. Returns once every worker has observed simultaneous idleness.
    pub fn run<P: NodeProcessor + 'static>(&self, processor: Arc<P>, initial_work: Vec<NodeId>, num_rules: usize) {
        let mut workers = build_workers(
            self.num_workers,
            Arc::clone(&self.registry),
            Arc::clone(&self.term),
            self.steal_retries_before_recheck,
            num_rules,
            self.pool_initial_chunk,
            self.pool_max_chunk,
        );

        for (i, node_id) in initial_work.into_iter().enumerate() {
            let target = i % workers.len();
            workers[target].new_work(node_id);
        }

        let handles: Vec<_> = workers
            .drain(..)
            .map(|worker| {
                let processor = Arc::clone(&processor);
                let round_barrier = Arc::clone(&self.round_barrier);
                let stop_flag = Arc::clone(&self.stop_flag);
                let gc = Arc::clone(&self.gc);
                thread::spawn(move || worker_loop(worker, processor, round_barrier, stop_flag, gc))
            })
            .collect();

        for h in handles {
            h.join().expect("scheduler worker thread panicked");
        }
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }
}

fn worker_loop<P: NodeProcessor>(
    mut worker: Worker,
    processor: Arc<P>,
    round_barrier: Arc<RoundBarrier>,
    stop_flag: Arc<AtomicBool>,
    gc: Arc<GcCandidateSet>,
) {
    loop {
        if stop_flag.load(Ordering::Acquire) {
            return;
        }
        match worker.get_work() {
            Some(node_id) => {
                processor.process(node_id, &mut worker);
                if let Some(node) = worker.registry.find_node(node_id) {
                    worker.finish_work(&node);
                }
            }
            None => {
                if worker.end() && worker.terminate_iteration() {
                    let is_leader = round_barrier.wait();
                    if is_leader {
                        let drained = gc.drain();
                        tracing::debug!(worker = worker.index(), gc_candidates = drained.len(), "round_boundary_reached");
                    }
                    if worker.terminate_iteration() {
                        tracing::debug!(worker = worker.index(), "worker_observed_fixpoint");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::PredicateCatalog;

    struct NoopProcessor;
    impl NodeProcessor for NoopProcessor {
        fn process(&self, _node_id: NodeId, _worker: &mut Worker) {}
    }

    #[test]
    fn scheduler_reaches_fixpoint_with_no_work() {
        let reg = NodeRegistry::new(Arc::new(PredicateCatalog::new()));
        reg.load_initial(&[(1, 1)]);
        let config = Config::default();
        let scheduler = Scheduler::new(&config, Arc::new(reg), Arc::new(GcCandidateSet::new()));
        scheduler.run(Arc::new(NoopProcessor), vec![], 1);
    }

    #[test]
    fn scheduler_drains_seeded_work() {
        let reg = NodeRegistry::new(Arc::new(PredicateCatalog::new()));
        reg.load_initial(&[(1, 1), (2, 2), (3, 3)]);
        let mut config = Config::default();
        config.scheduler.num_workers = 2;
        let scheduler = Scheduler::new(&config, Arc::new(reg), Arc::new(GcCandidateSet::new()));
        scheduler.run(Arc::new(NoopProcessor), vec![1, 2, 3], 1);
    }
}
