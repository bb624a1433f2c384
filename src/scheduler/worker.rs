//! A single scheduler worker: one OS thread's queue, its view of every other
//! worker's stealer, and the scratch execution state it reuses across nodes.

use std::sync::Arc;

use crossbeam_deque::{Injector, Steal, Stealer, Worker as DequeWorker};

use crate::error::RemoteDeliveryError;
use crate::exec_state::ExecutionState;
use crate::node::{Node, NodeId, SchedulingState};
use crate::registry::NodeRegistry;
use crate::utils::random_index;

use super::barrier::TerminationBarrier;

/// Per-worker queue plus a view onto the rest of the pool needed for
/// work-stealing and cross-worker delivery.
pub struct Worker {
    index: usize,
    local: DequeWorker<NodeId>,
    stealers: Arc<Vec<Stealer<NodeId>>>,
    injector: Arc<Injector<NodeId>>,
    term: Arc<TerminationBarrier>,
    steal_retries_before_recheck: usize,
    pub registry: Arc<NodeRegistry>,
    pub exec_state: ExecutionState,
}

impl Worker {
    pub fn new(
        index: usize,
        local: DequeWorker<NodeId>,
        stealers: Arc<Vec<Stealer<NodeId>>>,
        injector: Arc<Injector<NodeId>>,
        term: Arc<TerminationBarrier>,
        steal_retries_before_recheck: usize,
        registry: Arc<NodeRegistry>,
        exec_state: ExecutionState,
    ) -> Self {
        Worker { index, local, stealers, injector, term, steal_retries_before_recheck, registry, exec_state }
    }

    /// Looks for a node to process: first this worker's own queue, then the
    /// global injector, then a bounded number of random steal attempts
    /// against sibling workers. Returns `None` once all of these come up
    /// empty, at which point the caller should consult the termination
    /// barrier rather than spin indefinitely.
    pub fn get_work(&self) -> Option<NodeId> {
        if let Some(node) = self.local.pop() {
            return Some(node);
        }
        loop {
            match self.injector.steal_batch_and_pop(&self.local) {
                Steal::Success(node) => return Some(node),
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
        if self.stealers.len() > 1 {
            for _ in 0..self.steal_retries_before_recheck {
                let target = random_index(self.stealers.len());
                if target == self.index {
                    continue;
                }
                if let Steal::Success(node) = self.stealers[target].steal() {
                    return Some(node);
                }
            }
        }
        None
    }

    /// Pushes work this worker itself produced (e.g. a child node created
    /// while processing another) onto its own local queue.
    pub fn new_work(&self, node_id: NodeId) {
        self.local.push(node_id);
        self.term.mark_active();
    }

    /// Delivers work destined for a node not owned by this worker's local
    /// queue. Since `crossbeam_deque::Worker` queues cannot be pushed to
    /// from another thread, cross-worker delivery goes through the shared
    /// injector; whichever worker next steals from it picks the node up.
    pub fn new_work_other(&self, node_id: NodeId) {
        self.injector.push(node_id);
        self.term.mark_active();
    }

    /// Delivers work on behalf of an external collaborator (e.g. a
    /// cross-process peer). Modeled as fallible since that transport is
    /// outside this process and can genuinely fail; the in-process delivery
    /// itself is identical to `new_work_other` once the tuple has arrived.
    pub fn new_work_remote(&self, node_id: NodeId) -> Result<(), RemoteDeliveryError> {
        self.injector.push(node_id);
        self.term.mark_active();
        Ok(())
    }

    /// Marks a node idle if nothing else queued input for it while it ran,
    /// otherwise requeues it so it gets picked up again. Call after a
    /// node's queued input has been drained and `ExecutionState::cleanup`
    /// has run.
    pub fn finish_work(&self, node: &Node) {
        let mut inner = node.lock();
        if inner.queue.is_empty() {
            inner.state = SchedulingState::Idle;
        } else {
            inner.state = SchedulingState::InQueue;
            drop(inner);
            self.new_work(node.fake_id());
        }
    }

    /// Reports that this worker found no work on its last attempt. Returns
    /// whether every worker in the pool is now simultaneously idle.
    pub fn end(&self) -> bool {
        self.term.mark_idle()
    }

    pub fn terminate_iteration(&self) -> bool {
        self.term.all_idle()
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Builds one `Worker` per stealer/queue pair sharing a common injector and
/// termination barrier, handing each its own freshly constructed execution
/// state.
pub fn build_workers(
    num_workers: usize,
    registry: Arc<NodeRegistry>,
    term: Arc<TerminationBarrier>,
    steal_retries_before_recheck: usize,
    num_rules: usize,
    pool_initial_chunk: usize,
    pool_max_chunk: usize,
) -> Vec<Worker> {
    let queues: Vec<DequeWorker<NodeId>> = (0..num_workers).map(|_| DequeWorker::new_fifo()).collect();
    let stealers: Arc<Vec<Stealer<NodeId>>> = Arc::new(queues.iter().map(DequeWorker::stealer).collect());
    let injector = Arc::new(Injector::new());

    queues
        .into_iter()
        .enumerate()
        .map(|(index, local)| {
            let exec_state = ExecutionState::new(num_rules, pool_initial_chunk, pool_max_chunk);
            Worker::new(
                index,
                local,
                Arc::clone(&stealers),
                Arc::clone(&injector),
                Arc::clone(&term),
                steal_retries_before_recheck,
                Arc::clone(&registry),
                exec_state,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::PredicateCatalog;

    fn registry() -> Arc<NodeRegistry> {
        let reg = NodeRegistry::new(Arc::new(PredicateCatalog::new()));
        reg.load_initial(&[(1, 1), (2, 2)]);
        Arc::new(reg)
    }

    #[test]
    fn get_work_prefers_local_queue_over_stealing() {
        let term = Arc::new(TerminationBarrier::new(2));
        let workers = build_workers(2, registry(), term, 4, 1, 8, 64);
        workers[0].new_work(1);
        assert_eq!(workers[0].get_work(), Some(1));
        assert_eq!(workers[0].get_work(), None);
    }

    #[test]
    fn new_work_other_is_visible_via_stealing() {
        let term = Arc::new(TerminationBarrier::new(2));
        let workers = build_workers(2, registry(), term, 4, 1, 8, 64);
        workers[0].new_work_other(2);
        assert_eq!(workers[1].get_work(), Some(2));
    }

    #[test]
    fn finish_work_requeues_when_input_arrived_mid_run() {
        let term = Arc::new(TerminationBarrier::new(1));
        let workers = build_workers(1, registry(), Arc::clone(&term), 4, 1, 8, 64);
        let node = workers[0].registry.find_node(1).unwrap();
        node.enqueue(crate::node::QueuedDerivation {
            predicate_id: 0,
            tuple: crate::value::Tuple::new(vec![]),
            count: 1,
            depth: 0,
            is_agg: false,
        });
        workers[0].finish_work(&node);
        assert_eq!(workers[0].get_work(), Some(1));
    }
}
