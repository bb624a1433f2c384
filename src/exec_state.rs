//! Per-worker execution state: the scratch space a worker reuses across
//! every node it visits, so that visiting a node never allocates a fresh
//! interpreter frame from the global allocator.
//!
//! A worker's execution state is private to that worker — nothing here is
//! shared or synchronized. It is reset by [`ExecutionState::setup`] when a
//! worker starts processing a node and flushed by
//! [`ExecutionState::cleanup`] when it finishes, which is also the point
//! deferred tuple deletions are physically applied.

use std::collections::HashSet;

use crate::pool::Pool;
use crate::predicate::PredicateId;
use crate::store::PersistentStore;
use crate::trie::LeafHandle;
use crate::utils::Bitmap;
use crate::value::{ListCell, StructObj, Tuple, Value};

/// One entry on the interpreter call stack: the rule being evaluated and its
/// local base register, mirroring a frame in a simple register-machine
/// interpreter.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub rule_id: u32,
    pub register_base: usize,
}

/// Where a deferred negative tuple was found, so `cleanup` knows how to
/// finish retracting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeTupleLocation {
    /// Already staged for deletion earlier this round; the second find is a
    /// no-op (the tuple will be retracted once, at cleanup).
    PendingDeletion,
    /// Present only in this round's scratch output, not yet persisted; drop
    /// it from the temporary store instead of touching the persistent one.
    Temporary,
    /// Live in the persistent store; stage it via `handle` for the deferred
    /// retraction cleanup performs.
    Store(LeafHandle),
}

struct StagedDeletion {
    predicate_id: PredicateId,
    tuple: Tuple,
    handle: LeafHandle,
}

/// What [`ExecutionState::cleanup`] produced: node ids newly eligible for
/// candidate-GC scanning, and any tuple an aggregate table derived this
/// round (`a(group, sum)`-style full tuples, not the raw contributions).
#[derive(Debug, Default)]
pub struct CleanupResult {
    pub gc_candidates: Vec<crate::node::NodeId>,
    pub emitted_aggregates: Vec<Tuple>,
}

/// Per-worker scratch state reused across every node the worker visits.
pub struct ExecutionState {
    registers: Vec<Value>,
    call_stack: Vec<CallFrame>,
    rule_ready: Bitmap,
    /// Tuples derived this round but not yet folded into the persistent
    /// store (candidates for further rule matching within the same pass).
    temporaries: Vec<(PredicateId, Tuple)>,
    /// Tuples already retracted this round, so a second negative derivation
    /// of the same tuple within one pass is recognized rather than
    /// mis-treated as retracting a second, distinct unit.
    removed: HashSet<(PredicateId, Tuple)>,
    leaves_for_deletion: Vec<StagedDeletion>,
    cons_pool: Pool<ListCell>,
    struct_pool: Pool<StructObj>,
}

impl ExecutionState {
    pub fn new(num_rules: usize, pool_initial_chunk: usize, pool_max_chunk: usize) -> Self {
        ExecutionState {
            registers: Vec::new(),
            call_stack: Vec::new(),
            rule_ready: Bitmap::new(num_rules.max(1)),
            temporaries: Vec::new(),
            removed: HashSet::new(),
            leaves_for_deletion: Vec::new(),
            cons_pool: Pool::new(pool_initial_chunk, pool_max_chunk),
            struct_pool: Pool::new(pool_initial_chunk, pool_max_chunk),
        }
    }

    /// Resets all scratch state before a worker begins processing a node.
    /// Leaves the rule-ready bitmap's capacity and the allocator pools
    /// intact — only their contents are cleared.
    pub fn setup(&mut self) {
        self.registers.clear();
        self.call_stack.clear();
        self.rule_ready.clear_all();
        self.temporaries.clear();
        self.removed.clear();
        self.leaves_for_deletion.clear();
    }

    /// Applies every deferred deletion staged this round, flushes the
    /// store's aggregates and reclaimed trie slots, and reports both the
    /// node-reference garbage-collection candidates released and any newly
    /// derived aggregate tuples the caller must feed back through rule
    /// matching (e.g. by enqueueing them as new local input). Must run after
    /// the last `MatchCursor` for this node's store has been dropped.
    pub fn cleanup(&mut self, store: &mut PersistentStore) -> CleanupResult {
        let mut gc = Vec::new();
        for staged in self.leaves_for_deletion.drain(..) {
            if let Some(info) = store.delete_by_leaf(staged.predicate_id, staged.handle) {
                gc.extend(info.gc_candidates.clone());
            }
        }
        let emitted_aggregates = store.end_iteration();
        self.temporaries.clear();
        self.removed.clear();
        CleanupResult { gc_candidates: gc, emitted_aggregates }
    }

    pub fn push_frame(&mut self, rule_id: u32) {
        let register_base = self.registers.len();
        self.call_stack.push(CallFrame { rule_id, register_base });
    }

    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        let frame = self.call_stack.pop()?;
        self.registers.truncate(frame.register_base);
        Some(frame)
    }

    pub fn set_register(&mut self, index: usize, value: Value) {
        if index >= self.registers.len() {
            self.registers.resize(index + 1, Value::Int(0));
        }
        self.registers[index] = value;
    }

    pub fn register(&self, index: usize) -> &Value {
        &self.registers[index]
    }

    /// Unions `newly_true` into the rule-ready bitmap, returning whether any
    /// rule transitioned to ready (i.e. there is more work to schedule this
    /// round).
    pub fn mark_active_rules(&mut self, newly_true: &Bitmap) -> bool {
        self.rule_ready.union_with(newly_true)
    }

    pub fn rule_is_ready(&self, rule_id: usize) -> bool {
        self.rule_ready.is_set(rule_id)
    }

    /// Stages a tuple for persistence and bookkeeps it as a temporary so
    /// later matches within the same round can see it before it is folded
    /// into the store.
    pub fn process_persistent_tuple(&mut self, store: &mut PersistentStore, pred: PredicateId, tuple: Tuple, depth: crate::value::Depth) -> bool {
        self.temporaries.push((pred, tuple.clone()));
        store.add_tuple(pred, tuple, depth)
    }

    pub fn add_to_aggregate(&mut self, store: &mut PersistentStore, pred: PredicateId, tuple: &Tuple, depth: crate::value::Depth) {
        store.add_agg_tuple(pred, tuple, depth);
    }

    /// Locates a negative (retracted) tuple by checking, in order: tuples
    /// already staged for deletion this round, this round's temporary
    /// output, then the persistent store itself.
    pub fn search_for_negative_tuple(&self, store: &PersistentStore, pred: PredicateId, tuple: &Tuple) -> Option<NegativeTupleLocation> {
        if self.search_for_negative_tuple_in_leaves(pred, tuple) {
            return Some(NegativeTupleLocation::PendingDeletion);
        }
        if self.search_for_negative_tuple_in_temporary(pred, tuple) {
            return Some(NegativeTupleLocation::Temporary);
        }
        store.find_handle(pred, tuple).map(NegativeTupleLocation::Store)
    }

    fn search_for_negative_tuple_in_leaves(&self, pred: PredicateId, tuple: &Tuple) -> bool {
        self.leaves_for_deletion.iter().any(|s| s.predicate_id == pred && &s.tuple == tuple)
    }

    fn search_for_negative_tuple_in_temporary(&self, pred: PredicateId, tuple: &Tuple) -> bool {
        self.temporaries.iter().any(|(p, t)| *p == pred && t == tuple)
    }

    /// Records that `tuple` should be deleted via `handle` at `cleanup`.
    /// Marks it in the removed set so a second negative derivation of the
    /// same tuple this round is recognized by `search_for_negative_tuple`.
    pub fn stage_deletion(&mut self, pred: PredicateId, tuple: Tuple, handle: LeafHandle) {
        self.removed.insert((pred, tuple.clone()));
        self.leaves_for_deletion.push(StagedDeletion { predicate_id: pred, tuple, handle });
    }

    pub fn was_removed(&self, pred: PredicateId, tuple: &Tuple) -> bool {
        self.removed.contains(&(pred, tuple.clone()))
    }

    pub fn alloc_cons(&mut self, cell: ListCell) -> Result<crate::pool::Slot<ListCell>, crate::error::PoolError> {
        self.cons_pool.allocate(|| cell)
    }

    pub fn alloc_struct(&mut self, obj: StructObj) -> Result<crate::pool::Slot<StructObj>, crate::error::PoolError> {
        self.struct_pool.allocate(|| obj)
    }
}
