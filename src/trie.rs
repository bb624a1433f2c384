//! The tuple trie: a per-predicate persistent index routing on field values
//! position by position, with a global doubly-linked insertion-order list of
//! leaves threaded across the whole trie.
//!
//! Matching walks the leaf list, not the trie branches: "iteration order is
//! the order of insertion" is an externally visible property, and the
//! branches exist only to make insert/delete/dedup cheaper than a linear
//! scan. Deleting a leaf unlinks it from the leaf list in O(1) and removes it
//! from its branch path in O(arity); the arena slot itself is not reused
//! until [`Trie::reclaim`] runs, so a [`MatchCursor`] started before a delete
//! and still in flight keeps seeing a consistent `next` chain even for
//! leaves it has already stepped past.

use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender};

use crate::node::NodeId;
use crate::value::{node_refs, DerivationCount, Depth, Tuple, Value};

/// A stable reference to a trie leaf: the arena index plus the generation
/// stamped on it at creation. Comparing generations catches the case where
/// the index has been recycled for an unrelated leaf since the handle was
/// taken (e.g. a leaf index cached in an execution-state register across a
/// reclaim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeafHandle {
    index: usize,
    generation: u64,
}

struct LeafSlot {
    tuple: Tuple,
    count: DerivationCount,
    depth: Depth,
    generation: u64,
    tombstoned: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

enum TrieNode {
    Branch(HashMap<Value, TrieNode>),
    Leaf(usize),
}

/// A single field constraint in a match pattern.
#[derive(Debug, Clone)]
pub enum MatchField {
    Wildcard,
    Exact(Value),
    /// Binds this position to variable `k`; all positions sharing the same
    /// `k` within one pattern must hold equal values.
    Var(u32),
}

/// A match pattern over one predicate's tuples.
#[derive(Debug, Clone, Default)]
pub struct Match {
    pub fields: Vec<MatchField>,
}

impl Match {
    pub fn new(fields: Vec<MatchField>) -> Self {
        Match { fields }
    }

    pub fn all_wildcards(arity: usize) -> Self {
        Match { fields: vec![MatchField::Wildcard; arity] }
    }

    fn matches(&self, tuple: &Tuple) -> bool {
        if self.fields.len() != tuple.arity() {
            return false;
        }
        let mut bound: HashMap<u32, &Value> = HashMap::new();
        for (field, value) in self.fields.iter().zip(tuple.fields.iter()) {
            match field {
                MatchField::Wildcard => {}
                MatchField::Exact(expected) => {
                    if expected != value {
                        return false;
                    }
                }
                MatchField::Var(k) => match bound.entry(*k) {
                    std::collections::hash_map::Entry::Occupied(e) => {
                        if *e.get() != value {
                            return false;
                        }
                    }
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(value);
                    }
                },
            }
        }
        true
    }
}

/// What deleting a leaf released: its node-valued fields (candidates for the
/// program-wide GC set) and its final depth. The arena slot itself is only
/// queued for release on `Drop`, guaranteeing the physical return happens on
/// every exit path (early return, panic unwind, or falling off the end of a
/// scope) without the caller having to remember a separate finalize call.
/// [`Trie::reclaim`] is what actually moves a queued slot onto the free list;
/// it must not run while any `MatchCursor` over the same trie is in flight.
#[derive(Debug)]
pub struct DeleteInfo {
    index: usize,
    release_tx: Sender<usize>,
    pub depth: Depth,
    pub gc_candidates: Vec<NodeId>,
}

impl Drop for DeleteInfo {
    fn drop(&mut self) {
        let _ = self.release_tx.send(self.index);
    }
}

/// A trie over tuples of one predicate's arity.
pub struct Trie {
    arity: usize,
    root: HashMap<Value, TrieNode>,
    arena: Vec<Option<LeafSlot>>,
    free_arena_slots: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    next_generation: u64,
    release_tx: Sender<usize>,
    release_rx: Receiver<usize>,
    len: usize,
}

impl Trie {
    pub fn new(arity: usize) -> Self {
        assert!(arity >= 1, "trie requires arity >= 1");
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        Trie {
            arity,
            root: HashMap::new(),
            arena: Vec::new(),
            free_arena_slots: Vec::new(),
            head: None,
            tail: None,
            next_generation: 1,
            release_tx,
            release_rx,
            len: 0,
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn append_to_order_list(&mut self, idx: usize) {
        let old_tail = self.tail;
        if let Some(t) = old_tail {
            self.arena[t].as_mut().unwrap().next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        let slot = self.arena[idx].as_mut().unwrap();
        slot.prev = old_tail;
        slot.next = None;
        self.tail = Some(idx);
    }

    fn unlink_from_order_list(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.arena[idx].as_ref().unwrap();
            (slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.arena[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.arena[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn alloc_leaf(&mut self, tuple: Tuple, depth: Depth) -> usize {
        let generation = self.next_generation;
        self.next_generation += 1;
        let slot = LeafSlot { tuple, count: 1, depth, generation, tombstoned: false, prev: None, next: None };
        let idx = match self.free_arena_slots.pop() {
            Some(idx) => {
                self.arena[idx] = Some(slot);
                idx
            }
            None => {
                self.arena.push(Some(slot));
                self.arena.len() - 1
            }
        };
        self.append_to_order_list(idx);
        idx
    }

    /// Inserts a derivation of `tuple`. If an identical tuple already exists,
    /// its derivation count is incremented and `false` is returned (no new
    /// leaf created); otherwise a new leaf is created and `true` is returned.
    pub fn insert_tuple(&mut self, tuple: Tuple, depth: Depth) -> bool {
        assert_eq!(tuple.arity(), self.arity, "tuple arity does not match trie arity");

        let mut node = &mut self.root;
        for i in 0..self.arity - 1 {
            let key = tuple.field(i).clone();
            node = match node.entry(key).or_insert_with(|| TrieNode::Branch(HashMap::new())) {
                TrieNode::Branch(m) => m,
                TrieNode::Leaf(_) => panic!("tuple arity does not match trie depth"),
            };
        }
        let last = tuple.field(self.arity - 1).clone();
        if let Some(TrieNode::Leaf(idx)) = node.get(&last) {
            let idx = *idx;
            self.arena[idx].as_mut().unwrap().count += 1;
            return false;
        }
        let idx = self.alloc_leaf(tuple, depth);
        node.insert(last, TrieNode::Leaf(idx));
        self.len += 1;
        true
    }

    /// Looks up the arena index and current derivation count for an exact
    /// tuple, without mutating anything.
    fn find_leaf_index(&self, tuple: &Tuple) -> Option<usize> {
        let mut node = &self.root;
        for i in 0..self.arity - 1 {
            match node.get(tuple.field(i)) {
                Some(TrieNode::Branch(m)) => node = m,
                _ => return None,
            }
        }
        match node.get(tuple.field(self.arity - 1)) {
            Some(TrieNode::Leaf(idx)) => Some(*idx),
            _ => None,
        }
    }

    /// Decrements the derivation count of `tuple` by one. Returns `Some` with
    /// release bookkeeping once the count reaches zero (the tuple is fully
    /// retracted); returns `None` if the tuple survives with a positive
    /// count. Panics if `tuple` is not present — retracting an absent
    /// derivation is an invariant violation, not a recoverable error.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Option<DeleteInfo> {
        let idx = self
            .find_leaf_index(tuple)
            .unwrap_or_else(|| panic!("delete_tuple: tuple not present in trie"));
        self.decrement_or_remove(idx)
    }

    fn decrement_or_remove(&mut self, idx: usize) -> Option<DeleteInfo> {
        {
            let slot = self.arena[idx].as_mut().unwrap();
            assert!(slot.count > 0, "derivation count underflow");
            slot.count -= 1;
            if slot.count > 0 {
                return None;
            }
        }
        Some(self.remove_leaf(idx))
    }

    /// Removes a leaf physically from the branch path and order list, without
    /// checking the derivation count (used when a tuple must be forced out,
    /// e.g. `wipeout` or an aggregate retraction cancelling the sole
    /// remaining contribution).
    fn remove_leaf(&mut self, idx: usize) -> DeleteInfo {
        self.unlink_from_order_list(idx);
        let slot = self.arena[idx].as_mut().unwrap();
        slot.tombstoned = true;
        let tuple = slot.tuple.clone();
        let depth = slot.depth;

        self.remove_from_branches(&tuple);
        self.len -= 1;

        DeleteInfo { index: idx, release_tx: self.release_tx.clone(), depth, gc_candidates: node_refs_in_tuple(&tuple) }
    }

    fn remove_from_branches(&mut self, tuple: &Tuple) {
        remove_path(&mut self.root, tuple, 0, self.arity);
    }

    /// Deletes using a [`LeafHandle`] obtained from a [`MatchCursor`], for
    /// callers iterating and retracting in the same pass. Panics if the
    /// handle no longer refers to a live leaf (stale generation or already
    /// tombstoned) — retracting a tuple that was already retracted, or that
    /// never existed under this handle, is an invariant violation.
    pub fn delete_by_leaf(&mut self, handle: LeafHandle) -> Option<DeleteInfo> {
        let slot = self.arena[handle.index]
            .as_ref()
            .filter(|s| s.generation == handle.generation && !s.tombstoned)
            .unwrap_or_else(|| panic!("delete_by_leaf: handle does not refer to a live leaf"));
        let _ = slot;
        self.decrement_or_remove(handle.index)
    }

    /// Deletes every tuple whose fields satisfy `pattern`, used for bulk
    /// retraction of a matched prefix (e.g. clearing all facts derived from a
    /// retracted parent). Unlike `match_predicate`, order of visiting is not
    /// observable here since the whole matched set is removed, so this
    /// descends the branches directly rather than walking the leaf list.
    pub fn delete_by_index(&mut self, pattern: &Match) -> Vec<DeleteInfo> {
        let mut hits = Vec::new();
        collect_matching_leaves(&self.root, pattern, 0, &mut hits);
        hits.into_iter().map(|idx| self.remove_leaf(idx)).collect()
    }

    /// Frees every arena slot whose `DeleteInfo` has been dropped back onto
    /// the local free list, making it eligible for reuse.
    ///
    /// Must only be called when no `MatchCursor` over this trie is still in
    /// flight — reusing a slot while a cursor holds a stale reference to it
    /// would let the cursor silently skip or misroute past the reused leaf.
    pub fn reclaim(&mut self) {
        while let Ok(idx) = self.release_rx.try_recv() {
            self.arena[idx] = None;
            self.free_arena_slots.push(idx);
        }
    }

    /// Begins a lazy, single-pass scan over this trie's tuples in insertion
    /// order, filtered by `pattern`.
    pub fn match_predicate(&self, pattern: Match) -> MatchCursor {
        MatchCursor { current: self.head.map(|index| LeafHandle { index, generation: self.slot_generation(index) }), pattern }
    }

    fn slot_generation(&self, index: usize) -> u64 {
        self.arena[index].as_ref().map(|s| s.generation).unwrap_or(0)
    }

    /// Looks up a live handle for an exact tuple, without mutating anything.
    /// Used when a caller needs a [`LeafHandle`] for a tuple it already
    /// knows the value of (e.g. to stage it for deferred deletion) rather
    /// than one obtained by scanning with a [`MatchCursor`].
    pub fn find_handle(&self, tuple: &Tuple) -> Option<LeafHandle> {
        let idx = self.find_leaf_index(tuple)?;
        Some(LeafHandle { index: idx, generation: self.slot_generation(idx) })
    }

    pub fn count_tuple(&self, tuple: &Tuple) -> DerivationCount {
        self.find_leaf_index(tuple).map(|idx| self.arena[idx].as_ref().unwrap().count).unwrap_or(0)
    }

    /// Total number of live leaves (distinct tuples, irrespective of
    /// derivation count), used by `count_total`.
    pub fn count_total(&self) -> usize {
        self.len
    }

    /// Collects every live tuple in insertion order, for introspection
    /// (`dump`/`print`). Unlike `match_predicate` this is eager and does not
    /// tolerate concurrent mutation — callers must not interleave it with
    /// deletes the way a `MatchCursor` scan can.
    pub fn snapshot(&self) -> Vec<Tuple> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(idx) = cur {
            let slot = self.arena[idx].as_ref().unwrap();
            out.push(slot.tuple.clone());
            cur = slot.next;
        }
        out
    }

    pub fn wipeout(&mut self) -> Vec<NodeId> {
        let mut gc = Vec::new();
        let mut cur = self.head;
        while let Some(idx) = cur {
            let slot = self.arena[idx].as_ref().unwrap();
            cur = slot.next;
            gc.extend(node_refs_in_tuple(&slot.tuple));
        }
        self.root.clear();
        self.arena.clear();
        self.free_arena_slots.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
        gc
    }
}

fn remove_path(node: &mut HashMap<Value, TrieNode>, tuple: &Tuple, depth: usize, arity: usize) -> bool {
    let key = tuple.field(depth).clone();
    if depth == arity - 1 {
        node.remove(&key);
        return node.is_empty();
    }
    let empty_child = match node.get_mut(&key) {
        Some(TrieNode::Branch(child)) => remove_path(child, tuple, depth + 1, arity),
        _ => false,
    };
    if empty_child {
        node.remove(&key);
    }
    node.is_empty()
}

fn collect_matching_leaves(node: &HashMap<Value, TrieNode>, pattern: &Match, depth: usize, out: &mut Vec<usize>) {
    let constraint = pattern.fields.get(depth);
    match constraint {
        Some(MatchField::Exact(v)) => {
            if let Some(child) = node.get(v) {
                descend_matching(child, pattern, depth, out);
            }
        }
        _ => {
            for child in node.values() {
                descend_matching(child, pattern, depth, out);
            }
        }
    }
}

fn descend_matching(node: &TrieNode, pattern: &Match, depth: usize, out: &mut Vec<usize>) {
    match node {
        TrieNode::Branch(m) => collect_matching_leaves(m, pattern, depth + 1, out),
        TrieNode::Leaf(idx) => out.push(*idx),
    }
}

fn node_refs_in_tuple(tuple: &Tuple) -> Vec<NodeId> {
    node_refs(&tuple.fields)
}

/// An external iterator over a trie's tuples: each step takes the trie by
/// reference rather than holding a borrow across calls, so a caller can
/// interleave `delete_by_leaf`/`delete_tuple` calls between `next()` calls
/// without fighting the borrow checker. This is the shape required to
/// support "consume what you just matched" within a single rule firing.
pub struct MatchCursor {
    current: Option<LeafHandle>,
    pattern: Match,
}

impl MatchCursor {
    /// Returns the next matching tuple together with a handle usable for
    /// `delete_by_leaf`, or `None` once the scan is exhausted.
    pub fn next(&mut self, trie: &Trie) -> Option<(Tuple, LeafHandle)> {
        loop {
            let handle = self.current?;
            let slot = trie.arena.get(handle.index)?.as_ref();
            let Some(slot) = slot else {
                self.current = None;
                return None;
            };
            self.current = slot.next.map(|index| LeafHandle { index, generation: trie.slot_generation(index) });
            if slot.generation == handle.generation && !slot.tombstoned && self.pattern.matches(&slot.tuple) {
                return Some((slot.tuple.clone(), handle));
            }
        }
    }
}
