//! The persistent store: one [`PersistentStore`] lives inside each node and
//! holds every predicate's facts local to that node.
//!
//! Every predicate gets exactly one `Tuples` slot (a trie for ordinary
//! predicates, a dense array for `compact`-flagged ones) and, independently,
//! an optional `AggregateTable` if the catalog declared it with an
//! `AggregateOp`. These two arrays are parallel and separately indexed by
//! predicate id, mirroring `persistent_store.hpp`'s `tuples`/`aggs` fields —
//! an aggregate table augments a predicate's trie, it does not replace it.
//! That matters for the round trip an aggregate predicate needs to support:
//! `end_iteration` settles a group into a full tuple, and that tuple is fed
//! back in through the ordinary `add_tuple` path on the very same predicate
//! id so later rule matching sees it like any other fact.

use crate::aggregate::{AggregateTable, Direction};
use crate::compact_array::CompactArray;
use crate::node::NodeId;
use crate::predicate::{PredicateCatalog, PredicateId};
use crate::trie::{DeleteInfo, LeafHandle, Match, MatchCursor, Trie};
use crate::value::{DerivationCount, Depth, Tuple};

enum Tuples {
    Trie(Trie),
    Compact(CompactArray),
}

/// Per-node, per-predicate fact storage.
pub struct PersistentStore {
    tuples: Vec<Tuples>,
    aggs: Vec<Option<AggregateTable>>,
}

impl PersistentStore {
    pub fn new(catalog: &PredicateCatalog) -> Self {
        let mut tuples = Vec::with_capacity(catalog.num_persistent_predicates());
        let mut aggs = Vec::with_capacity(catalog.num_persistent_predicates());
        for pred in catalog.iter() {
            if pred.is_compact() {
                assert!(
                    pred.aggregate.is_none(),
                    "predicate {} is compact-stored and cannot also be an aggregate",
                    pred.id
                );
                tuples.push(Tuples::Compact(CompactArray::new(pred.arity())));
            } else {
                tuples.push(Tuples::Trie(Trie::new(pred.arity())));
            }
            aggs.push(pred.aggregate.map(|op| AggregateTable::new(op, pred.arity())));
        }
        PersistentStore { tuples, aggs }
    }

    fn trie(&mut self, pred: PredicateId) -> &mut Trie {
        match &mut self.tuples[pred as usize] {
            Tuples::Trie(t) => t,
            Tuples::Compact(_) => panic!("predicate {pred} is not trie-backed"),
        }
    }

    fn trie_ref(&self, pred: PredicateId) -> &Trie {
        match &self.tuples[pred as usize] {
            Tuples::Trie(t) => t,
            Tuples::Compact(_) => panic!("predicate {pred} is not trie-backed"),
        }
    }

    fn compact(&mut self, pred: PredicateId) -> &mut CompactArray {
        match &mut self.tuples[pred as usize] {
            Tuples::Compact(c) => c,
            Tuples::Trie(_) => panic!("predicate {pred} is not compact-backed"),
        }
    }

    fn aggregate(&mut self, pred: PredicateId) -> &mut AggregateTable {
        self.aggs[pred as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("predicate {pred} has no aggregate table"))
    }

    /// Adds a derivation of `tuple` to a non-aggregate predicate, or the
    /// materialized result of one later settled by `end_iteration` back into
    /// an aggregate-flagged predicate's own trie. Returns whether a
    /// genuinely new fact was created (as opposed to an existing one's count
    /// being bumped).
    pub fn add_tuple(&mut self, pred: PredicateId, tuple: Tuple, depth: Depth) -> bool {
        match &mut self.tuples[pred as usize] {
            Tuples::Trie(t) => t.insert_tuple(tuple, depth),
            Tuples::Compact(c) => c.insert_tuple(tuple),
        }
    }

    /// Retracts one derivation of `tuple`. Returns the release info if the
    /// tuple's count reached zero (trie-backed predicates only report this;
    /// compact-array predicates report via the bool return instead).
    pub fn delete_tuple(&mut self, pred: PredicateId, tuple: &Tuple) -> Option<DeleteInfo> {
        match &mut self.tuples[pred as usize] {
            Tuples::Trie(t) => t.delete_tuple(tuple),
            Tuples::Compact(c) => {
                c.delete_tuple(tuple);
                None
            }
        }
    }

    pub fn find_handle(&self, pred: PredicateId, tuple: &Tuple) -> Option<LeafHandle> {
        self.trie_ref(pred).find_handle(tuple)
    }

    pub fn delete_by_leaf(&mut self, pred: PredicateId, handle: LeafHandle) -> Option<DeleteInfo> {
        self.trie(pred).delete_by_leaf(handle)
    }

    pub fn delete_by_index(&mut self, pred: PredicateId, pattern: &Match) -> Vec<DeleteInfo> {
        self.trie(pred).delete_by_index(pattern)
    }

    /// Registers a positive contribution to `pred`'s aggregate at `depth`.
    /// Panics if `pred` has no aggregate table.
    pub fn add_agg_tuple(&mut self, pred: PredicateId, tuple: &Tuple, depth: Depth) {
        self.aggregate(pred).add_contribution(tuple, depth, Direction::Positive);
    }

    /// Cancels a contribution to `pred`'s aggregate at `depth`, extending
    /// `gc_nodes` with any node ref the dropped group's key carried if this
    /// was the group's last contribution. Panics if `pred` has no aggregate
    /// table.
    pub fn remove_agg_tuple(&mut self, pred: PredicateId, tuple: &Tuple, depth: Depth, gc_nodes: &mut Vec<NodeId>) {
        self.aggregate(pred).remove_contribution(tuple, depth, gc_nodes);
    }

    pub fn aggregate_result(&mut self, pred: PredicateId, key: &[crate::value::Value]) -> Option<crate::value::Value> {
        self.aggregate(pred).result(key).cloned()
    }

    pub fn match_predicate(&self, pred: PredicateId, pattern: Match) -> MatchCursor {
        self.trie_ref(pred).match_predicate(pattern)
    }

    pub fn match_step<'a>(&'a self, pred: PredicateId, cursor: &mut MatchCursor) -> Option<(Tuple, LeafHandle)> {
        cursor.next(self.trie_ref(pred))
    }

    pub fn count_tuple(&self, pred: PredicateId, tuple: &Tuple) -> DerivationCount {
        match &self.tuples[pred as usize] {
            Tuples::Trie(t) => t.count_tuple(tuple),
            Tuples::Compact(c) => c.count_tuple(tuple),
        }
    }

    /// Number of distinct live facts for one predicate's trie/array. Does not
    /// count aggregate groups — those are contributions, not materialized
    /// facts, until `end_iteration` settles and re-derives them.
    pub fn count_total(&self, pred: PredicateId) -> usize {
        match &self.tuples[pred as usize] {
            Tuples::Trie(t) => t.count_total(),
            Tuples::Compact(c) => c.count_total(),
        }
    }

    /// Number of distinct live facts across every predicate in this store.
    pub fn count_total_all(&self) -> usize {
        (0..self.tuples.len() as PredicateId).map(|p| self.count_total(p)).sum()
    }

    /// Frees trie slots released since the last call and flushes every
    /// aggregate table's settled groups into full tuples. Must only be
    /// invoked at a safe point with no outstanding `MatchCursor` (end of a
    /// round) — reclaiming trie slots while a cursor holds a stale reference
    /// would let it skip or misroute past a reused leaf.
    ///
    /// The caller is responsible for feeding the returned tuples back in
    /// through `add_tuple` on the same predicate id, the same as it would
    /// any other newly derived fact — this store only computes the settled
    /// value, it does not assume how re-derivation is scheduled.
    pub fn end_iteration(&mut self) -> Vec<Tuple> {
        for t in &mut self.tuples {
            if let Tuples::Trie(trie) = t {
                trie.reclaim();
            }
        }
        let mut emitted = Vec::new();
        for agg in self.aggs.iter_mut().flatten() {
            emitted.extend(agg.drain_results());
        }
        emitted
    }

    /// Formatted dump of one predicate's live tuples, in iteration order
    /// (compact-array predicates in key order). One string per tuple.
    pub fn dump(&self, pred: PredicateId) -> Vec<String> {
        match &self.tuples[pred as usize] {
            Tuples::Trie(t) => t.snapshot().iter().map(format_tuple).collect(),
            Tuples::Compact(c) => c.iter().map(format_tuple).collect(),
        }
    }

    /// Same as [`PersistentStore::dump`] but intended for human-facing
    /// display rather than machine parsing; for this store the two coincide
    /// since tuples have no richer presentation than their field list.
    pub fn print(&self, pred: PredicateId) -> Vec<String> {
        self.dump(pred)
    }

    /// Structured-data counterpart of [`PersistentStore::dump`], for an
    /// embedder that wants to forward introspection output as JSON rather
    /// than pre-formatted strings (e.g. a REPL or admin endpoint outside
    /// this crate).
    pub fn dump_json(&self, pred: PredicateId) -> serde_json::Value {
        let tuples: Vec<Tuple> = match &self.tuples[pred as usize] {
            Tuples::Trie(t) => t.snapshot(),
            Tuples::Compact(c) => c.iter().cloned().collect(),
        };
        serde_json::to_value(&tuples).expect("tuple serialization is infallible")
    }

    /// Clears every predicate's storage, returning the node ids referenced by
    /// any cleared tuple or aggregate group key (candidates for the
    /// program-wide GC set).
    pub fn wipeout(&mut self) -> Vec<NodeId> {
        let mut gc = Vec::new();
        for t in &mut self.tuples {
            match t {
                Tuples::Trie(trie) => gc.extend(trie.wipeout()),
                Tuples::Compact(c) => c.wipeout(),
            }
        }
        for agg in self.aggs.iter_mut().flatten() {
            gc.extend(agg.wipeout());
        }
        gc
    }
}

/// Renders a tuple's fields as `(f1, f2, ...)` for `dump`/`print`. Field
/// formatting matches `Value`'s `Debug` output since none of the field kinds
/// defines a nicer `Display` (interned strings and numbers already read
/// fine via `Debug`; reference-counted fields show their pointer identity,
/// which is exactly what introspection of a running store should surface).
fn format_tuple(tuple: &Tuple) -> String {
    let fields: Vec<String> = tuple.fields.iter().map(|f| format!("{f:?}")).collect();
    format!("({})", fields.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{AggregateOp, FieldType, Predicate};
    use crate::value::Value;

    fn catalog() -> PredicateCatalog {
        let mut cat = PredicateCatalog::new();
        cat.register(Predicate {
            id: 0,
            name: "edge".into(),
            field_types: vec![FieldType::Int, FieldType::Int],
            compact: false,
            persistent_id: 0,
            aggregate: None,
        });
        cat.register(Predicate {
            id: 1,
            name: "counter".into(),
            field_types: vec![FieldType::Int, FieldType::Bool],
            compact: true,
            persistent_id: 1,
            aggregate: None,
        });
        cat.register(Predicate {
            id: 2,
            name: "total".into(),
            field_types: vec![FieldType::Int, FieldType::Int],
            compact: false,
            persistent_id: 2,
            aggregate: Some(AggregateOp::Sum),
        });
        cat
    }

    #[test]
    fn trie_backed_predicate_round_trips() {
        let mut store = PersistentStore::new(&catalog());
        store.add_tuple(0, Tuple::new(vec![Value::Int(1), Value::Int(2)]), 0);
        assert_eq!(store.count_total(0), 1);
        assert!(store.delete_tuple(0, &Tuple::new(vec![Value::Int(1), Value::Int(2)])).is_some());
        assert_eq!(store.count_total(0), 0);
    }

    #[test]
    fn compact_backed_predicate_round_trips() {
        let mut store = PersistentStore::new(&catalog());
        store.add_tuple(1, Tuple::new(vec![Value::Int(3), Value::Bool(true)]), 0);
        assert_eq!(store.count_total(1), 1);
    }

    #[test]
    fn aggregate_predicate_computes_sum() {
        let mut store = PersistentStore::new(&catalog());
        store.add_agg_tuple(2, &Tuple::new(vec![Value::Int(9), Value::Int(4)]), 0);
        store.add_agg_tuple(2, &Tuple::new(vec![Value::Int(9), Value::Int(6)]), 0);
        assert_eq!(store.aggregate_result(2, &[Value::Int(9)]), Some(Value::Int(10)));
    }

    /// The round trip an aggregate predicate needs: a settled group is fed
    /// back into the predicate's own trie via the ordinary `add_tuple` path,
    /// so later matching against that same predicate id sees it.
    #[test]
    fn aggregate_predicate_also_matches_its_settled_tuple_via_its_trie() {
        let mut store = PersistentStore::new(&catalog());
        store.add_agg_tuple(2, &Tuple::new(vec![Value::Int(9), Value::Int(4)]), 0);
        store.add_agg_tuple(2, &Tuple::new(vec![Value::Int(9), Value::Int(6)]), 0);

        let emitted = store.end_iteration();
        assert_eq!(emitted, vec![Tuple::new(vec![Value::Int(9), Value::Int(10)])]);
        for tuple in emitted {
            store.add_tuple(2, tuple, 0);
        }

        assert_eq!(store.count_total(2), 1);
        assert_eq!(store.dump(2), vec!["(Int(9), Int(10))".to_string()]);
        let mut cursor = store.match_predicate(2, Match::all_wildcards(2));
        assert!(store.match_step(2, &mut cursor).is_some());
    }

    #[test]
    fn wipeout_clears_every_predicate() {
        let mut store = PersistentStore::new(&catalog());
        store.add_tuple(0, Tuple::new(vec![Value::Int(1), Value::Int(2)]), 0);
        store.add_tuple(1, Tuple::new(vec![Value::Int(3), Value::Bool(true)]), 0);
        store.add_agg_tuple(2, &Tuple::new(vec![Value::Int(9), Value::Int(4)]), 0);
        store.wipeout();
        assert_eq!(store.count_total_all(), 0);
    }

    #[test]
    fn dump_and_print_render_live_tuples() {
        let mut store = PersistentStore::new(&catalog());
        store.add_tuple(0, Tuple::new(vec![Value::Int(1), Value::Int(2)]), 0);
        let dumped = store.dump(0);
        assert_eq!(dumped, vec!["(Int(1), Int(2))".to_string()]);
        assert_eq!(store.print(0), dumped);
    }

    #[test]
    fn dump_json_serializes_live_tuples_as_a_json_array() {
        let mut store = PersistentStore::new(&catalog());
        store.add_tuple(0, Tuple::new(vec![Value::Int(1), Value::Int(2)]), 0);
        let json = store.dump_json(0);
        assert!(json.is_array());
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[test]
    fn end_iteration_emits_settled_aggregate_tuples() {
        let mut store = PersistentStore::new(&catalog());
        store.add_agg_tuple(2, &Tuple::new(vec![Value::Int(9), Value::Int(4)]), 0);
        store.add_agg_tuple(2, &Tuple::new(vec![Value::Int(9), Value::Int(6)]), 0);

        let emitted = store.end_iteration();
        assert_eq!(emitted, vec![Tuple::new(vec![Value::Int(9), Value::Int(10)])]);
    }

    #[test]
    fn removing_the_last_aggregate_contribution_surfaces_node_refs() {
        let mut store = PersistentStore::new(&catalog());
        let tuple = Tuple::new(vec![Value::Node(3), Value::Int(4)]);
        store.add_agg_tuple(2, &tuple, 0);
        let mut gc = Vec::new();
        store.remove_agg_tuple(2, &tuple, 0, &mut gc);
        assert_eq!(gc, vec![3]);
    }
}
