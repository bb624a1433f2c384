//! Aggregate tables: a predicate flagged with an `AggregateOp` groups its
//! tuples by every field but the last, and the last field's values within a
//! group form a multiset of contributions reduced to a single result.
//!
//! A contribution is added when the underlying tuple is derived and removed
//! when it is retracted; "positive" vs. "negative" is whether the
//! contribution is being added or cancelled, not a sign on the value itself.
//! Because `Min`/`Max` cannot be updated incrementally when their current
//! extreme value is retracted, the result is recomputed from the live
//! multiset on demand rather than kept current — the reduction is a pure
//! function of "the multiset right now", materialized lazily the first time
//! it is asked for after a change.
//!
//! A group's key is itself a field list and can carry `Value::Node` fields,
//! same as a plain tuple can; dropping a group once its last contribution is
//! retracted must surface those references to the candidate-GC set exactly
//! like `trie::Trie::remove_leaf`/`wipeout` do for a dropped leaf.

use std::collections::HashMap;

use crate::node::NodeId;
use crate::predicate::AggregateOp;
use crate::value::{node_refs, Depth, OrderedFloat, Tuple, Value};

/// Whether a contribution is being added or cancelled. `add_contribution`
/// only ever takes `Positive`; the parameter exists so the call site reads
/// the same as `persistent_store.hpp`'s `add_agg_tuple(..., dir, ...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Positive,
    Negative,
}

#[derive(Default)]
struct Group {
    contributions: Vec<(Value, Depth)>,
    cached_result: Option<Value>,
}

/// Grouping/reduction table for one aggregate predicate.
pub struct AggregateTable {
    op: AggregateOp,
    /// Arity of the grouping key (tuple arity minus one: every field but the
    /// last, which is the contribution value).
    key_arity: usize,
    groups: HashMap<Vec<Value>, Group>,
}

impl AggregateTable {
    pub fn new(op: AggregateOp, tuple_arity: usize) -> Self {
        assert!(tuple_arity >= 1, "aggregate tuple needs at least a contribution field");
        AggregateTable { op, key_arity: tuple_arity - 1, groups: HashMap::new() }
    }

    fn split(&self, tuple: &Tuple) -> (Vec<Value>, Value) {
        assert_eq!(tuple.arity(), self.key_arity + 1, "tuple arity does not match aggregate arity");
        let key = tuple.fields[..self.key_arity].to_vec();
        let contribution = tuple.fields[self.key_arity].clone();
        (key, contribution)
    }

    /// Adds a positive contribution (a tuple was derived into this
    /// predicate) at `depth`. Invalidates the group's cached result.
    ///
    /// Mirrors `persistent_store.hpp::add_agg_tuple`'s parameter list;
    /// `direction` is always `Positive` here (the method name already says
    /// so) and is accepted rather than dropped so the call site matches the
    /// grounding signature. Adding a contribution never discards a group, so
    /// unlike `remove_contribution` this has no `gc_nodes` out-parameter.
    pub fn add_contribution(&mut self, tuple: &Tuple, depth: Depth, direction: Direction) {
        debug_assert_eq!(direction, Direction::Positive, "add_contribution only ever adds");
        let (key, contribution) = self.split(tuple);
        let group = self.groups.entry(key).or_default();
        group.contributions.push((contribution, depth));
        group.cached_result = None;
    }

    /// Removes one contribution matching `tuple`'s value (a negative
    /// contribution, i.e. the underlying tuple was retracted at `depth`).
    /// Panics if no matching contribution exists in the group — retracting a
    /// never-contributed value is an invariant violation. Drops the group
    /// entirely once its last contribution is removed, extending `gc_nodes`
    /// with any `Value::Node` field the dropped group's key carried (the
    /// group-key counterpart of `trie::Trie::remove_leaf`'s `gc_candidates`).
    pub fn remove_contribution(&mut self, tuple: &Tuple, _depth: Depth, gc_nodes: &mut Vec<NodeId>) {
        let (key, contribution) = self.split(tuple);
        let group = self.groups.get_mut(&key).expect("remove_contribution: no such group");
        let pos = group
            .contributions
            .iter()
            .position(|(c, _)| *c == contribution)
            .expect("remove_contribution: value not found in group");
        group.contributions.swap_remove(pos);
        group.cached_result = None;
        if group.contributions.is_empty() {
            self.groups.remove(&key);
            gc_nodes.extend(node_refs(&key));
        }
    }

    /// The reduced value for `key`, computing and caching it if necessary.
    /// `None` if the group has no contributions (never seen, or fully
    /// retracted).
    pub fn result(&mut self, key: &[Value]) -> Option<&Value> {
        let group = self.groups.get_mut(key)?;
        if group.cached_result.is_none() {
            group.cached_result = Some(reduce(self.op, &group.contributions));
        }
        group.cached_result.as_ref()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Clears every group, returning the node refs their keys carried (the
    /// aggregate-table counterpart of `Trie::wipeout`'s `gc_candidates`).
    pub fn wipeout(&mut self) -> Vec<NodeId> {
        let gc = self.groups.keys().flat_map(|key| node_refs(key)).collect();
        self.groups.clear();
        gc
    }

    /// Emits one full tuple (`key` fields followed by the reduced value) per
    /// live group, computing and caching each group's result first if it
    /// isn't already current. Called at round boundaries by
    /// `PersistentStore::end_iteration`; does not clear the groups
    /// themselves, since later rounds may still add or cancel contributions
    /// to the same key.
    pub fn drain_results(&mut self) -> Vec<Tuple> {
        let mut out = Vec::with_capacity(self.groups.len());
        for (key, group) in &mut self.groups {
            if group.cached_result.is_none() {
                group.cached_result = Some(reduce(self.op, &group.contributions));
            }
            let mut fields = key.clone();
            fields.push(group.cached_result.clone().expect("result computed above"));
            out.push(Tuple::new(fields));
        }
        out
    }
}

fn reduce(op: AggregateOp, contributions: &[(Value, Depth)]) -> Value {
    assert!(!contributions.is_empty(), "reduce called on an empty contribution set");
    match op {
        AggregateOp::Count => Value::Int(contributions.len() as i64),
        AggregateOp::Sum => {
            let mut acc = 0f64;
            let mut all_int = true;
            let mut int_acc = 0i64;
            for (c, _) in contributions {
                match c {
                    Value::Int(n) => {
                        int_acc += n;
                        acc += *n as f64;
                    }
                    Value::Float(OrderedFloat(f)) => {
                        all_int = false;
                        acc += f;
                    }
                    other => panic!("sum aggregate over non-numeric field: {other:?}"),
                }
            }
            if all_int {
                Value::Int(int_acc)
            } else {
                Value::Float(OrderedFloat(acc))
            }
        }
        AggregateOp::Min => contributions.iter().map(|(c, _)| c).min_by(|a, b| numeric_cmp(a, b)).unwrap().clone(),
        AggregateOp::Max => contributions.iter().map(|(c, _)| c).max_by(|a, b| numeric_cmp(a, b)).unwrap().clone(),
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => a.cmp(b),
        (Value::Int(a), Value::Float(b)) => OrderedFloat(*a as f64).cmp(b),
        (Value::Float(a), Value::Int(b)) => a.cmp(&OrderedFloat(*b as f64)),
        (a, b) => panic!("min/max aggregate over non-numeric fields: {a:?}, {b:?}"),
    }
}
