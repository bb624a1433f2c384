//! Compact storage for predicates flagged `compact`: a dense array indexed by
//! the integer value of a tuple's first field, used when a predicate's first
//! argument is known to range densely over small integers (typical for
//! per-node counters and small enumerations). Avoids the trie's per-insert
//! hashing and branch allocation for this common shape.

use crate::value::{DerivationCount, Tuple, Value};

struct Entry {
    tuple: Tuple,
    count: DerivationCount,
}

/// A dense array store keyed by `tuple.field(0)` as a non-negative integer.
pub struct CompactArray {
    arity: usize,
    slots: Vec<Option<Entry>>,
    len: usize,
}

impl CompactArray {
    pub fn new(arity: usize) -> Self {
        assert!(arity >= 1, "compact array requires arity >= 1");
        CompactArray { arity, slots: Vec::new(), len: 0 }
    }

    fn key_of(tuple: &Tuple) -> usize {
        match tuple.field(0) {
            Value::Int(n) => usize::try_from(*n).expect("compact array key must be non-negative"),
            Value::Node(id) => *id as usize,
            other => panic!("compact array key field must be Int or Node, got {other:?}"),
        }
    }

    /// Inserts a derivation, incrementing the count if the key slot is
    /// already occupied by an identical tuple. Returns `true` if a new slot
    /// was populated.
    pub fn insert_tuple(&mut self, tuple: Tuple) -> bool {
        assert_eq!(tuple.arity(), self.arity, "tuple arity does not match compact array arity");
        let key = Self::key_of(&tuple);
        if key >= self.slots.len() {
            self.slots.resize_with(key + 1, || None);
        }
        match &mut self.slots[key] {
            Some(entry) => {
                assert_eq!(entry.tuple, tuple, "compact array key collision between distinct tuples");
                entry.count += 1;
                false
            }
            slot @ None => {
                *slot = Some(Entry { tuple, count: 1 });
                self.len += 1;
                true
            }
        }
    }

    /// Decrements the derivation count for `tuple`, returning `true` once it
    /// has been fully retracted (slot cleared). Panics if absent.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> bool {
        let key = Self::key_of(tuple);
        let entry = self.slots.get_mut(key).and_then(|s| s.as_mut()).expect("delete_tuple: tuple not present");
        assert!(entry.count > 0, "derivation count underflow");
        entry.count -= 1;
        if entry.count == 0 {
            self.slots[key] = None;
            self.len -= 1;
            true
        } else {
            false
        }
    }

    pub fn count_tuple(&self, tuple: &Tuple) -> DerivationCount {
        let key = Self::key_of(tuple);
        self.slots.get(key).and_then(|s| s.as_ref()).map_or(0, |e| e.count)
    }

    pub fn count_total(&self) -> usize {
        self.len
    }

    pub fn get(&self, key: usize) -> Option<&Tuple> {
        self.slots.get(key).and_then(|s| s.as_ref()).map(|e| &e.tuple)
    }

    /// Iterates occupied slots by ascending key (the array's natural order,
    /// which also happens to equal the key value itself).
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().filter_map(|s| s.as_ref().map(|e| &e.tuple))
    }

    pub fn wipeout(&mut self) {
        self.slots.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(key: i64, rest: Vec<Value>) -> Tuple {
        let mut fields = vec![Value::Int(key)];
        fields.extend(rest);
        Tuple::new(fields)
    }

    #[test]
    fn insert_grows_array_and_dedups_by_key() {
        let mut arr = CompactArray::new(2);
        assert!(arr.insert_tuple(t(5, vec![Value::Bool(true)])));
        assert!(!arr.insert_tuple(t(5, vec![Value::Bool(true)])));
        assert_eq!(arr.count_tuple(&t(5, vec![Value::Bool(true)])), 2);
        assert_eq!(arr.count_total(), 1);
    }

    #[test]
    fn delete_clears_slot_at_zero_count() {
        let mut arr = CompactArray::new(1);
        arr.insert_tuple(t(3, vec![]));
        assert!(arr.delete_tuple(&t(3, vec![])));
        assert_eq!(arr.count_total(), 0);
        assert!(arr.get(3).is_none());
    }

    #[test]
    fn iter_yields_in_ascending_key_order() {
        let mut arr = CompactArray::new(1);
        arr.insert_tuple(t(4, vec![]));
        arr.insert_tuple(t(1, vec![]));
        arr.insert_tuple(t(2, vec![]));
        let keys: Vec<i64> = arr.iter().map(|t| if let Value::Int(n) = t.field(0) { *n } else { unreachable!() }).collect();
        assert_eq!(keys, vec![1, 2, 4]);
    }

    #[test]
    #[should_panic(expected = "not present")]
    fn delete_of_absent_tuple_panics() {
        let mut arr = CompactArray::new(1);
        arr.delete_tuple(&t(0, vec![]));
    }
}
