//! The candidate-GC set: node ids flagged because a tuple referencing them
//! was logically removed from some store. A node becomes collectible once
//! nothing else references it, but that check is relatively expensive (it
//! has to scan live tuples across the registry), so candidates are buffered
//! here and the actual collectibility check runs in a batch at a controlled
//! safe point rather than inline with every single retraction.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::node::NodeId;

#[derive(Default)]
pub struct GcCandidateSet {
    candidates: Mutex<HashSet<NodeId>>,
}

impl GcCandidateSet {
    pub fn new() -> Self {
        GcCandidateSet::default()
    }

    pub fn add(&self, node_id: NodeId) {
        self.candidates.lock().insert(node_id);
    }

    pub fn add_all(&self, node_ids: impl IntoIterator<Item = NodeId>) {
        let mut set = self.candidates.lock();
        set.extend(node_ids);
    }

    /// Drains every buffered candidate, handing ownership to the caller for
    /// the collectibility scan. Called at round boundaries, never mid-round.
    pub fn drain(&self) -> Vec<NodeId> {
        self.candidates.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
