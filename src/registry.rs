//! The node registry: the table mapping node ids to live [`Node`]s, shared
//! read-only by every worker once the program image has finished loading.
//!
//! Registration (`allocate_ids`, the initial bulk load) is serialized
//! behind a mutex since it has to clone-and-swap the whole id table;
//! steady-state lookups (`find_node`) go through `ArcSwap::load` and never
//! block a registering writer or each other once a node has been promoted.
//!
//! A newly registered `fake_id` starts life as a [`NodeSlot::Placeholder`]
//! carrying only its translated id — the same as `database::database`'s
//! constructor, which stores `nodes[fake_id] = (db::node*)user_id` rather
//! than a real `node*`. `find_node` promotes a placeholder to a real `Node`
//! (with its own `PersistentStore`) the first time anything looks it up,
//! mirroring `database::create_node_iterator`. This means a node's `Node`
//! and `PersistentStore` are only ever constructed once, on whichever
//! thread happens to touch that id first, not eagerly for every id a bulk
//! load or an `allocate_ids` range reserves.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::node::{Node, NodeId, RESERVED_NODE_ID};
use crate::predicate::PredicateCatalog;
use crate::store::PersistentStore;

/// One entry in the registry's id table: either a reservation waiting to be
/// promoted, or a fully constructed node.
enum NodeSlot {
    Placeholder(NodeId),
    Promoted(Arc<Node>),
}

impl NodeSlot {
    fn translated_id(&self) -> NodeId {
        match self {
            NodeSlot::Placeholder(translated_id) => *translated_id,
            NodeSlot::Promoted(node) => node.translated_id(),
        }
    }
}

/// The program-wide table of nodes.
pub struct NodeRegistry {
    catalog: Arc<PredicateCatalog>,
    nodes: ArcSwap<HashMap<NodeId, NodeSlot>>,
    write_lock: Mutex<()>,
    max_node_id: Mutex<NodeId>,
    max_translated_id: Mutex<NodeId>,
}

impl NodeRegistry {
    pub fn new(catalog: Arc<PredicateCatalog>) -> Self {
        NodeRegistry {
            catalog,
            nodes: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
            max_node_id: Mutex::new(RESERVED_NODE_ID),
            max_translated_id: Mutex::new(RESERVED_NODE_ID),
        }
    }

    /// Reserves `fake_id` with a placeholder carrying `translated_id`. Must
    /// be called under `write_lock`.
    fn insert_placeholder(&self, fake_id: NodeId, translated_id: NodeId) {
        let mut nodes = (**self.nodes.load()).clone();
        nodes.insert(fake_id, NodeSlot::Placeholder(translated_id));
        self.nodes.store(Arc::new(nodes));
    }

    fn bump_max_ids(&self, fake_id: NodeId, translated_id: NodeId) {
        let mut max_node_id = self.max_node_id.lock();
        if fake_id > *max_node_id {
            *max_node_id = fake_id;
        }
        drop(max_node_id);
        let mut max_translated_id = self.max_translated_id.lock();
        if translated_id > *max_translated_id {
            *max_translated_id = translated_id;
        }
    }

    /// Loads the initial node table from a program image's `(fake_id,
    /// user_id)` pairs, exactly as parsed by [`crate::loader::load_node_table`]
    /// — the pairs are the real wire ids and need not be dense or ascending.
    pub fn load_initial(&self, nodes: &[(NodeId, NodeId)]) {
        assert!(!nodes.is_empty(), "program image declares zero nodes");
        let _guard = self.write_lock.lock();
        for &(fake_id, translated_id) in nodes {
            self.insert_placeholder(fake_id, translated_id);
            self.bump_max_ids(fake_id, translated_id);
        }
        drop(_guard);
        tracing::debug!(num_nodes = nodes.len(), "registry_loaded_initial_nodes");
    }

    /// Allocates a single new node at runtime, with its translated id equal
    /// to its fake id (a dynamically created node has no separate
    /// program-image identity), and constructs it immediately — this is the
    /// one-off counterpart of `database::create_node_id`, which also builds
    /// its `node` right away rather than deferring to first access.
    pub fn create_node_id(&self) -> NodeId {
        let _guard = self.write_lock.lock();
        let fake_id = *self.max_node_id.lock() + 1;
        let node = Arc::new(Node::new(fake_id, fake_id, PersistentStore::new(&self.catalog)));
        let mut nodes = (**self.nodes.load()).clone();
        nodes.insert(fake_id, NodeSlot::Promoted(node));
        self.nodes.store(Arc::new(nodes));
        drop(_guard);

        self.bump_max_ids(fake_id, fake_id);
        fake_id
    }

    /// Reserves `count` new fake ids in one locked pass, returning them in
    /// allocation order. Only the id range is reserved — as in
    /// `database::allocate_ids`, no `Node` or `PersistentStore` is built
    /// here; each id is promoted lazily by `find_node` on first access.
    pub fn allocate_ids(&self, count: usize) -> Vec<NodeId> {
        let _guard = self.write_lock.lock();
        let start = *self.max_node_id.lock() + 1;
        let ids: Vec<NodeId> = (start..start + count as NodeId).collect();

        let mut nodes = (**self.nodes.load()).clone();
        for &fake_id in &ids {
            nodes.insert(fake_id, NodeSlot::Placeholder(fake_id));
        }
        self.nodes.store(Arc::new(nodes));
        drop(_guard);

        if let Some(&last) = ids.last() {
            self.bump_max_ids(last, last);
        }
        ids
    }

    /// Looks up `fake_id`, promoting a placeholder to a fully constructed
    /// node on first access. Lock-free for every subsequent lookup of the
    /// same id.
    pub fn find_node(&self, fake_id: NodeId) -> Option<Arc<Node>> {
        if fake_id == RESERVED_NODE_ID {
            return None;
        }
        match self.nodes.load().get(&fake_id) {
            None => None,
            Some(NodeSlot::Promoted(node)) => Some(Arc::clone(node)),
            Some(NodeSlot::Placeholder(_)) => Some(self.promote(fake_id)),
        }
    }

    fn promote(&self, fake_id: NodeId) -> Arc<Node> {
        let _guard = self.write_lock.lock();
        let mut nodes = (**self.nodes.load()).clone();
        let promoted = match nodes.get(&fake_id) {
            Some(NodeSlot::Promoted(node)) => Arc::clone(node),
            Some(NodeSlot::Placeholder(translated_id)) => {
                let node = Arc::new(Node::new(fake_id, *translated_id, PersistentStore::new(&self.catalog)));
                nodes.insert(fake_id, NodeSlot::Promoted(Arc::clone(&node)));
                self.nodes.store(Arc::new(nodes));
                node
            }
            None => unreachable!("promote called for an id that was never reserved"),
        };
        promoted
    }

    pub fn max_node_id(&self) -> NodeId {
        *self.max_node_id.lock()
    }

    pub fn max_translated_id(&self) -> NodeId {
        *self.max_translated_id.lock()
    }

    /// Sum of live fact counts across every promoted node. A placeholder has
    /// no store yet and trivially contributes zero.
    pub fn total_facts(&self) -> usize {
        self.nodes
            .load()
            .values()
            .map(|slot| match slot {
                NodeSlot::Promoted(node) => node.count_total_all(),
                NodeSlot::Placeholder(_) => 0,
            })
            .sum()
    }

    /// Clears every promoted node's persistent store. Placeholders carry no
    /// store and are left as-is.
    pub fn wipeout(&self) {
        let nodes = self.nodes.load();
        for slot in nodes.values() {
            if let NodeSlot::Promoted(node) = slot {
                node.lock().store.wipeout();
            }
        }
        tracing::info!(num_nodes = nodes.len(), "registry_wiped_out");
    }

    /// Fake ids in ascending order.
    pub fn dump_db(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.load().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Fake ids sorted by translated id, for a presentation order matching
    /// the program's own node numbering rather than fake-id order.
    pub fn print_db(&self) -> Vec<NodeId> {
        let nodes = self.nodes.load();
        let mut ids: Vec<(NodeId, NodeId)> = nodes.iter().map(|(&fake_id, slot)| (slot.translated_id(), fake_id)).collect();
        ids.sort_unstable_by_key(|&(translated, _)| translated);
        ids.into_iter().map(|(_, fake)| fake).collect()
    }

    /// The bare set of fake ids currently registered, in ascending order,
    /// for a cheap liveness check.
    pub fn print(&self) -> Vec<NodeId> {
        self.dump_db()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(Arc::new(PredicateCatalog::new()))
    }

    #[test]
    fn load_initial_registers_the_given_fake_ids() {
        let reg = registry();
        reg.load_initial(&[(1, 100), (2, 200), (3, 300)]);
        assert_eq!(reg.max_node_id(), 3);
        assert_eq!(reg.find_node(1).unwrap().translated_id(), 100);
        assert_eq!(reg.find_node(3).unwrap().translated_id(), 300);
        assert!(reg.find_node(0).is_none());
    }

    #[test]
    fn load_initial_accepts_sparse_and_out_of_order_fake_ids() {
        let reg = registry();
        reg.load_initial(&[(1, 100), (5, 200)]);
        assert_eq!(reg.max_node_id(), 5);
        assert_eq!(reg.find_node(5).unwrap().translated_id(), 200);
        assert!(reg.find_node(2).is_none());
    }

    #[test]
    fn find_node_promotes_a_placeholder_exactly_once() {
        let reg = registry();
        reg.load_initial(&[(1, 100)]);
        let first = reg.find_node(1).unwrap();
        let second = reg.find_node(1).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn create_node_id_appends_past_the_initial_load() {
        let reg = registry();
        reg.load_initial(&[(1, 100)]);
        let new_id = reg.create_node_id();
        assert_eq!(new_id, 2);
        assert_eq!(reg.max_node_id(), 2);
    }

    #[test]
    fn allocate_ids_reserves_a_contiguous_block_without_materializing_nodes() {
        let reg = registry();
        reg.load_initial(&[(1, 100)]);
        let ids = reg.allocate_ids(3);
        assert_eq!(ids, vec![2, 3, 4]);
        // Reserved, but not yet promoted until looked up.
        assert_eq!(reg.find_node(3).unwrap().translated_id(), 3);
    }

    #[test]
    fn print_db_orders_by_translated_id() {
        let reg = registry();
        reg.load_initial(&[(1, 30), (2, 10), (3, 20)]);
        assert_eq!(reg.print_db(), vec![2, 3, 1]);
        assert_eq!(reg.dump_db(), vec![1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "zero nodes")]
    fn empty_program_image_panics() {
        let reg = registry();
        reg.load_initial(&[]);
    }
}
