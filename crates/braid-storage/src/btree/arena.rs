//! Slot arena for B+ tree nodes.
//!
//! Nodes are owned by the arena and addressed by `NodeId`. Freed slots are
//! recycled through a free list, so ids stay small and stable across
//! unrelated mutations.

use super::node::{InternalNode, LeafNode, Node, NodeId};

pub(crate) struct NodeArena {
    slots: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

impl NodeArena {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores a node and returns its id.
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.slots[id.index()] = Some(node);
                id
            }
            None => {
                let id = NodeId(self.slots.len() as u32);
                self.slots.push(Some(node));
                id
            }
        }
    }

    /// Removes a node, releasing its slot for reuse.
    pub(crate) fn remove(&mut self, id: NodeId) -> Node {
        let node = self.slots[id.index()]
            .take()
            .expect("arena slot being removed must be occupied");
        self.free.push(id);
        node
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        self.slots[id.index()]
            .as_ref()
            .expect("arena slot being read must be occupied")
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id.index()]
            .as_mut()
            .expect("arena slot being written must be occupied")
    }

    pub(crate) fn leaf(&self, id: NodeId) -> &LeafNode {
        match self.node(id) {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("node {} is not a leaf", id),
        }
    }

    pub(crate) fn leaf_mut(&mut self, id: NodeId) -> &mut LeafNode {
        match self.node_mut(id) {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("node {} is not a leaf", id),
        }
    }

    pub(crate) fn internal(&self, id: NodeId) -> &InternalNode {
        match self.node(id) {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("node {} is not an internal node", id),
        }
    }

    pub(crate) fn internal_mut(&mut self, id: NodeId) -> &mut InternalNode {
        match self.node_mut(id) {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("node {} is not an internal node", id),
        }
    }

    /// Number of live nodes. Test support: structural checks compare this
    /// against the count of nodes reachable from the root to catch leaks.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
