//! B+ tree operations, WAL orchestration, and recovery.

use super::arena::NodeArena;
use super::constants::{MAX_DEGREE, MIN_KEYS, SPLIT_INDEX};
use super::node::{InternalNode, LeafNode, Node, NodeId};
use crate::snapshot::{snapshot_path_for, Snapshotter};
use braid_common::{
    BraidError, Key, Result, StoreConfig, Value, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};
use braid_wal::{WalReader, WalRecordType, WalWriter};
use bytes::Bytes;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Crash-consistent ordered key-value store.
///
/// A single-writer, single-threaded structure: every operation runs to
/// completion on the caller's thread. Mutations are appended to the WAL
/// before the in-memory tree changes, so a WAL failure leaves the tree
/// untouched. `recover_from_wal` restores the persistent state on open.
pub struct BTree {
    arena: NodeArena,
    root: NodeId,
    wal_writer: Option<WalWriter>,
    wal_path: Option<PathBuf>,
    snapshotter: Option<Snapshotter>,
    /// While set, mutations skip WAL appends (they are themselves replay).
    recovering: bool,
    entry_count: usize,
    operation_count: u64,
    checkpoint_interval: u64,
}

impl BTree {
    /// Creates a store from a configuration.
    ///
    /// A WAL open failure is tolerated: the store logs a warning and runs
    /// with durability disabled rather than refusing to serve.
    pub fn new(config: StoreConfig) -> Self {
        let mut arena = NodeArena::new();
        let root = arena.insert(Node::Leaf(LeafNode::default()));

        let (wal_writer, snapshotter) = match &config.wal_path {
            Some(path) => {
                let writer = match WalWriter::open(path) {
                    Ok(writer) => Some(writer),
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to open WAL; durability disabled"
                        );
                        None
                    }
                };
                (writer, Some(Snapshotter::new(snapshot_path_for(path))))
            }
            None => (None, None),
        };

        Self {
            arena,
            root,
            wal_writer,
            wal_path: config.wal_path,
            snapshotter,
            recovering: false,
            entry_count: 0,
            operation_count: 0,
            checkpoint_interval: config.checkpoint_interval,
        }
    }

    /// Creates a durable store backed by the given WAL path.
    pub fn open(wal_path: impl Into<PathBuf>) -> Self {
        Self::new(StoreConfig::durable(wal_path))
    }

    /// Creates a store with no durability.
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::in_memory())
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        let leaf = self.arena.leaf(self.find_leaf(key));
        leaf.get_index(key).map(|idx| leaf.values[idx].clone())
    }

    /// Number of entries in the store.
    pub fn len(&self) -> usize {
        self.entry_count
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Returns true if mutations are being logged to a WAL.
    pub fn is_durable(&self) -> bool {
        self.wal_writer.is_some()
    }

    /// Sets the number of mutations between automatic checkpoints.
    /// `0` disables automatic checkpointing.
    pub fn set_checkpoint_interval(&mut self, interval: u64) {
        self.checkpoint_interval = interval;
    }

    /// Inserts `key` with `value`, overwriting any existing entry.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        check_entry_size(key, value)?;

        if !self.recovering {
            if let Some(wal) = self.wal_writer.as_mut() {
                wal.write_put(key, value)?;
            }
        }

        let leaf_id = self.find_leaf(key);
        let inserted = {
            let leaf = self.arena.leaf_mut(leaf_id);
            match leaf.get_index(key) {
                Some(idx) => {
                    leaf.values[idx] = Bytes::copy_from_slice(value);
                    false
                }
                None => {
                    leaf.insert(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
                    true
                }
            }
        };

        if inserted {
            self.entry_count += 1;
            if self.arena.leaf(leaf_id).keys.len() >= MAX_DEGREE {
                self.split_leaf(leaf_id);
            }
        }

        self.note_mutation();
        Ok(())
    }

    /// Replaces the value of an existing key. Unlike `put`, a missing key
    /// is an error and writes nothing to the WAL.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        check_entry_size(key, value)?;

        let leaf_id = self.find_leaf(key);
        let idx = match self.arena.leaf(leaf_id).get_index(key) {
            Some(idx) => idx,
            None => {
                return Err(BraidError::NotFound("key not present in tree".to_string()))
            }
        };

        if !self.recovering {
            if let Some(wal) = self.wal_writer.as_mut() {
                wal.write_update(key, value)?;
            }
        }

        self.arena.leaf_mut(leaf_id).values[idx] = Bytes::copy_from_slice(value);
        self.note_mutation();
        Ok(())
    }

    /// Deletes `key`. A missing key is an error and writes nothing to the
    /// WAL.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        let leaf_id = self.find_leaf(key);
        let idx = match self.arena.leaf(leaf_id).get_index(key) {
            Some(idx) => idx,
            None => {
                return Err(BraidError::NotFound("key not present in tree".to_string()))
            }
        };

        if !self.recovering {
            if let Some(wal) = self.wal_writer.as_mut() {
                wal.write_delete(key)?;
            }
        }

        {
            let leaf = self.arena.leaf_mut(leaf_id);
            leaf.keys.remove(idx);
            leaf.values.remove(idx);
        }
        self.entry_count -= 1;

        // The root leaf is exempt from the minimum-fill rule.
        if leaf_id != self.root && self.arena.leaf(leaf_id).keys.len() < MIN_KEYS {
            self.rebalance_leaf(leaf_id);
        }
        self.collapse_root();

        self.note_mutation();
        Ok(())
    }

    /// Visits every entry in ascending key order. The callback must not
    /// mutate the tree.
    pub fn iterate_all(&self, mut callback: impl FnMut(&[u8], &[u8])) {
        for (key, value) in self.iter() {
            callback(key, value);
        }
    }

    /// Borrowing iterator over all entries in ascending key order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            tree: self,
            leaf: Some(self.leftmost_leaf()),
            idx: 0,
        }
    }

    /// Makes all previously written WAL records durable.
    pub fn flush_wal(&mut self) -> Result<()> {
        match self.wal_writer.as_mut() {
            Some(wal) => wal.sync(),
            None => Ok(()),
        }
    }

    /// Writes a full snapshot atomically, then truncates the WAL.
    ///
    /// If the snapshot step fails the WAL is left untouched, so the store
    /// stays recoverable from the previous snapshot plus the existing log.
    pub fn create_checkpoint(&mut self) -> Result<()> {
        let wal_path = match self.wal_path.clone() {
            Some(path) => path,
            None => {
                debug!("checkpoint skipped: store is in-memory only");
                return Ok(());
            }
        };

        if let Some(snapshotter) = self.snapshotter.as_ref() {
            snapshotter.create_snapshot(self)?;
        }

        if let Some(wal) = self.wal_writer.as_mut() {
            wal.sync()?;
        }
        drop(self.wal_writer.take());

        // The snapshot now carries the full state; restart the log.
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&wal_path)?;

        self.wal_writer = match WalWriter::open(&wal_path) {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!(
                    path = %wal_path.display(),
                    error = %e,
                    "failed to reopen WAL after checkpoint; durability disabled"
                );
                None
            }
        };

        Ok(())
    }

    /// Restores the persistent state: loads the latest snapshot, then
    /// replays the WAL tail. Idempotent with respect to durable state.
    pub fn recover_from_wal(&mut self) -> Result<()> {
        if self.wal_path.is_none() {
            return Ok(());
        }

        // Recovering mode must end on every exit path so that later
        // mutations are logged again.
        self.recovering = true;
        let result = self.replay_persistent_state();
        self.recovering = false;
        result
    }

    fn replay_persistent_state(&mut self) -> Result<()> {
        let started = Instant::now();

        if let Some(snapshotter) = self.snapshotter.clone() {
            snapshotter.load_snapshot(self)?;
        }

        let wal_path = match self.wal_path.clone() {
            Some(path) => path,
            None => return Ok(()),
        };

        let mut reader = match WalReader::open(&wal_path) {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut records_replayed = 0u64;
        loop {
            let record = match reader.read_next() {
                Ok(record) => record,
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            };

            match record.record_type {
                WalRecordType::Put => self.put(&record.key, &record.value)?,
                WalRecordType::Delete => match self.remove(&record.key) {
                    Ok(()) => {}
                    // Replay may revisit a delete that already happened.
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                },
                WalRecordType::Update => match self.update(&record.key, &record.value) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        warn!("update for missing key during replay; applying as put");
                        self.put(&record.key, &record.value)?;
                    }
                    Err(e) => return Err(e),
                },
                WalRecordType::Checkpoint => {
                    debug!("checkpoint marker in WAL");
                }
            }
            records_replayed += 1;
        }

        info!(
            records = records_replayed,
            entries = self.entry_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "recovery complete"
        );
        Ok(())
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Descends from the root to the leaf responsible for `key`.
    fn find_leaf(&self, key: &[u8]) -> NodeId {
        let mut current = self.root;
        loop {
            match self.arena.node(current) {
                Node::Leaf(_) => return current,
                Node::Internal(internal) => {
                    current = internal.children[internal.child_index(key)];
                }
            }
        }
    }

    fn leftmost_leaf(&self) -> NodeId {
        let mut current = self.root;
        loop {
            match self.arena.node(current) {
                Node::Leaf(_) => return current,
                Node::Internal(internal) => current = internal.children[0],
            }
        }
    }

    // =========================================================================
    // Splits
    // =========================================================================

    fn split_leaf(&mut self, leaf_id: NodeId) {
        let (right_keys, right_values, old_next, parent) = {
            let leaf = self.arena.leaf_mut(leaf_id);
            let right_keys = leaf.keys.split_off(SPLIT_INDEX);
            let right_values = leaf.values.split_off(SPLIT_INDEX);
            (right_keys, right_values, leaf.next, leaf.parent)
        };

        // The smallest key of the new right leaf becomes the separator.
        let separator = right_keys[0].clone();
        let right_id = self.arena.insert(Node::Leaf(LeafNode {
            keys: right_keys,
            values: right_values,
            next: old_next,
            prev: Some(leaf_id),
            parent,
        }));

        self.arena.leaf_mut(leaf_id).next = Some(right_id);
        if let Some(next_id) = old_next {
            self.arena.leaf_mut(next_id).prev = Some(right_id);
        }

        self.insert_into_parent(leaf_id, separator, right_id);
    }

    fn split_internal(&mut self, node_id: NodeId) {
        let (promoted, right_keys, right_children, parent) = {
            let node = self.arena.internal_mut(node_id);
            let mut right_keys = node.keys.split_off(SPLIT_INDEX);
            // The median-position key moves up, not right.
            let promoted = right_keys.remove(0);
            let right_children = node.children.split_off(SPLIT_INDEX + 1);
            (promoted, right_keys, right_children, node.parent)
        };

        let right_id = self.arena.insert(Node::Internal(InternalNode {
            keys: right_keys,
            children: right_children,
            parent,
        }));

        let moved: Vec<NodeId> = self.arena.internal(right_id).children.clone();
        for child in moved {
            self.arena.node_mut(child).set_parent(Some(right_id));
        }

        self.insert_into_parent(node_id, promoted, right_id);
    }

    fn insert_into_parent(&mut self, left_id: NodeId, separator: Key, right_id: NodeId) {
        if left_id == self.root {
            let new_root = self.arena.insert(Node::Internal(InternalNode {
                keys: vec![separator],
                children: vec![left_id, right_id],
                parent: None,
            }));
            self.arena.node_mut(left_id).set_parent(Some(new_root));
            self.arena.node_mut(right_id).set_parent(Some(new_root));
            self.root = new_root;
            return;
        }

        let parent_id = self
            .arena
            .node(left_id)
            .parent()
            .expect("non-root node must have a parent");
        {
            let parent = self.arena.internal_mut(parent_id);
            let idx = parent.keys.partition_point(|k| *k <= separator);
            parent.keys.insert(idx, separator);
            parent.children.insert(idx + 1, right_id);
        }
        self.arena.node_mut(right_id).set_parent(Some(parent_id));

        if self.arena.internal(parent_id).keys.len() >= MAX_DEGREE {
            self.split_internal(parent_id);
        }
    }

    // =========================================================================
    // Deletion rebalancing
    // =========================================================================

    fn rebalance_leaf(&mut self, leaf_id: NodeId) {
        let parent_id = match self.arena.leaf(leaf_id).parent {
            Some(parent_id) => parent_id,
            None => return,
        };
        let pos = self.arena.internal(parent_id).position_of(leaf_id);
        let child_count = self.arena.internal(parent_id).children.len();

        // Borrow the smallest entry of the right sibling.
        if pos + 1 < child_count {
            let right_id = self.arena.internal(parent_id).children[pos + 1];
            if self.arena.leaf(right_id).keys.len() > MIN_KEYS {
                let (key, value) = {
                    let right = self.arena.leaf_mut(right_id);
                    (right.keys.remove(0), right.values.remove(0))
                };
                {
                    let leaf = self.arena.leaf_mut(leaf_id);
                    leaf.keys.push(key);
                    leaf.values.push(value);
                }
                let new_separator = self.arena.leaf(right_id).keys[0].clone();
                self.arena.internal_mut(parent_id).keys[pos] = new_separator;
                return;
            }
        }

        // Borrow the largest entry of the left sibling.
        if pos > 0 {
            let left_id = self.arena.internal(parent_id).children[pos - 1];
            if self.arena.leaf(left_id).keys.len() > MIN_KEYS {
                let (key, value) = {
                    let left = self.arena.leaf_mut(left_id);
                    let last = left.keys.len() - 1;
                    (left.keys.remove(last), left.values.remove(last))
                };
                {
                    let leaf = self.arena.leaf_mut(leaf_id);
                    leaf.keys.insert(0, key);
                    leaf.values.insert(0, value);
                }
                let new_separator = self.arena.leaf(leaf_id).keys[0].clone();
                self.arena.internal_mut(parent_id).keys[pos - 1] = new_separator;
                return;
            }
        }

        // Neither sibling can spare an entry; merge, preferring the left.
        if pos > 0 {
            let left_id = self.arena.internal(parent_id).children[pos - 1];
            self.merge_leaves(left_id, leaf_id, parent_id, pos - 1);
        } else {
            let right_id = self.arena.internal(parent_id).children[pos + 1];
            self.merge_leaves(leaf_id, right_id, parent_id, pos);
        }
    }

    /// Absorbs `right_id` into `left_id`. `separator_idx` is the index of
    /// the parent key between the two leaves.
    fn merge_leaves(
        &mut self,
        left_id: NodeId,
        right_id: NodeId,
        parent_id: NodeId,
        separator_idx: usize,
    ) {
        let removed = match self.arena.remove(right_id) {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => unreachable!("leaf sibling must be a leaf"),
        };

        {
            let left = self.arena.leaf_mut(left_id);
            left.keys.extend(removed.keys);
            left.values.extend(removed.values);
            left.next = removed.next;
        }
        if let Some(next_id) = removed.next {
            self.arena.leaf_mut(next_id).prev = Some(left_id);
        }

        {
            let parent = self.arena.internal_mut(parent_id);
            parent.keys.remove(separator_idx);
            parent.children.remove(separator_idx + 1);
        }

        self.finish_merge(parent_id);
    }

    /// After a merge removed a separator, the parent itself may be
    /// underfull.
    fn finish_merge(&mut self, parent_id: NodeId) {
        if parent_id == self.root {
            return;
        }
        if self.arena.internal(parent_id).keys.len() < MIN_KEYS {
            self.rebalance_internal(parent_id);
        }
    }

    fn rebalance_internal(&mut self, node_id: NodeId) {
        let parent_id = match self.arena.internal(node_id).parent {
            Some(parent_id) => parent_id,
            None => return,
        };
        let pos = self.arena.internal(parent_id).position_of(node_id);
        let child_count = self.arena.internal(parent_id).children.len();

        // Rotate through the parent: separator comes down, the sibling's
        // edge key goes up, and one child changes sides.
        if pos + 1 < child_count {
            let right_id = self.arena.internal(parent_id).children[pos + 1];
            if self.arena.internal(right_id).keys.len() > MIN_KEYS {
                let (up_key, moved_child) = {
                    let right = self.arena.internal_mut(right_id);
                    (right.keys.remove(0), right.children.remove(0))
                };
                let separator =
                    std::mem::replace(&mut self.arena.internal_mut(parent_id).keys[pos], up_key);
                {
                    let node = self.arena.internal_mut(node_id);
                    node.keys.push(separator);
                    node.children.push(moved_child);
                }
                self.arena.node_mut(moved_child).set_parent(Some(node_id));
                return;
            }
        }

        if pos > 0 {
            let left_id = self.arena.internal(parent_id).children[pos - 1];
            if self.arena.internal(left_id).keys.len() > MIN_KEYS {
                let (up_key, moved_child) = {
                    let left = self.arena.internal_mut(left_id);
                    let last_key = left.keys.len() - 1;
                    let last_child = left.children.len() - 1;
                    (left.keys.remove(last_key), left.children.remove(last_child))
                };
                let separator = std::mem::replace(
                    &mut self.arena.internal_mut(parent_id).keys[pos - 1],
                    up_key,
                );
                {
                    let node = self.arena.internal_mut(node_id);
                    node.keys.insert(0, separator);
                    node.children.insert(0, moved_child);
                }
                self.arena.node_mut(moved_child).set_parent(Some(node_id));
                return;
            }
        }

        // Merge, preferring the left sibling.
        if pos > 0 {
            let left_id = self.arena.internal(parent_id).children[pos - 1];
            self.merge_internals(left_id, node_id, parent_id, pos - 1);
        } else {
            let right_id = self.arena.internal(parent_id).children[pos + 1];
            self.merge_internals(node_id, right_id, parent_id, pos);
        }
    }

    /// Absorbs internal node `right_id` into `left_id`, pulling the parent
    /// separator down between their key sequences.
    fn merge_internals(
        &mut self,
        left_id: NodeId,
        right_id: NodeId,
        parent_id: NodeId,
        separator_idx: usize,
    ) {
        let separator = {
            let parent = self.arena.internal_mut(parent_id);
            parent.children.remove(separator_idx + 1);
            parent.keys.remove(separator_idx)
        };

        let removed = match self.arena.remove(right_id) {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => unreachable!("internal sibling must be internal"),
        };
        let moved: Vec<NodeId> = removed.children.clone();

        {
            let left = self.arena.internal_mut(left_id);
            left.keys.push(separator);
            left.keys.extend(removed.keys);
            left.children.extend(removed.children);
        }
        for child in moved {
            self.arena.node_mut(child).set_parent(Some(left_id));
        }

        self.finish_merge(parent_id);
    }

    /// An internal root left with a single child hands the root role to
    /// that child.
    fn collapse_root(&mut self) {
        let child = match self.arena.node(self.root) {
            Node::Internal(internal)
                if internal.keys.is_empty() && internal.children.len() == 1 =>
            {
                internal.children[0]
            }
            _ => return,
        };

        let old_root = self.root;
        self.root = child;
        self.arena.node_mut(child).set_parent(None);
        self.arena.remove(old_root);
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Counts a completed mutation and fires the automatic checkpoint when
    /// the interval elapses. A failed automatic checkpoint never fails the
    /// user's operation.
    fn note_mutation(&mut self) {
        if self.recovering {
            return;
        }
        self.operation_count += 1;
        if self.checkpoint_interval > 0 && self.operation_count % self.checkpoint_interval == 0 {
            if let Err(e) = self.create_checkpoint() {
                warn!(error = %e, "automatic checkpoint failed");
            }
        }
    }
}

fn check_entry_size(key: &[u8], value: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(BraidError::InvalidArgument(format!(
            "key length {} exceeds maximum {}",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(BraidError::InvalidArgument(format!(
            "value length {} exceeds maximum {}",
            value.len(),
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}

/// Iterator over all entries in ascending key order, walking the leaf
/// chain.
pub struct Iter<'a> {
    tree: &'a BTree,
    leaf: Option<NodeId>,
    idx: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf_id = self.leaf?;
            let leaf = self.tree.arena.leaf(leaf_id);
            if self.idx < leaf.keys.len() {
                let item = (
                    leaf.keys[self.idx].as_ref(),
                    leaf.values[self.idx].as_ref(),
                );
                self.idx += 1;
                return Some(item);
            }
            self.leaf = leaf.next;
            self.idx = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    impl BTree {
        /// Asserts every structural invariant of the tree.
        fn check_invariants(&self) {
            self.check_node(self.root, None, None, None);

            // Merged and collapsed nodes must actually be released.
            assert_eq!(
                self.arena.len(),
                self.count_reachable(self.root),
                "arena holds unreachable nodes"
            );

            // The leaf chain must visit every entry in strictly ascending
            // key order with consistent back-links.
            let mut chain_keys: Vec<Key> = Vec::new();
            let mut prev: Option<NodeId> = None;
            let mut leaf_id = Some(self.leftmost_leaf());
            while let Some(id) = leaf_id {
                let leaf = self.arena.leaf(id);
                assert_eq!(leaf.prev, prev, "leaf chain back-link mismatch");
                chain_keys.extend(leaf.keys.iter().cloned());
                prev = Some(id);
                leaf_id = leaf.next;
            }
            assert!(
                chain_keys.windows(2).all(|w| w[0] < w[1]),
                "leaf chain keys not strictly increasing"
            );
            assert_eq!(chain_keys.len(), self.entry_count, "entry count drift");
        }

        /// Returns the height of the subtree; asserts local invariants.
        fn check_node(
            &self,
            id: NodeId,
            parent: Option<NodeId>,
            lower: Option<&[u8]>,
            upper: Option<&[u8]>,
        ) -> usize {
            let node = self.arena.node(id);
            assert_eq!(node.parent(), parent, "parent back-reference mismatch");

            match node {
                Node::Leaf(leaf) => {
                    assert_eq!(leaf.keys.len(), leaf.values.len());
                    if parent.is_some() {
                        assert!(leaf.keys.len() >= MIN_KEYS, "non-root leaf underfull");
                        assert!(leaf.keys.len() <= MAX_DEGREE - 1, "leaf overfull");
                    }
                    assert!(leaf.keys.windows(2).all(|w| w[0] < w[1]));
                    for key in &leaf.keys {
                        if let Some(lo) = lower {
                            assert!(key.as_ref() >= lo, "leaf key below subtree bound");
                        }
                        if let Some(hi) = upper {
                            assert!(key.as_ref() < hi, "leaf key above subtree bound");
                        }
                    }
                    1
                }
                Node::Internal(internal) => {
                    assert_eq!(internal.children.len(), internal.keys.len() + 1);
                    assert!(!internal.keys.is_empty(), "internal node without separators");
                    // A merge may leave an internal node holding MAX_DEGREE
                    // keys until the next insert splits it.
                    assert!(internal.keys.len() <= MAX_DEGREE, "internal node overfull");
                    assert!(internal.keys.windows(2).all(|w| w[0] < w[1]));

                    let mut depth = None;
                    for (i, &child) in internal.children.iter().enumerate() {
                        let lo = if i == 0 {
                            lower
                        } else {
                            Some(internal.keys[i - 1].as_ref())
                        };
                        let hi = if i == internal.keys.len() {
                            upper
                        } else {
                            Some(internal.keys[i].as_ref())
                        };
                        let child_depth = self.check_node(child, Some(id), lo, hi);
                        match depth {
                            None => depth = Some(child_depth),
                            Some(existing) => {
                                assert_eq!(existing, child_depth, "leaves at unequal depth")
                            }
                        }
                    }
                    depth.expect("internal node has at least one child") + 1
                }
            }
        }

        fn count_reachable(&self, id: NodeId) -> usize {
            match self.arena.node(id) {
                Node::Leaf(_) => 1,
                Node::Internal(internal) => {
                    1 + internal
                        .children
                        .iter()
                        .map(|&child| self.count_reachable(child))
                        .sum::<usize>()
                }
            }
        }

        fn collect(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
            self.iter()
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect()
        }
    }

    fn key(i: usize) -> String {
        format!("key{:04}", i)
    }

    #[test]
    fn test_empty_tree() {
        let tree = BTree::in_memory();
        assert!(tree.is_empty());
        assert_eq!(tree.get(b"anything"), None);
        assert_eq!(tree.iter().count(), 0);
        tree.check_invariants();
    }

    #[test]
    fn test_put_and_get() {
        let mut tree = BTree::in_memory();
        tree.put(b"apple", b"red").unwrap();
        tree.put(b"banana", b"yellow").unwrap();

        assert_eq!(tree.get(b"apple").unwrap().as_ref(), b"red");
        assert_eq!(tree.get(b"banana").unwrap().as_ref(), b"yellow");
        assert_eq!(tree.get(b"cherry"), None);
        assert_eq!(tree.len(), 2);
        tree.check_invariants();
    }

    #[test]
    fn test_put_overwrites_in_place() {
        let mut tree = BTree::in_memory();
        tree.put(b"key", b"v1").unwrap();
        tree.put(b"key", b"v2").unwrap();

        assert_eq!(tree.get(b"key").unwrap().as_ref(), b"v2");
        assert_eq!(tree.len(), 1);
        tree.check_invariants();
    }

    #[test]
    fn test_empty_key_and_empty_value() {
        let mut tree = BTree::in_memory();
        tree.put(b"", b"empty-key").unwrap();
        tree.put(b"k", b"").unwrap();

        assert_eq!(tree.get(b"").unwrap().as_ref(), b"empty-key");
        assert_eq!(tree.get(b"k").unwrap().as_ref(), b"");

        // The empty key sorts before everything else.
        let entries = tree.collect();
        assert_eq!(entries[0].0, b"");
        tree.check_invariants();
    }

    #[test]
    fn test_oversize_key_and_value_rejected() {
        let mut tree = BTree::in_memory();

        let long_key = vec![b'k'; MAX_KEY_SIZE + 1];
        let err = tree.put(&long_key, b"v").unwrap_err();
        assert!(matches!(err, BraidError::InvalidArgument(_)));
        assert_eq!(tree.get(&long_key), None);

        let long_value = vec![b'v'; MAX_VALUE_SIZE + 1];
        let err = tree.put(b"k", &long_value).unwrap_err();
        assert!(matches!(err, BraidError::InvalidArgument(_)));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_update_requires_existing_key() {
        let mut tree = BTree::in_memory();
        assert!(tree.update(b"missing", b"v").unwrap_err().is_not_found());

        tree.put(b"present", b"v1").unwrap();
        tree.update(b"present", b"v2").unwrap();
        assert_eq!(tree.get(b"present").unwrap().as_ref(), b"v2");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_remove_requires_existing_key() {
        let mut tree = BTree::in_memory();
        assert!(tree.remove(b"missing").unwrap_err().is_not_found());

        tree.put(b"present", b"v").unwrap();
        tree.remove(b"present").unwrap();
        assert_eq!(tree.get(b"present"), None);
        assert!(tree.is_empty());
        tree.check_invariants();
    }

    #[test]
    fn test_sequential_inserts_split_correctly() {
        let mut tree = BTree::in_memory();
        for i in 0..200 {
            tree.put(key(i).as_bytes(), b"v").unwrap();
            tree.check_invariants();
        }
        assert_eq!(tree.len(), 200);
        for i in 0..200 {
            assert!(tree.get(key(i).as_bytes()).is_some(), "missing {}", key(i));
        }
    }

    #[test]
    fn test_reverse_inserts_split_correctly() {
        let mut tree = BTree::in_memory();
        for i in (0..100).rev() {
            tree.put(key(i).as_bytes(), b"v").unwrap();
            tree.check_invariants();
        }
        for i in 0..100 {
            assert!(tree.get(key(i).as_bytes()).is_some());
        }

        let entries = tree.collect();
        let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        let mut expected: Vec<Vec<u8>> = (0..100).map(|i| key(i).into_bytes()).collect();
        expected.sort();
        assert_eq!(
            keys,
            expected.iter().map(|k| k.as_slice()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_iterate_all_visits_in_order() {
        let mut tree = BTree::in_memory();
        for i in [5usize, 3, 9, 1, 7, 0, 8, 2, 6, 4] {
            tree.put(key(i).as_bytes(), key(i).as_bytes()).unwrap();
        }

        let mut visited = Vec::new();
        tree.iterate_all(|k, v| {
            assert_eq!(k, v);
            visited.push(k.to_vec());
        });
        let expected: Vec<Vec<u8>> = (0..10).map(|i| key(i).into_bytes()).collect();
        assert_eq!(visited, expected);
    }

    #[test]
    fn test_deletions_rebalance_and_collapse() {
        let mut tree = BTree::in_memory();
        for i in 0..100 {
            tree.put(key(i).as_bytes(), b"v").unwrap();
        }

        // Remove everything, checking structure after each step.
        for i in 0..100 {
            tree.remove(key(i).as_bytes()).unwrap();
            tree.check_invariants();
        }
        assert!(tree.is_empty());

        // The collapsed tree keeps working.
        tree.put(b"again", b"v").unwrap();
        assert_eq!(tree.get(b"again").unwrap().as_ref(), b"v");
        tree.check_invariants();
    }

    #[test]
    fn test_interleaved_deletes_from_both_ends() {
        let mut tree = BTree::in_memory();
        for i in 0..60 {
            tree.put(key(i).as_bytes(), b"v").unwrap();
        }

        let mut lo = 0;
        let mut hi = 59;
        while lo < hi {
            tree.remove(key(lo).as_bytes()).unwrap();
            tree.check_invariants();
            tree.remove(key(hi).as_bytes()).unwrap();
            tree.check_invariants();
            lo += 1;
            hi -= 1;
        }
    }

    #[test]
    fn test_last_write_wins() {
        let mut tree = BTree::in_memory();
        for round in 0..20 {
            tree.put(b"contested", format!("v{}", round).as_bytes())
                .unwrap();
        }
        assert_eq!(tree.get(b"contested").unwrap().as_ref(), b"v19");
    }

    #[test]
    fn test_random_ops_match_model() {
        let mut rng = StdRng::seed_from_u64(0x1DB5EED);
        let mut tree = BTree::in_memory();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for step in 0..3000 {
            let k = key(rng.gen_range(0..120));
            let v = format!("value{}", rng.gen_range(0..1000));

            match rng.gen_range(0..10) {
                0..=4 => {
                    tree.put(k.as_bytes(), v.as_bytes()).unwrap();
                    model.insert(k.clone().into_bytes(), v.into_bytes());
                }
                5..=6 => {
                    let tree_result = tree.update(k.as_bytes(), v.as_bytes());
                    if model.contains_key(k.as_bytes()) {
                        tree_result.unwrap();
                        model.insert(k.clone().into_bytes(), v.into_bytes());
                    } else {
                        assert!(tree_result.unwrap_err().is_not_found());
                    }
                }
                7..=8 => {
                    let tree_result = tree.remove(k.as_bytes());
                    if model.remove(k.as_bytes()).is_some() {
                        tree_result.unwrap();
                    } else {
                        assert!(tree_result.unwrap_err().is_not_found());
                    }
                }
                _ => {
                    let expected = model.get(k.as_bytes());
                    let actual = tree.get(k.as_bytes());
                    assert_eq!(
                        actual.as_ref().map(|v| v.as_ref()),
                        expected.map(|v| v.as_slice())
                    );
                }
            }

            if step % 50 == 0 {
                tree.check_invariants();
            }
            assert_eq!(tree.len(), model.len());
        }

        tree.check_invariants();
        let entries = tree.collect();
        let expected: Vec<(Vec<u8>, Vec<u8>)> =
            model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(entries, expected);
    }

    #[test]
    fn test_in_memory_store_reports_not_durable() {
        let tree = BTree::in_memory();
        assert!(!tree.is_durable());
    }

    #[test]
    fn test_checkpoint_without_wal_is_noop() {
        let mut tree = BTree::in_memory();
        tree.put(b"k", b"v").unwrap();
        tree.create_checkpoint().unwrap();
        assert_eq!(tree.get(b"k").unwrap().as_ref(), b"v");
    }

    #[test]
    fn test_recover_without_wal_is_noop() {
        let mut tree = BTree::in_memory();
        tree.put(b"k", b"v").unwrap();
        tree.recover_from_wal().unwrap();
        assert_eq!(tree.len(), 1);
    }
}
