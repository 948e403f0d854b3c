//! B+Tree operations over a [`BlockFile`].
//!
//! The tree's root block and entry count live in the file header, so a tree
//! is nothing more than a block file plus a key order. [`TreeReader`] borrows
//! the file immutably for lookups and cursors; [`TreeWriter`] borrows it
//! mutably for inserts, updates and removals.
//!
//! Every mutation ends by "settling" the node it touched: an overflowing node
//! is split and the split propagates upward, an underfull non-root node is
//! merged with or refilled from a sibling and the change propagates upward,
//! and an internal root left without keys is replaced by its only child.

use std::cmp::Ordering;

use crate::storage::block::{BlockId, BlockType};
use crate::storage::btree::node::{
    InternalNode, LeafEntry, LeafNode, Node, NodeHeader, data_space, encoded_entry_size,
    key_slot_size, max_entry_size, min_fill,
};
use crate::storage::file::BlockFile;
use crate::storage::io::StorageError;

/// Guard against cycles in corrupted parent/child pointers.
const MAX_DEPTH: usize = 64;

/// Total order over encoded keys.
pub trait KeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Plain byte-wise order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Read-only access to a tree.
pub struct TreeReader<'a, C: KeyComparator> {
    file: &'a BlockFile,
    cmp: &'a C,
}

impl<'a, C: KeyComparator> TreeReader<'a, C> {
    #[must_use]
    pub const fn new(file: &'a BlockFile, cmp: &'a C) -> Self {
        Self { file, cmp }
    }

    /// Root block, or 0 for a tree that was never written.
    #[must_use]
    pub const fn root(&self) -> BlockId {
        self.file.header().root_block
    }

    /// Number of entries in the tree.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.file.header().entry_count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode any node of this tree.
    pub fn read_node(&self, block_id: BlockId) -> Result<Node, StorageError> {
        Node::from_block(block_id, &self.file.read(block_id)?)
    }

    fn read_leaf(&self, block_id: BlockId) -> Result<LeafNode, StorageError> {
        let block = self.file.read_typed(block_id, BlockType::BTreeLeaf)?;
        LeafNode::from_block(block_id, &block)
    }

    /// Descend to a leaf, going right past every separator for which
    /// `goes_right` holds.
    fn descend(
        &self,
        goes_right: impl Fn(&[u8]) -> bool,
    ) -> Result<Option<(BlockId, LeafNode)>, StorageError> {
        let mut block_id = self.root();
        if block_id == 0 {
            return Ok(None);
        }
        for _ in 0..MAX_DEPTH {
            match self.read_node(block_id)? {
                Node::Leaf(leaf) => return Ok(Some((block_id, leaf))),
                Node::Internal(node) => {
                    let idx = node.keys.partition_point(|k| goes_right(k.as_slice()));
                    block_id = *node.children.get(idx).ok_or_else(|| {
                        StorageError::Corruption(format!("node {block_id} is missing child {idx}"))
                    })?;
                }
            }
        }
        Err(StorageError::Corruption(format!(
            "tree deeper than {MAX_DEPTH} levels"
        )))
    }

    /// Find the leaf that holds `key`, or would hold it.
    fn find_leaf(&self, key: &[u8]) -> Result<Option<(BlockId, LeafNode)>, StorageError> {
        self.descend(|sep| self.cmp.compare(sep, key) != Ordering::Greater)
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let Some((_, leaf)) = self.find_leaf(key)? else {
            return Ok(None);
        };
        Ok(leaf
            .entries
            .binary_search_by(|e| self.cmp.compare(&e.key, key))
            .ok()
            .map(|idx| leaf.entries[idx].value.clone()))
    }

    /// Position a cursor between the keys ordered before a bound and the rest.
    ///
    /// `position` reports where a stored key lies relative to the bound. The
    /// cursor's `next_entry` yields the first key not `Less` than the bound;
    /// its `prev_entry` yields the last key that is `Less`.
    pub fn seek(
        &self,
        position: impl Fn(&[u8]) -> Ordering,
    ) -> Result<TreeCursor<'a>, StorageError> {
        let Some((leaf_id, leaf)) = self.descend(|sep| position(sep) == Ordering::Less)? else {
            return Ok(TreeCursor::empty(self.file));
        };
        let gap = leaf
            .entries
            .partition_point(|e| position(e.key.as_slice()) == Ordering::Less);
        Ok(TreeCursor {
            file: self.file,
            leaf_id,
            leaf,
            gap,
        })
    }

    /// Cursor before the smallest key.
    pub fn first(&self) -> Result<TreeCursor<'a>, StorageError> {
        self.seek(|_| Ordering::Greater)
    }

    /// Cursor after the largest key.
    pub fn last(&self) -> Result<TreeCursor<'a>, StorageError> {
        self.seek(|_| Ordering::Less)
    }
}

/// A position between two leaf entries.
///
/// Moving across a leaf boundary follows the sibling links, so a cursor
/// costs one block read per leaf it visits.
pub struct TreeCursor<'a> {
    file: &'a BlockFile,
    leaf_id: BlockId,
    leaf: LeafNode,
    gap: usize,
}

impl<'a> TreeCursor<'a> {
    const fn empty(file: &'a BlockFile) -> Self {
        Self {
            file,
            leaf_id: 0,
            leaf: LeafNode {
                header: NodeHeader {
                    parent: 0,
                    prev: 0,
                    next: 0,
                },
                entries: Vec::new(),
            },
            gap: 0,
        }
    }

    fn load(&mut self, block_id: BlockId) -> Result<(), StorageError> {
        let block = self.file.read_typed(block_id, BlockType::BTreeLeaf)?;
        self.leaf = LeafNode::from_block(block_id, &block)?;
        self.leaf_id = block_id;
        Ok(())
    }

    /// Entry after the cursor; the cursor moves past it.
    pub fn next_entry(&mut self) -> Result<Option<LeafEntry>, StorageError> {
        while self.gap >= self.leaf.entries.len() {
            let next = self.leaf.header.next;
            if next == 0 {
                return Ok(None);
            }
            self.load(next)?;
            self.gap = 0;
        }
        let entry = self.leaf.entries[self.gap].clone();
        self.gap += 1;
        Ok(Some(entry))
    }

    /// Entry before the cursor; the cursor moves before it.
    pub fn prev_entry(&mut self) -> Result<Option<LeafEntry>, StorageError> {
        while self.gap == 0 {
            let prev = self.leaf.header.prev;
            if prev == 0 {
                return Ok(None);
            }
            self.load(prev)?;
            self.gap = self.leaf.entries.len();
        }
        self.gap -= 1;
        Ok(Some(self.leaf.entries[self.gap].clone()))
    }

    /// Leaf the cursor currently sits in (0 for an empty tree).
    #[must_use]
    pub const fn leaf_id(&self) -> BlockId {
        self.leaf_id
    }
}

impl Iterator for TreeCursor<'_> {
    type Item = Result<LeafEntry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// Mutating access to a tree.
pub struct TreeWriter<'a, C: KeyComparator> {
    file: &'a mut BlockFile,
    cmp: &'a C,
}

impl<'a, C: KeyComparator> TreeWriter<'a, C> {
    pub const fn new(file: &'a mut BlockFile, cmp: &'a C) -> Self {
        Self { file, cmp }
    }

    /// Reader over the current (buffered) state.
    #[must_use]
    pub fn reader(&self) -> TreeReader<'_, C> {
        TreeReader::new(&*self.file, self.cmp)
    }

    /// Largest key plus value this tree accepts.
    #[must_use]
    pub const fn max_entry_size(&self) -> usize {
        max_entry_size(self.file.block_size())
    }

    fn check_entry(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let size = encoded_entry_size(key.len(), value.len());
        let max = self.max_entry_size();
        if size > max {
            return Err(StorageError::EntryTooLarge { size, max });
        }
        Ok(())
    }

    /// Insert a new key. Returns `false` and changes nothing if it exists.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<bool, StorageError> {
        self.check_entry(key, value)?;
        let (leaf_id, mut leaf) = self.leaf_for(key)?;
        match leaf
            .entries
            .binary_search_by(|e| self.cmp.compare(&e.key, key))
        {
            Ok(_) => Ok(false),
            Err(pos) => {
                leaf.entries.insert(
                    pos,
                    LeafEntry {
                        key: key.to_vec(),
                        value: value.to_vec(),
                    },
                );
                self.file.header_mut().entry_count += 1;
                self.settle_leaf(leaf_id, leaf)?;
                Ok(true)
            }
        }
    }

    /// Insert or replace, returning the previous value.
    pub fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.check_entry(key, value)?;
        let (leaf_id, mut leaf) = self.leaf_for(key)?;
        match leaf
            .entries
            .binary_search_by(|e| self.cmp.compare(&e.key, key))
        {
            Ok(pos) => {
                let old = std::mem::replace(&mut leaf.entries[pos].value, value.to_vec());
                self.settle_leaf(leaf_id, leaf)?;
                Ok(Some(old))
            }
            Err(pos) => {
                leaf.entries.insert(
                    pos,
                    LeafEntry {
                        key: key.to_vec(),
                        value: value.to_vec(),
                    },
                );
                self.file.header_mut().entry_count += 1;
                self.settle_leaf(leaf_id, leaf)?;
                Ok(None)
            }
        }
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let Some((leaf_id, mut leaf)) = self.reader().find_leaf(key)? else {
            return Ok(None);
        };
        let Ok(pos) = leaf
            .entries
            .binary_search_by(|e| self.cmp.compare(&e.key, key))
        else {
            return Ok(None);
        };
        let removed = leaf.entries.remove(pos);
        let header = self.file.header_mut();
        header.entry_count = header.entry_count.saturating_sub(1);
        self.settle_leaf(leaf_id, leaf)?;
        Ok(Some(removed.value))
    }

    /// Leaf for a key, creating an empty root leaf on first use.
    fn leaf_for(&mut self, key: &[u8]) -> Result<(BlockId, LeafNode), StorageError> {
        if let Some(found) = self.reader().find_leaf(key)? {
            return Ok(found);
        }
        let root = self.file.allocate(BlockType::BTreeLeaf)?;
        let leaf = LeafNode::new(0);
        self.file.write(root, leaf.to_block(self.file.block_size()))?;
        self.file.header_mut().root_block = root;
        Ok((root, leaf))
    }

    fn write_leaf(&mut self, block_id: BlockId, leaf: &LeafNode) -> Result<(), StorageError> {
        let block = leaf.to_block(self.file.block_size());
        self.file.write(block_id, block)
    }

    fn write_internal(
        &mut self,
        block_id: BlockId,
        node: &InternalNode,
    ) -> Result<(), StorageError> {
        let block = node.to_block(self.file.block_size());
        self.file.write(block_id, block)
    }

    fn read_internal(&self, block_id: BlockId) -> Result<InternalNode, StorageError> {
        let block = self.file.read_typed(block_id, BlockType::BTreeInternal)?;
        InternalNode::from_block(block_id, &block)
    }

    fn set_parent(&mut self, child: BlockId, parent: BlockId) -> Result<(), StorageError> {
        let mut node = self.reader().read_node(child)?;
        if node.header().parent != parent {
            node.header_mut().parent = parent;
            let block = node.to_block(self.file.block_size());
            self.file.write(child, block)?;
        }
        Ok(())
    }

    fn set_prev(&mut self, leaf_id: BlockId, prev: BlockId) -> Result<(), StorageError> {
        let mut leaf = self.reader().read_leaf(leaf_id)?;
        leaf.header.prev = prev;
        self.write_leaf(leaf_id, &leaf)
    }

    /// Persist a modified leaf, splitting or rebalancing as needed.
    fn settle_leaf(&mut self, leaf_id: BlockId, mut leaf: LeafNode) -> Result<(), StorageError> {
        let block_size = self.file.block_size();
        let used = leaf.used_bytes();
        if used > data_space(block_size) {
            let mut right = leaf.split();
            let right_id = self.file.allocate(BlockType::BTreeLeaf)?;
            right.header.prev = leaf_id;
            right.header.next = leaf.header.next;
            leaf.header.next = right_id;
            if right.header.next != 0 {
                self.set_prev(right.header.next, right_id)?;
            }
            let separator = right.entries[0].key.clone();
            self.write_leaf(leaf_id, &leaf)?;
            self.write_leaf(right_id, &right)?;
            return self.insert_into_parent(leaf_id, leaf.header.parent, separator, right_id);
        }

        self.write_leaf(leaf_id, &leaf)?;
        if leaf.header.parent != 0 && used < min_fill(block_size) {
            self.rebalance(leaf_id, leaf.header.parent)?;
        }
        Ok(())
    }

    /// Persist a modified internal node, splitting, rebalancing or collapsing
    /// the root as needed.
    fn settle_internal(
        &mut self,
        block_id: BlockId,
        mut node: InternalNode,
    ) -> Result<(), StorageError> {
        let block_size = self.file.block_size();
        let used = node.used_bytes();
        if used > data_space(block_size) {
            let (median, right) = node.split();
            let right_id = self.file.allocate(BlockType::BTreeInternal)?;
            self.write_internal(block_id, &node)?;
            self.write_internal(right_id, &right)?;
            for child in &right.children {
                self.set_parent(*child, right_id)?;
            }
            return self.insert_into_parent(block_id, node.header.parent, median, right_id);
        }

        if node.header.parent == 0 {
            if node.keys.is_empty() {
                let child = node.children.first().copied().ok_or_else(|| {
                    StorageError::Corruption(format!("root {block_id} has no children"))
                })?;
                self.set_parent(child, 0)?;
                self.file.header_mut().root_block = child;
                return self.file.free(block_id);
            }
            return self.write_internal(block_id, &node);
        }

        self.write_internal(block_id, &node)?;
        if used < min_fill(block_size) {
            self.rebalance(block_id, node.header.parent)?;
        }
        Ok(())
    }

    fn insert_into_parent(
        &mut self,
        left: BlockId,
        parent_id: BlockId,
        separator: Vec<u8>,
        right: BlockId,
    ) -> Result<(), StorageError> {
        if parent_id == 0 {
            let root_id = self.file.allocate(BlockType::BTreeInternal)?;
            let root = InternalNode::with_children(left, separator, right);
            self.write_internal(root_id, &root)?;
            self.set_parent(left, root_id)?;
            self.set_parent(right, root_id)?;
            self.file.header_mut().root_block = root_id;
            return Ok(());
        }

        let mut parent = self.read_internal(parent_id)?;
        parent.insert_after(left, separator, right);
        self.set_parent(right, parent_id)?;
        self.settle_internal(parent_id, parent)
    }

    /// Merge an underfull node with a sibling, or move entries over from it.
    fn rebalance(&mut self, block_id: BlockId, parent_id: BlockId) -> Result<(), StorageError> {
        let mut parent = self.read_internal(parent_id)?;
        let idx = parent.child_index(block_id).ok_or_else(|| {
            StorageError::Corruption(format!("node {block_id} missing from parent {parent_id}"))
        })?;
        let left_idx = if idx + 1 < parent.children.len() {
            idx
        } else if idx > 0 {
            idx - 1
        } else {
            // Only child of a non-root parent; the parent fixes this itself.
            return Ok(());
        };
        let left_id = parent.children[left_idx];
        let right_id = parent.children[left_idx + 1];
        let space = data_space(self.file.block_size());

        let reader = self.reader();
        match (reader.read_node(left_id)?, reader.read_node(right_id)?) {
            (Node::Leaf(mut left), Node::Leaf(mut right)) => {
                if left.used_bytes() + right.used_bytes() <= space {
                    left.entries.append(&mut right.entries);
                    left.header.next = right.header.next;
                    if left.header.next != 0 {
                        self.set_prev(left.header.next, left_id)?;
                    }
                    self.write_leaf(left_id, &left)?;
                    self.file.free(right_id)?;
                    parent.keys.remove(left_idx);
                    parent.children.remove(left_idx + 1);
                } else {
                    left.entries.append(&mut right.entries);
                    right.entries = left.split().entries;
                    parent.keys[left_idx] = right.entries[0].key.clone();
                    self.write_leaf(left_id, &left)?;
                    self.write_leaf(right_id, &right)?;
                }
            }
            (Node::Internal(mut left), Node::Internal(mut right)) => {
                let separator = parent.keys[left_idx].clone();
                let merged = left.used_bytes() + right.used_bytes() - 4
                    + key_slot_size(separator.len());
                if merged <= space {
                    for child in &right.children {
                        self.set_parent(*child, left_id)?;
                    }
                    left.keys.push(separator);
                    left.keys.append(&mut right.keys);
                    left.children.append(&mut right.children);
                    self.write_internal(left_id, &left)?;
                    self.file.free(right_id)?;
                    parent.keys.remove(left_idx);
                    parent.children.remove(left_idx + 1);
                } else {
                    let old_left_children = left.children.len();
                    left.keys.push(separator);
                    left.keys.append(&mut right.keys);
                    left.children.append(&mut right.children);
                    let (median, moved) = left.split();
                    right.keys = moved.keys;
                    right.children = moved.children;
                    if left.children.len() > old_left_children {
                        for &child in &left.children[old_left_children..] {
                            self.set_parent(child, left_id)?;
                        }
                    } else {
                        let count = old_left_children - left.children.len();
                        for &child in &right.children[..count] {
                            self.set_parent(child, right_id)?;
                        }
                    }
                    parent.keys[left_idx] = median;
                    self.write_internal(left_id, &left)?;
                    self.write_internal(right_id, &right)?;
                }
            }
            _ => {
                return Err(StorageError::Corruption(format!(
                    "siblings {left_id} and {right_id} are at different depths"
                )));
            }
        }
        self.settle_internal(parent_id, parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::header::FileKind;
    use crate::storage::memory::MemoryDevice;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn memory_file(block_size: usize) -> BlockFile {
        BlockFile::create(
            Box::new(MemoryDevice::new()),
            FileKind::Objects,
            block_size,
            Vec::new(),
        )
        .expect("create file")
    }

    fn key(n: u32) -> [u8; 4] {
        n.to_be_bytes()
    }

    fn collect(file: &BlockFile) -> Vec<Vec<u8>> {
        TreeReader::new(file, &BytewiseComparator)
            .first()
            .expect("cursor")
            .map(|e| e.expect("entry").key)
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let file = memory_file(1024);
        let reader = TreeReader::new(&file, &BytewiseComparator);
        assert_eq!(reader.get(b"x").expect("get"), None);
        assert!(reader.first().expect("cursor").next_entry().expect("next").is_none());
        assert!(reader.is_empty());
    }

    #[test]
    fn test_insert_get_remove() {
        let mut file = memory_file(1024);
        let mut tree = TreeWriter::new(&mut file, &BytewiseComparator);
        assert!(tree.insert(b"b", b"2").expect("insert"));
        assert!(tree.insert(b"a", b"1").expect("insert"));
        assert!(!tree.insert(b"a", b"9").expect("duplicate"));
        assert_eq!(tree.reader().get(b"a").expect("get"), Some(b"1".to_vec()));
        assert_eq!(tree.upsert(b"a", b"3").expect("upsert"), Some(b"1".to_vec()));
        assert_eq!(tree.remove(b"b").expect("remove"), Some(b"2".to_vec()));
        assert_eq!(tree.remove(b"b").expect("remove"), None);
        assert_eq!(tree.reader().len(), 1);
    }

    #[test]
    fn test_entry_too_large() {
        let mut file = memory_file(1024);
        let mut tree = TreeWriter::new(&mut file, &BytewiseComparator);
        let big = vec![0u8; 2000];
        assert!(matches!(
            tree.insert(b"k", &big),
            Err(StorageError::EntryTooLarge { .. })
        ));
    }

    #[test]
    fn test_many_inserts_stay_ordered() {
        let mut file = memory_file(1024);
        let mut keys: Vec<u32> = (0..2000).collect();
        keys.shuffle(&mut StdRng::seed_from_u64(3));
        {
            let mut tree = TreeWriter::new(&mut file, &BytewiseComparator);
            for k in &keys {
                tree.insert(&key(*k), &[7u8; 20]).expect("insert");
            }
        }
        let stored = collect(&file);
        assert_eq!(stored.len(), 2000);
        assert!(stored.windows(2).all(|w| w[0] < w[1]));
        assert!(file.header().root_block != 0);
    }

    #[test]
    fn test_remove_everything_collapses_tree() {
        let mut file = memory_file(1024);
        let mut rng = StdRng::seed_from_u64(11);
        let mut keys: Vec<u32> = (0..1500).collect();
        {
            let mut tree = TreeWriter::new(&mut file, &BytewiseComparator);
            for k in &keys {
                let len = rng.random_range(0..60);
                tree.insert(&key(*k), &vec![1u8; len]).expect("insert");
            }
            keys.shuffle(&mut rng);
            for k in &keys {
                assert!(tree.remove(&key(*k)).expect("remove").is_some());
            }
        }
        assert!(collect(&file).is_empty());
        let root = file.header().root_block;
        assert!(matches!(
            TreeReader::new(&file, &BytewiseComparator)
                .read_node(root)
                .expect("root"),
            Node::Leaf(_)
        ));
        // Everything except the root leaf went back to the free list.
        assert_eq!(file.free_blocks().expect("free list").len() as u32 + 2, file.block_count());
    }

    #[test]
    fn test_upsert_growth_and_shrink() {
        let mut file = memory_file(1024);
        let mut tree = TreeWriter::new(&mut file, &BytewiseComparator);
        for k in 0..300 {
            tree.insert(&key(k), &[0u8; 8]).expect("insert");
        }
        for k in 0..300 {
            tree.upsert(&key(k), &[1u8; 100]).expect("grow");
        }
        for k in 0..300 {
            tree.upsert(&key(k), &[]).expect("shrink");
        }
        assert_eq!(tree.reader().len(), 300);
        assert_eq!(tree.reader().get(&key(150)).expect("get"), Some(Vec::new()));
    }

    #[test]
    fn test_seek_and_reverse() {
        let mut file = memory_file(1024);
        {
            let mut tree = TreeWriter::new(&mut file, &BytewiseComparator);
            for k in (0..1000).map(|k| k * 2) {
                tree.insert(&key(k), b"").expect("insert");
            }
        }
        let reader = TreeReader::new(&file, &BytewiseComparator);
        let bound = key(501);
        let mut cursor = reader.seek(|k| k.cmp(&bound[..])).expect("seek");
        assert_eq!(cursor.next_entry().expect("next").expect("some").key, key(502));
        let mut cursor = reader.seek(|k| k.cmp(&bound[..])).expect("seek");
        assert_eq!(cursor.prev_entry().expect("prev").expect("some").key, key(500));

        let mut cursor = reader.last().expect("last");
        let mut count = 0;
        let mut previous: Option<Vec<u8>> = None;
        while let Some(entry) = cursor.prev_entry().expect("prev") {
            if let Some(p) = &previous {
                assert!(entry.key < *p);
            }
            previous = Some(entry.key);
            count += 1;
        }
        assert_eq!(count, 1000);
    }
}
