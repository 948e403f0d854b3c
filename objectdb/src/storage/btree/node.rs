//! B+Tree node types and serialization.
//!
//! Nodes hold variable-length keys and values. Fill is measured in bytes,
//! not entries, so every size rule below is in bytes of node data.
//!
//! ```text
//! +--------------+-----------+------------+----------+----------+
//! | Block Header | Count (2) | Parent (4) | Prev (4) | Next (4) |
//! +--------------+-----------+------------+----------+----------+
//!
//! Leaf data:     (key_len u16, key, value_len u16, value)*
//! Internal data: child0 u32, (key_len u16, key, child u32)*
//! ```
//!
//! Internal node `children[i]` holds keys in `[keys[i-1], keys[i])`.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::block::{BLOCK_HEADER_SIZE, Block, BlockId, BlockType};
use crate::storage::io::StorageError;

/// Size of the node header that follows the block header.
pub const NODE_HEADER_SIZE: usize = 14;

/// Offset where node data starts.
pub const DATA_OFFSET: usize = BLOCK_HEADER_SIZE + NODE_HEADER_SIZE;

const COUNT_OFFSET: usize = BLOCK_HEADER_SIZE;
const PARENT_OFFSET: usize = BLOCK_HEADER_SIZE + 2;
const PREV_OFFSET: usize = BLOCK_HEADER_SIZE + 6;
const NEXT_OFFSET: usize = BLOCK_HEADER_SIZE + 10;

/// Bytes available for node data.
#[must_use]
pub const fn data_space(block_size: usize) -> usize {
    block_size - DATA_OFFSET
}

/// Largest encoded leaf entry (key, value and both length prefixes).
///
/// Keeping entries at most an eighth of a node guarantees that both halves
/// of a split, and both sides of a redistribution, stay above
/// [`min_fill`].
#[must_use]
pub const fn max_entry_size(block_size: usize) -> usize {
    data_space(block_size) / 8 - 8
}

/// Fill below which a non-root node is rebalanced.
#[must_use]
pub const fn min_fill(block_size: usize) -> usize {
    data_space(block_size) / 4
}

/// Header fields shared by both node kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeHeader {
    pub parent: BlockId,
    /// Previous leaf in key order (leaves only).
    pub prev: BlockId,
    /// Next leaf in key order (leaves only).
    pub next: BlockId,
}

impl NodeHeader {
    fn read(block: &Block) -> (u16, Self) {
        (
            block.read_u16(COUNT_OFFSET),
            Self {
                parent: block.read_u32(PARENT_OFFSET),
                prev: block.read_u32(PREV_OFFSET),
                next: block.read_u32(NEXT_OFFSET),
            },
        )
    }

    fn write(&self, block: &mut Block, count: usize) {
        block.write_u16(COUNT_OFFSET, count as u16);
        block.write_u32(PARENT_OFFSET, self.parent);
        block.write_u32(PREV_OFFSET, self.prev);
        block.write_u32(NEXT_OFFSET, self.next);
    }
}

/// A decoded node of either kind.
#[derive(Debug, Clone)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    /// Decode a tree node, checking its block type.
    pub fn from_block(block_id: BlockId, block: &Block) -> Result<Self, StorageError> {
        match block.block_type() {
            Some(BlockType::BTreeLeaf) => LeafNode::from_block(block_id, block).map(Self::Leaf),
            Some(BlockType::BTreeInternal) => {
                InternalNode::from_block(block_id, block).map(Self::Internal)
            }
            _ => Err(StorageError::UnexpectedBlockType {
                block_id,
                found: block.raw_type(),
            }),
        }
    }

    #[must_use]
    pub const fn header(&self) -> &NodeHeader {
        match self {
            Self::Leaf(leaf) => &leaf.header,
            Self::Internal(node) => &node.header,
        }
    }

    pub const fn header_mut(&mut self) -> &mut NodeHeader {
        match self {
            Self::Leaf(leaf) => &mut leaf.header,
            Self::Internal(node) => &mut node.header,
        }
    }

    #[must_use]
    pub fn used_bytes(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.used_bytes(),
            Self::Internal(node) => node.used_bytes(),
        }
    }

    #[must_use]
    pub fn to_block(&self, block_size: usize) -> Block {
        match self {
            Self::Leaf(leaf) => leaf.to_block(block_size),
            Self::Internal(node) => node.to_block(block_size),
        }
    }
}

/// A key-value pair stored in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl LeafEntry {
    /// Encoded size including both length prefixes.
    #[must_use]
    pub fn size(&self) -> usize {
        encoded_entry_size(self.key.len(), self.value.len())
    }
}

/// Encoded leaf entry size for a key and value length.
#[must_use]
pub const fn encoded_entry_size(key_len: usize, value_len: usize) -> usize {
    4 + key_len + value_len
}

/// A leaf node: sorted entries plus sibling links.
#[derive(Debug, Clone, Default)]
pub struct LeafNode {
    pub header: NodeHeader,
    pub entries: Vec<LeafEntry>,
}

impl LeafNode {
    #[must_use]
    pub fn new(parent: BlockId) -> Self {
        Self {
            header: NodeHeader {
                parent,
                ..NodeHeader::default()
            },
            entries: Vec::new(),
        }
    }

    /// Decode a leaf from its block.
    pub fn from_block(block_id: BlockId, block: &Block) -> Result<Self, StorageError> {
        let (count, header) = NodeHeader::read(block);
        let mut slicer = Slicer::new(block_id, block);
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key = slicer.take_prefixed()?;
            let value = slicer.take_prefixed()?;
            entries.push(LeafEntry { key, value });
        }
        Ok(Self { header, entries })
    }

    /// Encode the leaf into a fresh block.
    #[must_use]
    pub fn to_block(&self, block_size: usize) -> Block {
        let mut block = Block::with_type(block_size, BlockType::BTreeLeaf);
        self.header.write(&mut block, self.entries.len());
        let mut offset = DATA_OFFSET;
        for entry in &self.entries {
            offset = put_prefixed(&mut block, offset, &entry.key);
            offset = put_prefixed(&mut block, offset, &entry.value);
        }
        block
    }

    /// Bytes of node data in use.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.entries.iter().map(LeafEntry::size).sum()
    }

    /// Split off the upper part, returning it. The separator is the first key
    /// of the returned node.
    #[must_use]
    pub fn split(&mut self) -> Self {
        let sizes: Vec<usize> = self.entries.iter().map(LeafEntry::size).collect();
        let at = split_point(&sizes);
        Self {
            header: NodeHeader {
                parent: self.header.parent,
                ..NodeHeader::default()
            },
            entries: self.entries.split_off(at),
        }
    }
}

/// An internal node: `keys.len() + 1` children routed by separator keys.
#[derive(Debug, Clone, Default)]
pub struct InternalNode {
    pub header: NodeHeader,
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<BlockId>,
}

impl InternalNode {
    /// Create a root over two children.
    #[must_use]
    pub fn with_children(left: BlockId, key: Vec<u8>, right: BlockId) -> Self {
        Self {
            header: NodeHeader::default(),
            keys: vec![key],
            children: vec![left, right],
        }
    }

    /// Decode an internal node from its block.
    pub fn from_block(block_id: BlockId, block: &Block) -> Result<Self, StorageError> {
        let (count, header) = NodeHeader::read(block);
        let mut slicer = Slicer::new(block_id, block);
        let mut keys = Vec::with_capacity(count as usize);
        let mut children = Vec::with_capacity(count as usize + 1);
        children.push(slicer.take_u32()?);
        for _ in 0..count {
            keys.push(slicer.take_prefixed()?);
            children.push(slicer.take_u32()?);
        }
        Ok(Self {
            header,
            keys,
            children,
        })
    }

    /// Encode the node into a fresh block.
    #[must_use]
    pub fn to_block(&self, block_size: usize) -> Block {
        let mut block = Block::with_type(block_size, BlockType::BTreeInternal);
        self.header.write(&mut block, self.keys.len());
        let mut offset = DATA_OFFSET;
        block.write_u32(offset, self.children.first().copied().unwrap_or(0));
        offset += 4;
        for (key, child) in self.keys.iter().zip(self.children.iter().skip(1)) {
            offset = put_prefixed(&mut block, offset, key);
            block.write_u32(offset, *child);
            offset += 4;
        }
        block
    }

    /// Bytes of node data in use.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        4 + self.keys.iter().map(|k| key_slot_size(k.len())).sum::<usize>()
    }

    /// Position of a child pointer.
    #[must_use]
    pub fn child_index(&self, child: BlockId) -> Option<usize> {
        self.children.iter().position(|c| *c == child)
    }

    /// Insert a separator and the child to its right.
    pub fn insert_after(&mut self, left_child: BlockId, key: Vec<u8>, right_child: BlockId) {
        let idx = self.child_index(left_child).unwrap_or(self.keys.len());
        self.keys.insert(idx, key);
        self.children.insert(idx + 1, right_child);
    }

    /// Split around a median key which moves up to the parent.
    ///
    /// Returns `(median, right)`.
    #[must_use]
    pub fn split(&mut self) -> (Vec<u8>, Self) {
        let sizes: Vec<usize> = self.keys.iter().map(|k| key_slot_size(k.len())).collect();
        // The median leaves this node entirely, so both sides keep a key.
        let at = split_point(&sizes).min(self.keys.len().saturating_sub(2)).max(1);
        let right_keys = self.keys.split_off(at + 1);
        let right_children = self.children.split_off(at + 1);
        let median = self.keys.pop().unwrap_or_default();
        (
            median,
            Self {
                header: NodeHeader {
                    parent: self.header.parent,
                    ..NodeHeader::default()
                },
                keys: right_keys,
                children: right_children,
            },
        )
    }
}

/// Size of one separator slot in an internal node.
#[must_use]
pub const fn key_slot_size(key_len: usize) -> usize {
    2 + key_len + 4
}

/// First index at which the running total reaches half of the whole.
///
/// Always leaves at least one item on each side when there are two or more.
fn split_point(sizes: &[usize]) -> usize {
    let total: usize = sizes.iter().sum();
    let mut running = 0;
    for (i, size) in sizes.iter().enumerate() {
        running += size;
        if running * 2 >= total {
            return (i + 1).clamp(1, sizes.len().saturating_sub(1).max(1));
        }
    }
    sizes.len().saturating_sub(1).max(1)
}

fn put_prefixed(block: &mut Block, offset: usize, bytes: &[u8]) -> usize {
    block.write_u16(offset, bytes.len() as u16);
    block.write_bytes(offset + 2, bytes);
    offset + 2 + bytes.len()
}

/// Bounds-checked reader over node data.
struct Slicer<'a> {
    block_id: BlockId,
    block: &'a Block,
    offset: usize,
}

impl<'a> Slicer<'a> {
    const fn new(block_id: BlockId, block: &'a Block) -> Self {
        Self {
            block_id,
            block,
            offset: DATA_OFFSET,
        }
    }

    fn ensure(&self, len: usize) -> Result<(), StorageError> {
        if self.offset + len > self.block.size() {
            return Err(StorageError::Corruption(format!(
                "node {} overruns its block",
                self.block_id
            )));
        }
        Ok(())
    }

    fn take_u32(&mut self) -> Result<u32, StorageError> {
        self.ensure(4)?;
        let v = self.block.read_u32(self.offset);
        self.offset += 4;
        Ok(v)
    }

    fn take_prefixed(&mut self) -> Result<Vec<u8>, StorageError> {
        self.ensure(2)?;
        let len = self.block.read_u16(self.offset) as usize;
        self.offset += 2;
        self.ensure(len)?;
        let bytes = self.block.read_bytes(self.offset, len).to_vec();
        self.offset += len;
        Ok(bytes)
    }
}
