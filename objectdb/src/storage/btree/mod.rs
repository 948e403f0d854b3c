//! Disk-based B+Tree shared by the primary object file and the index files.
//!
//! # Structure
//!
//! - Internal nodes: separator keys and child block pointers
//! - Leaf nodes: key-value entries, doubly linked for range scans
//!
//! Keys and values are opaque byte strings. Ordering is supplied by a
//! [`KeyComparator`]: the primary file orders raw object identifiers, the
//! index files order decoded field tuples.

mod node;
mod tree;

pub use node::{
    DATA_OFFSET, InternalNode, LeafEntry, LeafNode, Node, NodeHeader, data_space,
    encoded_entry_size, max_entry_size, min_fill,
};
pub use tree::{BytewiseComparator, KeyComparator, TreeCursor, TreeReader, TreeWriter};
