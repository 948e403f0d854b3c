//! Structural verification of trees, BLOB chains and free lists.
//!
//! Checks are read-only and collect every problem they find instead of
//! stopping at the first one. A clean file satisfies:
//!
//! - Keys strictly increase across the leaf chain and stay within the
//!   separators of every ancestor
//! - Every non-root node is between the minimum fill and the block capacity
//! - All leaves sit at the same depth
//! - Parent pointers and leaf sibling links agree with the tree shape
//! - Every block other than the header is reachable from exactly one place:
//!   the tree, a BLOB chain, or the free list

use std::collections::HashSet;
use std::fmt;

use crate::codec::BlobPointer;
use crate::storage::blob::blob_blocks;
use crate::storage::block::BlockId;
use crate::storage::btree::{
    KeyComparator, LeafEntry, Node, NodeHeader, TreeReader, data_space, min_fill,
};
use crate::storage::file::BlockFile;

/// Result of verifying one collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub collection: String,
    pub objects: u64,
    pub blobs: u64,
    /// Entry count per index, by file stem.
    pub indices: Vec<(String, u64)>,
    pub problems: Vec<String>,
}

impl IntegrityReport {
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Whether no problem was found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: {} objects, {} BLOBs",
            self.collection, self.objects, self.blobs
        )?;
        for (stem, count) in &self.indices {
            writeln!(f, "  index {stem}: {count} entries")?;
        }
        if self.problems.is_empty() {
            write!(f, "  ok")
        } else {
            for problem in &self.problems {
                writeln!(f, "  problem: {problem}")?;
            }
            write!(f, "  {} problem(s)", self.problems.len())
        }
    }
}

/// Walk a whole tree, handing every leaf entry to `on_entry` in key order.
///
/// Returns the blocks the tree occupies.
pub fn check_tree<C: KeyComparator>(
    file: &BlockFile,
    cmp: &C,
    label: &str,
    problems: &mut Vec<String>,
    on_entry: &mut dyn FnMut(&LeafEntry),
) -> HashSet<BlockId> {
    let mut walk = TreeWalk {
        reader: TreeReader::new(file, cmp),
        cmp,
        label,
        block_size: file.block_size(),
        problems,
        reachable: HashSet::new(),
        leaf_depth: None,
        leaves: Vec::new(),
        last_key: None,
        entries: 0,
        on_entry,
    };

    let root = file.header().root_block;
    if root != 0 {
        walk.visit(root, 0, 0, None, None);
    }
    walk.check_leaf_links();

    let counted = file.header().entry_count;
    if walk.entries != counted {
        walk.problems.push(format!(
            "{label}: header counts {counted} entries, tree holds {}",
            walk.entries
        ));
    }
    walk.reachable
}

struct TreeWalk<'a, 'p, C: KeyComparator> {
    reader: TreeReader<'a, C>,
    cmp: &'a C,
    label: &'a str,
    block_size: usize,
    problems: &'p mut Vec<String>,
    reachable: HashSet<BlockId>,
    leaf_depth: Option<usize>,
    leaves: Vec<(BlockId, NodeHeader)>,
    last_key: Option<Vec<u8>>,
    entries: u64,
    on_entry: &'p mut dyn FnMut(&LeafEntry),
}

impl<C: KeyComparator> TreeWalk<'_, '_, C> {
    fn problem(&mut self, message: String) {
        self.problems.push(format!("{}: {message}", self.label));
    }

    fn visit(
        &mut self,
        block_id: BlockId,
        parent: BlockId,
        depth: usize,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) {
        if !self.reachable.insert(block_id) {
            self.problem(format!("block {block_id} is referenced more than once"));
            return;
        }
        let node = match self.reader.read_node(block_id) {
            Ok(node) => node,
            Err(e) => {
                self.problem(format!("block {block_id} is unreadable: {e}"));
                return;
            }
        };

        if node.header().parent != parent {
            self.problem(format!(
                "block {block_id} points to parent {}, expected {parent}",
                node.header().parent
            ));
        }
        let used = node.used_bytes();
        if used > data_space(self.block_size) {
            self.problem(format!("block {block_id} overflows with {used} bytes"));
        }
        if parent != 0 && used < min_fill(self.block_size) {
            self.problem(format!("block {block_id} is underfull with {used} bytes"));
        }

        match node {
            Node::Leaf(leaf) => {
                match self.leaf_depth {
                    None => self.leaf_depth = Some(depth),
                    Some(d) if d != depth => self.problem(format!(
                        "leaf {block_id} at depth {depth}, other leaves at {d}"
                    )),
                    Some(_) => {}
                }
                if parent != 0 && leaf.entries.is_empty() {
                    self.problem(format!("leaf {block_id} is empty"));
                }
                for entry in &leaf.entries {
                    self.check_key(block_id, &entry.key, lower, upper);
                    self.entries += 1;
                    (self.on_entry)(entry);
                }
                self.leaves.push((block_id, leaf.header));
            }
            Node::Internal(node) => {
                if node.children.len() != node.keys.len() + 1 {
                    self.problem(format!(
                        "internal {block_id} has {} keys and {} children",
                        node.keys.len(),
                        node.children.len()
                    ));
                    return;
                }
                if parent == 0 && node.keys.is_empty() {
                    self.problem(format!("root {block_id} has a single child"));
                }
                for (i, &child) in node.children.iter().enumerate() {
                    let child_lower = if i == 0 {
                        lower
                    } else {
                        Some(node.keys[i - 1].as_slice())
                    };
                    let child_upper = node.keys.get(i).map(Vec::as_slice).or(upper);
                    self.visit(child, block_id, depth + 1, child_lower, child_upper);
                }
            }
        }
    }

    fn check_key(
        &mut self,
        block_id: BlockId,
        key: &[u8],
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) {
        if let Some(last) = &self.last_key
            && self.cmp.compare(last, key).is_ge()
        {
            self.problem(format!("leaf {block_id} breaks key order"));
        }
        if lower.is_some_and(|l| self.cmp.compare(key, l).is_lt()) {
            self.problem(format!("leaf {block_id} holds a key below its separator"));
        }
        if upper.is_some_and(|u| self.cmp.compare(key, u).is_ge()) {
            self.problem(format!("leaf {block_id} holds a key above its separator"));
        }
        self.last_key = Some(key.to_vec());
    }

    fn check_leaf_links(&mut self) {
        let leaves = std::mem::take(&mut self.leaves);
        for (i, (block_id, header)) in leaves.iter().enumerate() {
            let expected_prev = if i == 0 { 0 } else { leaves[i - 1].0 };
            let expected_next = leaves.get(i + 1).map_or(0, |l| l.0);
            if header.prev != expected_prev {
                self.problem(format!(
                    "leaf {block_id} links back to {}, expected {expected_prev}",
                    header.prev
                ));
            }
            if header.next != expected_next {
                self.problem(format!(
                    "leaf {block_id} links forward to {}, expected {expected_next}",
                    header.next
                ));
            }
        }
    }
}

/// Collect the blocks of every BLOB chain, reporting broken or shared chains.
pub fn check_blobs(
    file: &BlockFile,
    pointers: &[BlobPointer],
    problems: &mut Vec<String>,
) -> HashSet<BlockId> {
    let mut reachable = HashSet::new();
    for ptr in pointers {
        match blob_blocks(file, *ptr) {
            Ok(blocks) => {
                for block_id in blocks {
                    if !reachable.insert(block_id) {
                        problems.push(format!(
                            "blobs: block {block_id} belongs to more than one BLOB"
                        ));
                    }
                }
            }
            Err(e) => problems.push(format!(
                "blobs: chain at block {} is broken: {e}",
                ptr.first_block
            )),
        }
    }

    let counted = file.header().entry_count;
    if counted != pointers.len() as u64 {
        problems.push(format!(
            "blobs: header counts {counted} BLOBs, records reference {}",
            pointers.len()
        ));
    }
    reachable
}

/// Check that every block is either in use or free, never both or neither.
pub fn check_block_accounting(
    file: &BlockFile,
    label: &str,
    in_use: &HashSet<BlockId>,
    problems: &mut Vec<String>,
) {
    let free = match file.free_blocks() {
        Ok(free) => free,
        Err(e) => {
            problems.push(format!("{label}: free list is broken: {e}"));
            return;
        }
    };
    if free.len() != file.header().free_count as usize {
        problems.push(format!(
            "{label}: header counts {} free blocks, list holds {}",
            file.header().free_count,
            free.len()
        ));
    }

    let free: HashSet<BlockId> = free.into_iter().collect();
    for block_id in 1..file.block_count() {
        match (in_use.contains(&block_id), free.contains(&block_id)) {
            (true, true) => problems.push(format!("{label}: block {block_id} is in use and free")),
            (false, false) => problems.push(format!("{label}: block {block_id} is orphaned")),
            _ => {}
        }
    }
}
