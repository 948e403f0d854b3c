//! Block file: block allocation, free list and buffered writes.
//!
//! A [`BlockFile`] wraps a [`BlockDevice`] and exposes fixed-size blocks.
//! Writes and header changes are buffered in memory until [`BlockFile::flush`]
//! persists them, or [`BlockFile::discard`] drops them. Callers group all the
//! block writes of one logical operation between two flushes, so a failed
//! operation never leaves a partially applied change on the device.
//!
//! [`BlockFile::flush_logged`] also returns a [`FlushUndo`] holding the
//! before-images of every overwritten block. An operation spanning several
//! files keeps the undo of each flushed file until the last one succeeds,
//! and rolls the flushed ones back otherwise:
//!
//! ```text
//! flush_logged(A) ── ok ──► flush_logged(B) ── err ──► roll_back(A)
//! ```
//!
//! Freed blocks are chained through their first payload word:
//!
//! ```text
//! +--------------+---------------+
//! | Block Header | Next Free (4) |
//! +--------------+---------------+
//! ```

use std::collections::BTreeMap;

use tracing::{debug, error, warn};

use crate::storage::block::{BLOCK_HEADER_SIZE, Block, BlockId, BlockType, MIN_BLOCK_SIZE};
use crate::storage::header::{FileHeader, FileKind};
use crate::storage::io::{BlockDevice, StorageError};

/// Offset of the next-free pointer inside a free block.
const FREE_NEXT_OFFSET: usize = BLOCK_HEADER_SIZE;

/// Device state replaced by one flush.
#[derive(Debug)]
pub struct FlushUndo {
    /// Header as persisted before the flush.
    header: FileHeader,
    /// Device length before the flush.
    len: u64,
    /// Previous bytes of every overwritten block.
    blocks: Vec<(BlockId, Vec<u8>)>,
}

/// A file of fixed-size blocks with a free list and write buffering.
pub struct BlockFile {
    device: Box<dyn BlockDevice>,
    header: FileHeader,
    /// Header as last persisted.
    committed: FileHeader,
    /// Blocks written since the last flush.
    dirty: BTreeMap<BlockId, Block>,
}

impl BlockFile {
    /// Initialize a new file on an empty device.
    pub fn create(
        mut device: Box<dyn BlockDevice>,
        kind: FileKind,
        block_size: usize,
        definition: Vec<u8>,
    ) -> Result<Self, StorageError> {
        if !device.is_empty()? {
            return Err(StorageError::InvalidHeader(
                "device is not empty".to_string(),
            ));
        }

        let block_size = u32::try_from(block_size)
            .map_err(|_| StorageError::InvalidHeader(format!("block size {block_size}")))?;
        let header = FileHeader::new(kind, block_size, definition);
        let block = header.to_block()?;

        device.set_len(u64::from(block_size))?;
        device.write_at(0, block.as_bytes())?;
        device.sync()?;

        debug!(?kind, block_size, "created block file");

        Ok(Self {
            device,
            committed: header.clone(),
            header,
            dirty: BTreeMap::new(),
        })
    }

    /// Open an existing file and validate its header.
    pub fn open(device: Box<dyn BlockDevice>, kind: FileKind) -> Result<Self, StorageError> {
        let mut prefix = vec![0u8; MIN_BLOCK_SIZE];
        device.read_at(0, &mut prefix)?;
        let block_size = FileHeader::peek_block_size(&prefix)?;

        let mut buf = vec![0u8; block_size];
        device.read_at(0, &mut buf)?;
        let block = Block::from_vec(buf);
        verify_checksum(0, &block)?;

        let header = FileHeader::from_block(&block)?;
        if header.kind != kind {
            return Err(StorageError::InvalidHeader(format!(
                "expected {kind:?} file, found {:?}",
                header.kind
            )));
        }

        let expected_len = u64::from(header.block_count) * block_size as u64;
        let actual_len = device.len()?;
        if actual_len < expected_len {
            warn!(expected_len, actual_len, "block file shorter than header claims");
            return Err(StorageError::Corruption(format!(
                "file holds {actual_len} bytes, header claims {expected_len}"
            )));
        }

        debug!(?kind, block_size, blocks = header.block_count, "opened block file");

        Ok(Self {
            device,
            committed: header.clone(),
            header,
            dirty: BTreeMap::new(),
        })
    }

    /// Get a reference to the header (including buffered changes).
    #[must_use]
    pub const fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Get a mutable reference to the header. Changes persist on flush.
    pub const fn header_mut(&mut self) -> &mut FileHeader {
        &mut self.header
    }

    /// Block size in bytes.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.header.block_size as usize
    }

    /// Total number of blocks, header included.
    #[must_use]
    pub const fn block_count(&self) -> u32 {
        self.header.block_count
    }

    /// Whether there are buffered changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.header != self.committed
    }

    fn check_bounds(&self, block_id: BlockId) -> Result<(), StorageError> {
        if block_id == 0 || block_id >= self.header.block_count {
            return Err(StorageError::BlockOutOfBounds {
                block_id,
                block_count: self.header.block_count,
            });
        }
        Ok(())
    }

    /// Read a block, preferring buffered writes over the device.
    pub fn read(&self, block_id: BlockId) -> Result<Block, StorageError> {
        self.check_bounds(block_id)?;
        if let Some(block) = self.dirty.get(&block_id) {
            return Ok(block.clone());
        }

        let mut buf = vec![0u8; self.block_size()];
        self.device
            .read_at(u64::from(block_id) * self.block_size() as u64, &mut buf)?;
        let block = Block::from_vec(buf);
        verify_checksum(block_id, &block)?;
        Ok(block)
    }

    /// Read a block and check its type.
    pub fn read_typed(
        &self,
        block_id: BlockId,
        expected: BlockType,
    ) -> Result<Block, StorageError> {
        let block = self.read(block_id)?;
        if block.block_type() != Some(expected) {
            return Err(StorageError::UnexpectedBlockType {
                block_id,
                found: block.raw_type(),
            });
        }
        Ok(block)
    }

    /// Buffer a block write.
    pub fn write(&mut self, block_id: BlockId, block: Block) -> Result<(), StorageError> {
        self.check_bounds(block_id)?;
        if block.size() != self.block_size() {
            return Err(StorageError::EntryTooLarge {
                size: block.size(),
                max: self.block_size(),
            });
        }
        self.dirty.insert(block_id, block);
        Ok(())
    }

    /// Allocate a block, reusing the free list before growing the file.
    ///
    /// The returned block is zeroed with its type set; callers overwrite it.
    pub fn allocate(&mut self, block_type: BlockType) -> Result<BlockId, StorageError> {
        let block_id = if self.header.free_list_head == 0 {
            let id = self.header.block_count;
            self.header.block_count = id.checked_add(1).ok_or_else(|| {
                StorageError::Corruption("block address space exhausted".to_string())
            })?;
            id
        } else {
            let id = self.header.free_list_head;
            let free = self.read_typed(id, BlockType::Free)?;
            self.header.free_list_head = free.read_u32(FREE_NEXT_OFFSET);
            self.header.free_count = self.header.free_count.saturating_sub(1);
            id
        };

        self.dirty
            .insert(block_id, Block::with_type(self.block_size(), block_type));
        Ok(block_id)
    }

    /// Return a block to the free list.
    pub fn free(&mut self, block_id: BlockId) -> Result<(), StorageError> {
        let current = self.read(block_id)?;
        if current.block_type() == Some(BlockType::Free) {
            warn!(block_id, "double free detected");
            return Err(StorageError::DoubleFree(block_id));
        }

        let mut block = Block::with_type(self.block_size(), BlockType::Free);
        block.write_u32(FREE_NEXT_OFFSET, self.header.free_list_head);
        self.dirty.insert(block_id, block);

        self.header.free_list_head = block_id;
        self.header.free_count += 1;
        Ok(())
    }

    /// Walk the free list, returning every block on it.
    pub fn free_blocks(&self) -> Result<Vec<BlockId>, StorageError> {
        let mut blocks = Vec::new();
        let mut current = self.header.free_list_head;
        while current != 0 {
            if blocks.len() > self.header.block_count as usize {
                return Err(StorageError::Corruption("free list contains a cycle".to_string()));
            }
            blocks.push(current);
            let block = self.read_typed(current, BlockType::Free)?;
            current = block.read_u32(FREE_NEXT_OFFSET);
        }
        Ok(blocks)
    }

    /// Persist buffered blocks and the header, then sync the device.
    ///
    /// On failure the buffered state is dropped and the device is put back
    /// as it was before the flush.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.flush_logged().map(drop)
    }

    /// Like [`flush`](Self::flush), returning what is needed to undo it.
    ///
    /// Returns `None` when there was nothing to write.
    pub fn flush_logged(&mut self) -> Result<Option<FlushUndo>, StorageError> {
        if !self.is_dirty() {
            return Ok(None);
        }

        let undo = match self.capture_undo() {
            Ok(undo) => undo,
            Err(e) => {
                self.discard();
                return Err(e);
            }
        };
        if let Err(e) = self.write_dirty() {
            if let Err(restore_error) = self.restore(&undo) {
                error!(error = %restore_error, "failed to restore blocks after a failed flush");
            }
            self.discard();
            return Err(e);
        }
        Ok(Some(undo))
    }

    /// Undo an earlier flush of this file.
    ///
    /// Buffered changes are dropped. The in-memory header returns to its
    /// state before the flush even when the device cannot be restored.
    pub fn roll_back(&mut self, undo: FlushUndo) -> Result<(), StorageError> {
        let result = self.restore(&undo);
        self.dirty.clear();
        self.header.clone_from(&undo.header);
        self.committed = undo.header;
        result
    }

    /// Read the persisted bytes of every block the next flush overwrites.
    fn capture_undo(&self) -> Result<FlushUndo, StorageError> {
        let block_size = self.block_size();
        let mut blocks = Vec::new();
        for &block_id in self.dirty.keys() {
            if block_id < self.committed.block_count {
                let mut buf = vec![0u8; block_size];
                self.device
                    .read_at(u64::from(block_id) * block_size as u64, &mut buf)?;
                blocks.push((block_id, buf));
            }
        }
        Ok(FlushUndo {
            header: self.committed.clone(),
            len: self.device.len()?,
            blocks,
        })
    }

    fn restore(&mut self, undo: &FlushUndo) -> Result<(), StorageError> {
        let block_size = self.block_size() as u64;
        for (block_id, bytes) in &undo.blocks {
            self.device.write_at(u64::from(*block_id) * block_size, bytes)?;
        }
        let header_block = undo.header.to_block()?;
        self.device.write_at(0, header_block.as_bytes())?;
        self.device.set_len(undo.len)?;
        self.device.sync()?;
        debug!(blocks = undo.blocks.len(), "restored blocks from undo");
        Ok(())
    }

    fn write_dirty(&mut self) -> Result<(), StorageError> {
        let block_size = self.block_size() as u64;
        let wanted_len = u64::from(self.header.block_count) * block_size;
        if self.device.len()? < wanted_len {
            self.device.set_len(wanted_len)?;
        }

        let dirty = std::mem::take(&mut self.dirty);
        for (block_id, mut block) in dirty {
            block.seal();
            self.device
                .write_at(u64::from(block_id) * block_size, block.as_bytes())?;
        }

        let header_block = self.header.to_block()?;
        self.device.write_at(0, header_block.as_bytes())?;
        self.device.sync()?;

        self.committed.clone_from(&self.header);
        Ok(())
    }

    /// Drop buffered writes and restore the last persisted header.
    pub fn discard(&mut self) {
        self.dirty.clear();
        self.header.clone_from(&self.committed);
    }
}

/// Verify a block read from the device against its stored checksum.
fn verify_checksum(block_id: BlockId, block: &Block) -> Result<(), StorageError> {
    let expected = block.stored_checksum();
    let actual = block.compute_checksum();
    if expected != actual {
        warn!(block_id, expected, actual, "block checksum mismatch");
        return Err(StorageError::ChecksumMismatch {
            block_id,
            expected,
            actual,
        });
    }
    Ok(())
}
