//! BLOB store: overflow chains for values too large to keep inline.
//!
//! Each BLOB is a chain of blocks in the collection's `.blob` file. The
//! owning record keeps a [`BlobPointer`] (first block and total length).
//!
//! # Chain Block Format
//!
//! ```text
//! +----------------+----------------+----------------+------------------+
//! | Block Header   | Next Block     | Data Length    | Data...          |
//! | (8 bytes)      | (4 bytes)      | (4 bytes)      | (variable)       |
//! +----------------+----------------+----------------+------------------+
//! ```
//!
//! The file header's entry count tracks the number of live BLOBs.

use crate::codec::BlobPointer;
use crate::storage::block::{BLOCK_HEADER_SIZE, BlockId, BlockType};
use crate::storage::file::BlockFile;
use crate::storage::io::StorageError;

const NEXT_OFFSET: usize = BLOCK_HEADER_SIZE;
const LENGTH_OFFSET: usize = BLOCK_HEADER_SIZE + 4;
const DATA_OFFSET: usize = BLOCK_HEADER_SIZE + 8;

/// Payload bytes per chain block.
#[must_use]
pub const fn blob_data_per_block(block_size: usize) -> usize {
    block_size - DATA_OFFSET
}

/// Write a value as a new chain.
pub fn store_blob(file: &mut BlockFile, value: &[u8]) -> Result<BlobPointer, StorageError> {
    let length = u32::try_from(value.len()).map_err(|_| StorageError::EntryTooLarge {
        size: value.len(),
        max: u32::MAX as usize,
    })?;
    let per_block = blob_data_per_block(file.block_size());

    let mut chunks: Vec<&[u8]> = value.chunks(per_block).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    let mut ids = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        ids.push(file.allocate(BlockType::Blob)?);
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let next = ids.get(i + 1).copied().unwrap_or(0);
        let mut block = file.read(ids[i])?;
        block.write_u32(NEXT_OFFSET, next);
        #[allow(clippy::cast_possible_truncation)] // chunk fits in one block
        block.write_u32(LENGTH_OFFSET, chunk.len() as u32);
        block.write_bytes(DATA_OFFSET, chunk);
        file.write(ids[i], block)?;
    }

    file.header_mut().entry_count += 1;
    Ok(BlobPointer {
        first_block: ids[0],
        length,
    })
}

/// Read a whole chain back.
pub fn read_blob(file: &BlockFile, ptr: BlobPointer) -> Result<Vec<u8>, StorageError> {
    let mut out = Vec::with_capacity(ptr.length as usize);
    for_each_block(file, ptr, |data| out.extend_from_slice(data))?;
    if out.len() != ptr.length as usize {
        return Err(StorageError::Corruption(format!(
            "BLOB at block {} holds {} bytes, pointer says {}",
            ptr.first_block,
            out.len(),
            ptr.length
        )));
    }
    Ok(out)
}

/// Return every block of a chain to the free list.
pub fn free_blob(file: &mut BlockFile, ptr: BlobPointer) -> Result<(), StorageError> {
    for block_id in blob_blocks(file, ptr)? {
        file.free(block_id)?;
    }
    let header = file.header_mut();
    header.entry_count = header.entry_count.saturating_sub(1);
    Ok(())
}

/// Block ids of a chain, in order.
pub fn blob_blocks(file: &BlockFile, ptr: BlobPointer) -> Result<Vec<BlockId>, StorageError> {
    let mut blocks = Vec::new();
    let mut current = ptr.first_block;
    while current != 0 {
        if blocks.len() >= file.block_count() as usize {
            return Err(StorageError::Corruption(format!(
                "BLOB chain at block {} contains a cycle",
                ptr.first_block
            )));
        }
        blocks.push(current);
        current = file.read_typed(current, BlockType::Blob)?.read_u32(NEXT_OFFSET);
    }
    if blocks.is_empty() {
        return Err(StorageError::Corruption("BLOB pointer to block 0".to_string()));
    }
    Ok(blocks)
}

fn for_each_block(
    file: &BlockFile,
    ptr: BlobPointer,
    mut f: impl FnMut(&[u8]),
) -> Result<(), StorageError> {
    let per_block = blob_data_per_block(file.block_size());
    for block_id in blob_blocks(file, ptr)? {
        let block = file.read_typed(block_id, BlockType::Blob)?;
        let len = block.read_u32(LENGTH_OFFSET) as usize;
        if len > per_block {
            return Err(StorageError::Corruption(format!(
                "BLOB block {block_id} claims {len} bytes"
            )));
        }
        f(block.read_bytes(DATA_OFFSET, len));
    }
    Ok(())
}
