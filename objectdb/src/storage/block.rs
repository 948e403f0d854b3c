//! Block types and constants for the storage engine.
//!
//! Every file is an array of fixed-size blocks. The block size is chosen when
//! the file is created and must be a power of two between [`MIN_BLOCK_SIZE`]
//! and [`MAX_BLOCK_SIZE`].
//!
//! # Block Header
//!
//! ```text
//! +-----------+---------+----------------+------------+
//! | Type (1)  | Flags   | CRC32 (4)      | Reserved   |
//! |           | (1)     |                | (2)        |
//! +-----------+---------+----------------+------------+
//! ```
//!
//! The checksum covers the whole block with the checksum field zeroed.

/// A block identifier (0-indexed block number). Block 0 is the file header.
pub type BlockId = u32;

/// Smallest supported block size.
pub const MIN_BLOCK_SIZE: usize = 1024;

/// Largest supported block size.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Block size used when none is configured.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Size of the common block header.
pub const BLOCK_HEADER_SIZE: usize = 8;

const CHECKSUM_OFFSET: usize = 2;

/// Check whether a block size is supported.
#[must_use]
pub const fn is_valid_block_size(size: usize) -> bool {
    size.is_power_of_two() && size >= MIN_BLOCK_SIZE && size <= MAX_BLOCK_SIZE
}

/// Block type identifiers stored in block headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    /// File header (block 0 only)
    Header = 0x01,
    /// Free block (on the free list)
    Free = 0x02,
    /// B+Tree internal node
    BTreeInternal = 0x03,
    /// B+Tree leaf node
    BTreeLeaf = 0x04,
    /// BLOB chain segment
    Blob = 0x05,
}

impl TryFrom<u8> for BlockType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Header),
            0x02 => Ok(Self::Free),
            0x03 => Ok(Self::BTreeInternal),
            0x04 => Ok(Self::BTreeLeaf),
            0x05 => Ok(Self::Blob),
            _ => Err(value),
        }
    }
}

/// A raw block buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    data: Box<[u8]>,
}

impl Block {
    /// Create a new zeroed block of the given size.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Create a zeroed block with its type byte set.
    #[must_use]
    pub fn with_type(size: usize, block_type: BlockType) -> Self {
        let mut block = Self::new(size);
        block.set_raw_type(block_type);
        block
    }

    /// Create a block from raw bytes.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    /// Block size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The raw type byte.
    #[must_use]
    pub fn raw_type(&self) -> u8 {
        self.data[0]
    }

    /// The decoded block type, if the type byte is known.
    #[must_use]
    pub fn block_type(&self) -> Option<BlockType> {
        BlockType::try_from(self.data[0]).ok()
    }

    pub fn set_raw_type(&mut self, block_type: BlockType) {
        self.data[0] = block_type as u8;
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a u16 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Write a u16 (little-endian) at the given offset.
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u32 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write a u32 (little-endian) at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u64 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    /// Write a u64 (little-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Compute the CRC32 of the block with the checksum field zeroed.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[..CHECKSUM_OFFSET]);
        hasher.update(&[0u8; 4]);
        hasher.update(&self.data[CHECKSUM_OFFSET + 4..]);
        hasher.finalize()
    }

    /// The checksum stored in the header.
    #[must_use]
    pub fn stored_checksum(&self) -> u32 {
        self.read_u32(CHECKSUM_OFFSET)
    }

    /// Stamp the current checksum into the header.
    pub fn seal(&mut self) {
        let checksum = self.compute_checksum();
        self.write_u32(CHECKSUM_OFFSET, checksum);
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("size", &self.data.len())
            .field("first_16_bytes", &&self.data[..16])
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_type_roundtrip() {
        for t in [
            BlockType::Header,
            BlockType::Free,
            BlockType::BTreeInternal,
            BlockType::BTreeLeaf,
            BlockType::Blob,
        ] {
            assert_eq!(BlockType::try_from(t as u8), Ok(t));
        }
        assert_eq!(BlockType::try_from(0xEE), Err(0xEE));
    }

    #[test]
    fn test_block_size_validation() {
        assert!(is_valid_block_size(1024));
        assert!(is_valid_block_size(8192));
        assert!(is_valid_block_size(65536));
        assert!(!is_valid_block_size(512));
        assert!(!is_valid_block_size(3000));
        assert!(!is_valid_block_size(131_072));
    }

    #[test]
    fn test_checksum_detects_modification() {
        let mut block = Block::with_type(1024, BlockType::BTreeLeaf);
        block.write_u64(100, 0xDEAD_BEEF_CAFE_BABE);
        block.seal();
        assert_eq!(block.stored_checksum(), block.compute_checksum());

        block.write_u8(500, 1);
        assert_ne!(block.stored_checksum(), block.compute_checksum());
    }

    #[test]
    fn test_read_write_helpers() {
        let mut block = Block::new(1024);
        block.write_u16(10, 0xBEEF);
        block.write_u32(12, 0x1234_5678);
        block.write_bytes(20, b"hello");
        assert_eq!(block.read_u16(10), 0xBEEF);
        assert_eq!(block.read_u32(12), 0x1234_5678);
        assert_eq!(block.read_bytes(20, 5), b"hello");
    }
}
