//! File header structure and serialization.
//!
//! The header occupies block 0 of every file and records the block size,
//! allocation state, the tree root and, for index files, the persisted index
//! definition.
//!
//! # Layout
//!
//! ```text
//! 0       8        16        20           24     28            32
//! +-------+--------+---------+------------+------+-------------+
//! | block | magic  | version | block size | kind | block count |
//! | hdr   |        |         |            |      |             |
//! +-------+--------+---------+------------+------+-------------+
//! 32          36           40     48            56       58
//! +-----------+------------+------+-------------+--------+------------+
//! | free head | free count | root | entry count | def len| definition |
//! +-----------+------------+------+-------------+--------+------------+
//! ```

use crate::storage::block::{Block, BlockId, BlockType, is_valid_block_size};
use crate::storage::io::StorageError;

/// Magic number identifying an object database file.
pub const MAGIC: [u8; 8] = *b"OBJDBFIL";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

mod offsets {
    pub const MAGIC: usize = 8;
    pub const FORMAT_VERSION: usize = 16;
    pub const BLOCK_SIZE: usize = 20;
    pub const KIND: usize = 24;
    pub const BLOCK_COUNT: usize = 28;
    pub const FREE_LIST_HEAD: usize = 32;
    pub const FREE_COUNT: usize = 36;
    pub const ROOT_BLOCK: usize = 40;
    // 44-47: reserved
    pub const ENTRY_COUNT: usize = 48;
    pub const DEFINITION_LEN: usize = 56;
    pub const DEFINITION: usize = 58;
}

/// Largest index definition that fits in the smallest header block.
pub const MAX_DEFINITION_LEN: usize = crate::storage::block::MIN_BLOCK_SIZE - offsets::DEFINITION;

/// What a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileKind {
    /// Primary object tree keyed by object id.
    Objects = 1,
    /// BLOB overflow chains.
    Blobs = 2,
    /// Secondary index tree.
    Index = 3,
}

impl TryFrom<u8> for FileKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Objects),
            2 => Ok(Self::Blobs),
            3 => Ok(Self::Index),
            _ => Err(value),
        }
    }
}

/// Metadata about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub kind: FileKind,
    /// Block size in bytes.
    pub block_size: u32,
    /// Total number of blocks, header included.
    pub block_count: u32,
    /// Head of the free block list (0 if empty).
    pub free_list_head: BlockId,
    /// Number of blocks on the free list.
    pub free_count: u32,
    /// Root block of the tree (0 if the file has no tree yet).
    pub root_block: BlockId,
    /// Number of entries stored in the tree.
    pub entry_count: u64,
    /// Opaque definition bytes (index files only).
    pub definition: Vec<u8>,
}

impl FileHeader {
    /// Create a header for a fresh file.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec in struct literal
    pub fn new(kind: FileKind, block_size: u32, definition: Vec<u8>) -> Self {
        Self {
            kind,
            block_size,
            block_count: 1,
            free_list_head: 0,
            free_count: 0,
            root_block: 0,
            entry_count: 0,
            definition,
        }
    }

    /// Serialize the header into a block of `block_size` bytes.
    pub fn to_block(&self) -> Result<Block, HeaderError> {
        if self.definition.len() > MAX_DEFINITION_LEN {
            return Err(HeaderError::DefinitionTooLarge(self.definition.len()));
        }

        let mut block = Block::with_type(self.block_size as usize, BlockType::Header);
        block.write_bytes(offsets::MAGIC, &MAGIC);
        block.write_u32(offsets::FORMAT_VERSION, FORMAT_VERSION);
        block.write_u32(offsets::BLOCK_SIZE, self.block_size);
        block.write_u8(offsets::KIND, self.kind as u8);
        block.write_u32(offsets::BLOCK_COUNT, self.block_count);
        block.write_u32(offsets::FREE_LIST_HEAD, self.free_list_head);
        block.write_u32(offsets::FREE_COUNT, self.free_count);
        block.write_u32(offsets::ROOT_BLOCK, self.root_block);
        block.write_u64(offsets::ENTRY_COUNT, self.entry_count);
        #[allow(clippy::cast_possible_truncation)] // bounded by MAX_DEFINITION_LEN
        block.write_u16(offsets::DEFINITION_LEN, self.definition.len() as u16);
        block.write_bytes(offsets::DEFINITION, &self.definition);
        block.seal();
        Ok(block)
    }

    /// Read the block size from the leading bytes of a header block.
    ///
    /// `prefix` must hold at least the fixed part of the header.
    pub fn peek_block_size(prefix: &[u8]) -> Result<usize, HeaderError> {
        if prefix.len() < offsets::DEFINITION || prefix[offsets::MAGIC..offsets::MAGIC + 8] != MAGIC
        {
            let mut magic = [0u8; 8];
            if let Some(bytes) = prefix.get(offsets::MAGIC..offsets::MAGIC + 8) {
                magic.copy_from_slice(bytes);
            }
            return Err(HeaderError::InvalidMagic(magic));
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&prefix[offsets::BLOCK_SIZE..offsets::BLOCK_SIZE + 4]);
        let size = u32::from_le_bytes(buf);
        if !is_valid_block_size(size as usize) {
            return Err(HeaderError::InvalidBlockSize(size));
        }
        Ok(size as usize)
    }

    /// Deserialize a header from block 0.
    pub fn from_block(block: &Block) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(block.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }

        let version = block.read_u32(offsets::FORMAT_VERSION);
        if version != FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(version));
        }

        let block_size = block.read_u32(offsets::BLOCK_SIZE);
        if !is_valid_block_size(block_size as usize) || block_size as usize != block.size() {
            return Err(HeaderError::InvalidBlockSize(block_size));
        }

        let kind = FileKind::try_from(block.read_u8(offsets::KIND))
            .map_err(HeaderError::UnknownKind)?;

        let definition_len = block.read_u16(offsets::DEFINITION_LEN) as usize;
        if definition_len > MAX_DEFINITION_LEN {
            return Err(HeaderError::DefinitionTooLarge(definition_len));
        }

        Ok(Self {
            kind,
            block_size,
            block_count: block.read_u32(offsets::BLOCK_COUNT),
            free_list_head: block.read_u32(offsets::FREE_LIST_HEAD),
            free_count: block.read_u32(offsets::FREE_COUNT),
            root_block: block.read_u32(offsets::ROOT_BLOCK),
            entry_count: block.read_u64(offsets::ENTRY_COUNT),
            definition: block
                .read_bytes(offsets::DEFINITION, definition_len)
                .to_vec(),
        })
    }
}

/// Errors that can occur when reading a file header.
#[derive(Debug)]
pub enum HeaderError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Block size is not a supported power of two.
    InvalidBlockSize(u32),
    /// Unknown file kind byte.
    UnknownKind(u8),
    /// Definition bytes do not fit in the header.
    DefinitionTooLarge(usize),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidBlockSize(s) => write!(f, "invalid block size: {s}"),
            Self::UnknownKind(k) => write!(f, "unknown file kind: {k}"),
            Self::DefinitionTooLarge(len) => {
                write!(f, "definition of {len} bytes exceeds {MAX_DEFINITION_LEN}")
            }
        }
    }
}

impl std::error::Error for HeaderError {}

impl From<HeaderError> for StorageError {
    fn from(e: HeaderError) -> Self {
        Self::InvalidHeader(e.to_string())
    }
}
