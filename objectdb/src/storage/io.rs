//! Block device abstraction and storage errors.
//!
//! A [`BlockDevice`] is a flat, byte-addressed backing store. The block file
//! layer sits on top of it and never assumes anything else about the device,
//! which lets the same engine run against a real file or an in-memory buffer
//! with fault injection.

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::codec::{ConstraintError, DecodeError};
use crate::storage::block::BlockId;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Block id past the end of the file.
    BlockOutOfBounds { block_id: BlockId, block_count: u32 },
    /// Stored checksum does not match the block contents.
    ChecksumMismatch {
        block_id: BlockId,
        expected: u32,
        actual: u32,
    },
    /// A block had an unexpected type byte.
    UnexpectedBlockType { block_id: BlockId, found: u8 },
    /// A block was freed while already on the free list.
    DoubleFree(BlockId),
    /// An entry does not fit in a single block.
    EntryTooLarge { size: usize, max: usize },
    /// File header is missing or malformed.
    InvalidHeader(String),
    /// Structural corruption detected.
    Corruption(String),
    /// Injected fault for simulation.
    InjectedFault(String),
    /// A stored record or key could not be decoded.
    Decode(DecodeError),
    /// A file's stored definition conflicts with the expected one.
    Constraint(ConstraintError),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BlockOutOfBounds {
                block_id,
                block_count,
            } => write!(
                f,
                "block {block_id} out of bounds (total blocks: {block_count})"
            ),
            Self::ChecksumMismatch {
                block_id,
                expected,
                actual,
            } => write!(
                f,
                "checksum mismatch in block {block_id}: expected {expected:08x}, got {actual:08x}"
            ),
            Self::UnexpectedBlockType { block_id, found } => {
                write!(f, "block {block_id} has unexpected type 0x{found:02x}")
            }
            Self::DoubleFree(block_id) => write!(f, "block {block_id} freed twice"),
            Self::EntryTooLarge { size, max } => {
                write!(f, "entry of {size} bytes exceeds block capacity of {max}")
            }
            Self::InvalidHeader(msg) => write!(f, "invalid file header: {msg}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::Decode(e) => write!(f, "undecodable data: {e}"),
            Self::Constraint(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Constraint(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DecodeError> for StorageError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<ConstraintError> for StorageError {
    fn from(e: ConstraintError) -> Self {
        Self::Constraint(e)
    }
}

/// Abstraction over a byte-addressed backing store.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_at` returns the last content written at that range
/// - `sync` makes all previous writes durable
/// - reads take `&self` so many readers can share a device
pub trait BlockDevice: Send + Sync {
    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Write `buf` starting at `offset`.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError>;

    /// Current length in bytes.
    fn len(&self) -> Result<u64, StorageError>;

    /// Grow or shrink the device.
    fn set_len(&mut self, len: u64) -> Result<(), StorageError>;

    /// Make all previous writes durable.
    fn sync(&mut self) -> Result<(), StorageError>;

    /// Whether the device holds no bytes.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// A block device backed by a file on disk.
pub struct FileDevice {
    file: File,
}

impl FileDevice {
    /// Create a new, empty file. Fails if the path already exists.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Open an existing file.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl BlockDevice for FileDevice {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        use std::os::windows::fs::FileExt;
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.seek_read(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            done += n;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    #[cfg(windows)]
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        use std::os::windows::fs::FileExt;
        let mut done = 0;
        while done < buf.len() {
            done += self.file.seek_write(&buf[done..], offset + done as u64)?;
        }
        Ok(())
    }

    fn len(&self) -> Result<u64, StorageError> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<(), StorageError> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.file.sync_all()?;
        Ok(())
    }
}
