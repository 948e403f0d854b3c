//! File-resident storage engine.
//!
//! Every collection is a small family of block files in the database
//! directory:
//!
//! ```text
//! {collection}.btree           primary tree: object id -> record
//! {collection}.blob            overflow chains for oversized fields
//! {collection}.{stem}.index    one secondary tree per index definition
//! ```
//!
//! All files share the same block layer: block 0 is a self-describing
//! header, every other block carries a type byte and a CRC32, and freed
//! blocks are chained on a free list for reuse.

pub mod blob;
pub mod block;
pub mod btree;
pub mod file;
pub mod header;
pub mod index_file;
pub mod integrity;
pub mod io;
pub mod memory;
pub mod object_file;

pub use block::{BlockId, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, is_valid_block_size};
pub use file::BlockFile;
pub use header::FileKind;
pub use index_file::{IndexCursor, IndexEntry, IndexFile, SeekBound};
pub use integrity::IntegrityReport;
pub use io::{BlockDevice, FileDevice, StorageError};
pub use memory::{FaultConfig, FaultHandle, MemoryDevice};
pub use object_file::{ObjectFile, ObjectFileWriter, max_record_size};
