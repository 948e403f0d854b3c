//! Embedded, file-resident object database.
//!
//! Objects are stored per collection in a B+Tree keyed by a 128-bit
//! [`ObjectId`], with oversized fields moved to a BLOB file and secondary
//! B+Tree indices over ordered field tuples. Queries are filter trees that
//! the planner turns into ordered index range scans.
//!
//! Layers, leaves first:
//!
//! ```text
//! types ── codec ── storage (blocks, B+Tree, BLOBs, object/index files)
//!                      │
//!                    query (filters, ranges, planner, cursors)
//!                      │
//!               collection ── database (facade) ── config
//! ```
//!
//! ```ignore
//! let db = Database::open(DatabaseConfig::new("./data")).await?;
//! let id = db.insert(&mut person).await?;
//! let adults = db
//!     .find::<Person>(0, 10, Some(Filter::ge("Age", 18)), &["-Age"])
//!     .await?
//!     .collect_all()
//!     .await?;
//! db.shutdown().await;
//! ```

pub mod codec;
pub mod collection;
pub mod config;
pub mod database;
pub mod query;
pub mod storage;
pub mod types;

#[cfg(test)]
mod e2e_tests;

pub use codec::{Document, IndexDefinition, Persistent, SortDirection, Value};
pub use collection::Collection;
pub use config::{ConfigError, DatabaseConfig};
pub use database::{Database, DatabaseError};
pub use query::{Cursor, DocumentCursor, Filter};
pub use storage::{IntegrityReport, StorageError};
pub use types::ObjectId;
