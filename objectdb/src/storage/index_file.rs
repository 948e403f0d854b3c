//! Secondary index files.
//!
//! An index is a B+Tree whose keys are the indexed field values, tagged and
//! concatenated in declared order, followed by the 16-byte object identifier.
//! Values are empty. Keys compare field by field with each field's sort
//! direction, and ties are broken by identifier, so every key is unique.
//!
//! ```text
//! +----------------+----------------+-----+------------------+
//! | Tagged value 0 | Tagged value 1 | ... | Object id (16)   |
//! +----------------+----------------+-----+------------------+
//! ```
//!
//! An object that lacks any indexed field has no entry. `Null` counts as a
//! present value.

use std::cmp::Ordering;

use tracing::debug;

use crate::codec::{
    BinaryReader, BinaryWriter, ConstraintError, DecodeError, Document, IndexDefinition,
    SortDirection, Value,
};
use crate::storage::btree::{KeyComparator, TreeCursor, TreeReader, TreeWriter};
use crate::storage::file::BlockFile;
use crate::storage::header::FileKind;
use crate::storage::io::{BlockDevice, StorageError};
use crate::types::{OBJECT_ID_SIZE, ObjectId};

/// Encode an index key.
#[must_use]
pub fn encode_index_key(values: &[Value], id: &ObjectId) -> Vec<u8> {
    let mut w = BinaryWriter::new();
    for value in values {
        w.write_value(value);
    }
    w.write_bytes(id.as_bytes());
    w.into_bytes()
}

/// Split an index key into its values and identifier.
pub fn decode_index_key(key: &[u8], fields: usize) -> Result<(Vec<Value>, ObjectId), DecodeError> {
    let mut r = BinaryReader::new(key);
    let mut values = Vec::with_capacity(fields);
    for _ in 0..fields {
        values.push(r.read_value()?);
    }
    let id = ObjectId::from_slice(r.read_bytes(OBJECT_ID_SIZE)?)
        .ok_or(DecodeError::UnexpectedEnd)?;
    r.finish()?;
    Ok((values, id))
}

/// Read up to `count` leading values of a key.
fn decode_prefix(key: &[u8], count: usize) -> Result<Vec<Value>, DecodeError> {
    let mut r = BinaryReader::new(key);
    (0..count).map(|_| r.read_value()).collect()
}

/// Key order for one index definition.
#[derive(Debug, Clone)]
pub struct IndexComparator {
    directions: Vec<SortDirection>,
}

impl IndexComparator {
    #[must_use]
    pub fn new(definition: &IndexDefinition) -> Self {
        Self {
            directions: definition.fields().iter().map(|f| f.direction).collect(),
        }
    }

    /// Compare value prefixes with per-field directions.
    fn compare_values(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((x, y), direction) in a.iter().zip(b).zip(&self.directions) {
            let ord = direction.apply(x.total_cmp(y));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl KeyComparator for IndexComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let fields = self.directions.len();
        match (decode_index_key(a, fields), decode_index_key(b, fields)) {
            (Ok((va, ia)), Ok((vb, ib))) => self.compare_values(&va, &vb).then_with(|| ia.cmp(&ib)),
            // Undecodable keys still need a total order; integrity checks report them.
            _ => a.cmp(b),
        }
    }
}

/// A position relative to a prefix of index values.
///
/// The bound sits just before every key whose leading values equal `values`,
/// or just after them when `after` is set. An empty prefix is the start (or
/// end) of the index.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekBound {
    pub values: Vec<Value>,
    pub after: bool,
}

impl SeekBound {
    #[must_use]
    pub const fn before(values: Vec<Value>) -> Self {
        Self {
            values,
            after: false,
        }
    }

    #[must_use]
    pub const fn after(values: Vec<Value>) -> Self {
        Self {
            values,
            after: true,
        }
    }
}

/// One decoded index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub values: Vec<Value>,
    pub id: ObjectId,
}

/// An open index file with its definition.
pub struct IndexFile {
    definition: IndexDefinition,
    comparator: IndexComparator,
    file: BlockFile,
}

impl IndexFile {
    /// Create an empty index on a fresh device.
    pub fn create(
        device: Box<dyn BlockDevice>,
        block_size: usize,
        definition: IndexDefinition,
    ) -> Result<Self, StorageError> {
        let file = BlockFile::create(device, FileKind::Index, block_size, definition.to_bytes())?;
        debug!(index = %definition, "created index file");
        Ok(Self {
            comparator: IndexComparator::new(&definition),
            definition,
            file,
        })
    }

    /// Open an index file, reading its definition from the header.
    ///
    /// When `expected` is given, the stored definition must match it.
    pub fn open(
        device: Box<dyn BlockDevice>,
        expected: Option<&IndexDefinition>,
    ) -> Result<Self, StorageError> {
        let file = BlockFile::open(device, FileKind::Index)?;
        let definition = IndexDefinition::from_bytes(&file.header().definition)?;
        if let Some(expected) = expected
            && *expected != definition
        {
            return Err(ConstraintError::DefinitionMismatch {
                expected: expected.to_string(),
                found: definition.to_string(),
            }
            .into());
        }
        Ok(Self {
            comparator: IndexComparator::new(&definition),
            definition,
            file,
        })
    }

    #[must_use]
    pub const fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    #[must_use]
    pub const fn file(&self) -> &BlockFile {
        &self.file
    }

    pub const fn file_mut(&mut self) -> &mut BlockFile {
        &mut self.file
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.file.header().entry_count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn comparator(&self) -> &IndexComparator {
        &self.comparator
    }

    fn tree(&self) -> TreeReader<'_, IndexComparator> {
        TreeReader::new(&self.file, &self.comparator)
    }

    /// Values this index covers for a document, or `None` if a field is absent.
    #[must_use]
    pub fn values_for(&self, doc: &Document) -> Option<Vec<Value>> {
        self.definition
            .field_names()
            .map(|name| doc.get(name).cloned())
            .collect()
    }

    /// Add an entry. Returns `false` if it was already present.
    pub fn insert_entry(&mut self, values: &[Value], id: &ObjectId) -> Result<bool, StorageError> {
        let key = encode_index_key(values, id);
        TreeWriter::new(&mut self.file, &self.comparator).insert(&key, &[])
    }

    /// Remove an entry. Returns `false` if it was not present.
    pub fn remove_entry(&mut self, values: &[Value], id: &ObjectId) -> Result<bool, StorageError> {
        let key = encode_index_key(values, id);
        Ok(TreeWriter::new(&mut self.file, &self.comparator)
            .remove(&key)?
            .is_some())
    }

    /// Add the entry for a document, if it has every indexed field.
    pub fn insert_document(&mut self, doc: &Document, id: &ObjectId) -> Result<(), StorageError> {
        if let Some(values) = self.values_for(doc)
            && !self.insert_entry(&values, id)?
        {
            return Err(StorageError::Corruption(format!(
                "index {} already holds an entry for {id}",
                self.definition
            )));
        }
        Ok(())
    }

    /// Remove the entry for a document, if it had one.
    pub fn remove_document(&mut self, doc: &Document, id: &ObjectId) -> Result<(), StorageError> {
        if let Some(values) = self.values_for(doc)
            && !self.remove_entry(&values, id)?
        {
            return Err(StorageError::Corruption(format!(
                "index {} is missing the entry for {id}",
                self.definition
            )));
        }
        Ok(())
    }

    /// Position a cursor at a bound.
    pub fn seek(&self, bound: &SeekBound) -> Result<IndexCursor<'_>, StorageError> {
        let count = bound.values.len().min(self.definition.fields().len());
        let prefix = &bound.values[..count];
        let tie = if bound.after {
            Ordering::Less
        } else {
            Ordering::Greater
        };
        let inner = self.tree().seek(|key| match decode_prefix(key, count) {
            Ok(values) => self.comparator.compare_values(&values, prefix).then(tie),
            Err(_) => Ordering::Less,
        })?;
        Ok(IndexCursor {
            inner,
            fields: self.definition.fields().len(),
        })
    }

    /// Cursor whose `next_entry` yields the first entry whose leading values
    /// are greater than or equal to `values`.
    pub fn find_first_greater_or_equal(
        &self,
        values: &[Value],
    ) -> Result<IndexCursor<'_>, StorageError> {
        self.seek(&SeekBound::before(values.to_vec()))
    }

    /// Cursor whose `prev_entry` yields the last entry whose leading values
    /// are less than or equal to `values`.
    pub fn find_last_lesser_or_equal(
        &self,
        values: &[Value],
    ) -> Result<IndexCursor<'_>, StorageError> {
        self.seek(&SeekBound::after(values.to_vec()))
    }

    /// Cursor at the start of the index.
    pub fn first(&self) -> Result<IndexCursor<'_>, StorageError> {
        self.seek(&SeekBound::before(Vec::new()))
    }

    /// Cursor positioned just after one exact entry, whether or not it is
    /// still stored.
    pub fn seek_past(&self, entry: &IndexEntry) -> Result<IndexCursor<'_>, StorageError> {
        let target = encode_index_key(&entry.values, &entry.id);
        let inner = self.tree().seek(|key| {
            if self.comparator.compare(key, &target).is_le() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        })?;
        Ok(IndexCursor {
            inner,
            fields: self.definition.fields().len(),
        })
    }
}

/// Cursor over decoded index entries.
pub struct IndexCursor<'a> {
    inner: TreeCursor<'a>,
    fields: usize,
}

impl IndexCursor<'_> {
    pub fn next_entry(&mut self) -> Result<Option<IndexEntry>, StorageError> {
        self.inner.next_entry()?.map(|e| self.decode(&e.key)).transpose()
    }

    pub fn prev_entry(&mut self) -> Result<Option<IndexEntry>, StorageError> {
        self.inner.prev_entry()?.map(|e| self.decode(&e.key)).transpose()
    }

    fn decode(&self, key: &[u8]) -> Result<IndexEntry, StorageError> {
        let (values, id) = decode_index_key(key, self.fields)?;
        Ok(IndexEntry { values, id })
    }
}
