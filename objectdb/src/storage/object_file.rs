//! Primary object file: documents keyed by object identifier.
//!
//! Each collection stores its objects in a B+Tree whose keys are the raw
//! 16-byte identifiers and whose values are encoded records:
//!
//! ```text
//! Inline record:  0x00, type name, varint field count, (name, field)*
//! BLOB record:    0x01, first block u32, length u32
//! ```
//!
//! In an inline record each field is either a tagged value or a tagged BLOB
//! pointer. Fields whose encoding exceeds the BLOB threshold are moved to the
//! collection's BLOB file. If the record still does not fit in a leaf, the
//! whole document is written as a single BLOB instead.
//!
//! Identifiers never move: an update rewrites the leaf entry under the same
//! key, so index entries (which hold identifiers, not locations) stay valid.

use tracing::trace;

use crate::codec::{
    BinaryReader, BinaryWriter, BlobPointer, DecodeError, Document, FieldSlot, decode_value,
    encode_value,
};
use crate::storage::blob::{free_blob, read_blob, store_blob};
use crate::storage::btree::{
    BytewiseComparator, TreeCursor, TreeReader, TreeWriter, encoded_entry_size, max_entry_size,
};
use crate::storage::file::BlockFile;
use crate::storage::io::StorageError;
use crate::types::{OBJECT_ID_SIZE, ObjectId};

const RECORD_INLINE: u8 = 0;
const RECORD_BLOB: u8 = 1;

/// Largest record that is kept inline in a leaf.
#[must_use]
pub const fn max_record_size(block_size: usize) -> usize {
    max_entry_size(block_size) - encoded_entry_size(OBJECT_ID_SIZE, 0)
}

/// Read access to a collection's objects.
pub struct ObjectFile<'a> {
    objects: &'a BlockFile,
    blobs: &'a BlockFile,
}

impl<'a> ObjectFile<'a> {
    #[must_use]
    pub const fn new(objects: &'a BlockFile, blobs: &'a BlockFile) -> Self {
        Self { objects, blobs }
    }

    fn tree(&self) -> TreeReader<'a, BytewiseComparator> {
        TreeReader::new(self.objects, &BytewiseComparator)
    }

    /// Number of stored objects.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.objects.header().entry_count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point lookup. A missing identifier is `Ok(None)`.
    pub fn get(&self, id: &ObjectId) -> Result<Option<Document>, StorageError> {
        match self.tree().get(id.as_bytes())? {
            Some(record) => self.decode_record(&record).map(Some),
            None => Ok(None),
        }
    }

    /// Whether an identifier is stored.
    pub fn contains(&self, id: &ObjectId) -> Result<bool, StorageError> {
        Ok(self.tree().get(id.as_bytes())?.is_some())
    }

    /// Cursor over entries in identifier order, starting after `after`.
    pub fn scan_after(&self, after: Option<&ObjectId>) -> Result<TreeCursor<'a>, StorageError> {
        match after {
            None => self.tree().first(),
            Some(after) => {
                let bound = *after.as_bytes();
                self.tree().seek(move |key| {
                    if key <= &bound[..] {
                        std::cmp::Ordering::Less
                    } else {
                        std::cmp::Ordering::Greater
                    }
                })
            }
        }
    }

    /// Decode a stored record, loading any BLOBs it points to.
    pub fn decode_record(&self, record: &[u8]) -> Result<Document, StorageError> {
        let (flag, body) = record
            .split_first()
            .ok_or(DecodeError::UnexpectedEnd)?;
        match *flag {
            RECORD_INLINE => {
                let mut r = BinaryReader::new(body);
                let mut doc = Document::new(r.read_string()?);
                let count = r.read_len()?;
                for _ in 0..count {
                    let name = r.read_string()?;
                    let value = match r.read_field()? {
                        FieldSlot::Inline(value) => value,
                        FieldSlot::Blob(ptr) => {
                            let bytes = read_blob(self.blobs, ptr)?;
                            decode_value(&bytes).map_err(|e| e.in_field(&name))?
                        }
                    };
                    doc.set(name, value);
                }
                r.finish()?;
                Ok(doc)
            }
            RECORD_BLOB => {
                let ptr = read_record_pointer(body)?;
                let bytes = read_blob(self.blobs, ptr)?;
                Ok(Document::decode(&bytes)?)
            }
            other => Err(DecodeError::InvalidValue(format!("record flag {other}")).into()),
        }
    }
}

/// BLOBs owned by a stored record.
pub fn record_blobs(record: &[u8]) -> Result<Vec<BlobPointer>, DecodeError> {
    let (flag, body) = record.split_first().ok_or(DecodeError::UnexpectedEnd)?;
    match *flag {
        RECORD_INLINE => {
            let mut r = BinaryReader::new(body);
            r.read_string()?;
            let count = r.read_len()?;
            let mut blobs = Vec::new();
            for _ in 0..count {
                r.read_string()?;
                if let FieldSlot::Blob(ptr) = r.read_field()? {
                    blobs.push(ptr);
                }
            }
            Ok(blobs)
        }
        RECORD_BLOB => Ok(vec![read_record_pointer(body)?]),
        other => Err(DecodeError::InvalidValue(format!("record flag {other}"))),
    }
}

fn read_record_pointer(body: &[u8]) -> Result<BlobPointer, DecodeError> {
    let mut r = BinaryReader::new(body);
    let first_block = r.read_u32_le()?;
    let length = r.read_u32_le()?;
    r.finish()?;
    Ok(BlobPointer {
        first_block,
        length,
    })
}

/// Mutating access to a collection's objects and BLOBs.
pub struct ObjectFileWriter<'a> {
    objects: &'a mut BlockFile,
    blobs: &'a mut BlockFile,
    blob_threshold: usize,
}

impl<'a> ObjectFileWriter<'a> {
    pub const fn new(
        objects: &'a mut BlockFile,
        blobs: &'a mut BlockFile,
        blob_threshold: usize,
    ) -> Self {
        Self {
            objects,
            blobs,
            blob_threshold,
        }
    }

    #[must_use]
    pub fn reader(&self) -> ObjectFile<'_> {
        ObjectFile::new(&*self.objects, &*self.blobs)
    }

    /// Store a new object. Returns `false` if the identifier is taken.
    pub fn insert(&mut self, id: &ObjectId, doc: &Document) -> Result<bool, StorageError> {
        if self.reader().contains(id)? {
            return Ok(false);
        }
        let record = self.encode_record(doc)?;
        let inserted =
            TreeWriter::new(self.objects, &BytewiseComparator).insert(id.as_bytes(), &record)?;
        trace!(%id, size = record.len(), "inserted object");
        Ok(inserted)
    }

    /// Replace a stored object, returning the previous version.
    ///
    /// New BLOBs are written before the old ones are freed.
    pub fn update(
        &mut self,
        id: &ObjectId,
        doc: &Document,
    ) -> Result<Option<Document>, StorageError> {
        let Some(old_record) =
            TreeReader::new(&*self.objects, &BytewiseComparator).get(id.as_bytes())?
        else {
            return Ok(None);
        };
        let old_doc = self.reader().decode_record(&old_record)?;
        let old_blobs = record_blobs(&old_record)?;

        let record = self.encode_record(doc)?;
        TreeWriter::new(self.objects, &BytewiseComparator).upsert(id.as_bytes(), &record)?;
        for ptr in old_blobs {
            free_blob(self.blobs, ptr)?;
        }
        trace!(%id, size = record.len(), "updated object");
        Ok(Some(old_doc))
    }

    /// Remove a stored object and its BLOBs, returning it.
    pub fn delete(&mut self, id: &ObjectId) -> Result<Option<Document>, StorageError> {
        let Some(old_record) =
            TreeReader::new(&*self.objects, &BytewiseComparator).get(id.as_bytes())?
        else {
            return Ok(None);
        };
        let old_doc = self.reader().decode_record(&old_record)?;
        let old_blobs = record_blobs(&old_record)?;

        TreeWriter::new(self.objects, &BytewiseComparator).remove(id.as_bytes())?;
        for ptr in old_blobs {
            free_blob(self.blobs, ptr)?;
        }
        trace!(%id, "deleted object");
        Ok(Some(old_doc))
    }

    /// Encode a document, moving oversized fields to the BLOB file.
    fn encode_record(&mut self, doc: &Document) -> Result<Vec<u8>, StorageError> {
        let fields: Vec<(&str, Vec<u8>)> = doc
            .fields()
            .map(|(name, value)| (name, encode_value(value)))
            .collect();
        let spilled: Vec<bool> = fields
            .iter()
            .map(|(_, bytes)| bytes.len() > self.blob_threshold)
            .collect();

        let placeholder = BlobPointer {
            first_block: 0,
            length: 0,
        };
        let pointers: Vec<Option<BlobPointer>> = spilled
            .iter()
            .map(|spill| spill.then_some(placeholder))
            .collect();
        let estimate = inline_record(doc.type_name(), &fields, &pointers);

        if estimate.len() > max_record_size(self.objects.block_size()) {
            let ptr = store_blob(self.blobs, &doc.encode())?;
            let mut w = BinaryWriter::new();
            w.write_u8(RECORD_BLOB);
            w.write_bytes(&ptr.first_block.to_le_bytes());
            w.write_bytes(&ptr.length.to_le_bytes());
            return Ok(w.into_bytes());
        }

        let mut pointers = Vec::with_capacity(fields.len());
        for ((_, bytes), spill) in fields.iter().zip(&spilled) {
            pointers.push(if *spill {
                Some(store_blob(self.blobs, bytes)?)
            } else {
                None
            });
        }
        Ok(inline_record(doc.type_name(), &fields, &pointers))
    }
}

fn inline_record(
    type_name: &str,
    fields: &[(&str, Vec<u8>)],
    pointers: &[Option<BlobPointer>],
) -> Vec<u8> {
    let mut w = BinaryWriter::new();
    w.write_u8(RECORD_INLINE);
    w.write_str(type_name);
    w.write_varint(fields.len() as u128);
    for ((name, bytes), ptr) in fields.iter().zip(pointers) {
        w.write_str(name);
        match ptr {
            Some(ptr) => w.write_blob_pointer(*ptr),
            None => w.write_bytes(bytes),
        }
    }
    w.into_bytes()
}
