//! Binary writer.
//!
//! # Encoding
//!
//! | Type                         | Payload after the tag                      |
//! |------------------------------|--------------------------------------------|
//! | Null, Min, Max               | none                                       |
//! | Boolean, Byte, SByte         | 1 byte                                     |
//! | Int16, UInt16                | 2 bytes little-endian                      |
//! | Int32, Int64                 | zigzag varint                              |
//! | UInt32, UInt64, Char         | varint                                     |
//! | Single, Double               | 4 / 8 bytes little-endian IEEE 754         |
//! | Decimal                      | scale byte, zigzag varint mantissa         |
//! | DateTime                     | zigzag varint unix nanos, zigzag offset s  |
//! | Duration                     | zigzag varint seconds, zigzag nanos        |
//! | String, Enum, Bytes          | varint length, bytes                       |
//! | Identifier                   | 16 bytes                                   |
//! | Array                        | varint count, tagged elements              |
//! | TypedArray                   | element tag, varint count, untagged items  |
//! | Object                       | type name, varint count, (name, value)*    |
//! | BlobRef                      | first block u32, length u32                |

use crate::codec::document::Document;
use crate::codec::type_code::TypeCode;
use crate::codec::value::Value;

/// Pointer to a value stored in the BLOB store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobPointer {
    pub first_block: u32,
    pub length: u32,
}

/// Append-only buffer with primitive encoders.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer, returning the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// LEB128 varint.
    pub fn write_varint(&mut self, mut v: u128) {
        loop {
            #[allow(clippy::cast_possible_truncation)]
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Zigzag-encoded signed varint.
    #[allow(clippy::cast_sign_loss)]
    pub fn write_signed_varint(&mut self, v: i128) {
        self.write_varint(((v << 1) ^ (v >> 127)) as u128);
    }

    /// Length-prefixed byte string.
    pub fn write_len_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u128);
        self.write_bytes(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_len_bytes(s.as_bytes());
    }

    /// Write a value preceded by its type tag.
    ///
    /// A typed array whose elements do not all match its declared code is
    /// written as a plain array.
    pub fn write_value(&mut self, value: &Value) {
        if let Value::TypedArray(code, items) = value {
            if !is_uniform(*code, items) {
                self.write_u8(TypeCode::Array.tag());
                self.write_tagged_items(items);
                return;
            }
        }
        self.write_u8(value.type_code().tag());
        self.write_untagged(value);
    }

    fn write_tagged_items(&mut self, items: &[Value]) {
        self.write_varint(items.len() as u128);
        for item in items {
            self.write_value(item);
        }
    }

    /// Write a value without a tag. The reader must know the type from context.
    pub(crate) fn write_untagged(&mut self, value: &Value) {
        match value {
            Value::Null | Value::Min | Value::Max => {}
            Value::Boolean(v) => self.write_u8(u8::from(*v)),
            Value::Byte(v) => self.write_u8(*v),
            Value::SByte(v) => self.write_bytes(&v.to_le_bytes()),
            Value::Int16(v) => self.write_bytes(&v.to_le_bytes()),
            Value::UInt16(v) => self.write_bytes(&v.to_le_bytes()),
            Value::Int32(v) => self.write_signed_varint(i128::from(*v)),
            Value::Int64(v) => self.write_signed_varint(i128::from(*v)),
            Value::UInt32(v) => self.write_varint(u128::from(*v)),
            Value::UInt64(v) => self.write_varint(u128::from(*v)),
            Value::Single(v) => self.write_bytes(&v.to_le_bytes()),
            Value::Double(v) => self.write_bytes(&v.to_le_bytes()),
            Value::Decimal(d) => {
                self.write_u8(d.scale());
                self.write_signed_varint(d.mantissa());
            }
            Value::DateTime(dt) => {
                self.write_signed_varint(dt.unix_timestamp_nanos());
                self.write_signed_varint(i128::from(dt.offset().whole_seconds()));
            }
            Value::Duration(d) => {
                self.write_signed_varint(i128::from(d.whole_seconds()));
                self.write_signed_varint(i128::from(d.subsec_nanoseconds()));
            }
            Value::Char(c) => self.write_varint(u128::from(u32::from(*c))),
            Value::String(s) | Value::Enum(s) => self.write_str(s),
            Value::Bytes(b) => self.write_len_bytes(b),
            Value::Identifier(id) => self.write_bytes(id.as_bytes()),
            Value::Array(items) => self.write_tagged_items(items),
            Value::TypedArray(code, items) => {
                self.write_u8(code.tag());
                self.write_varint(items.len() as u128);
                for item in items {
                    self.write_untagged(item);
                }
            }
            Value::Object(doc) => self.write_document(doc),
        }
    }

    /// Write a document body (no tag).
    pub fn write_document(&mut self, doc: &Document) {
        self.write_str(doc.type_name());
        self.write_varint(doc.len() as u128);
        for (name, value) in doc.fields() {
            self.write_str(name);
            self.write_value(value);
        }
    }

    /// Write a tagged BLOB pointer in place of a field value.
    pub fn write_blob_pointer(&mut self, ptr: BlobPointer) {
        self.write_u8(TypeCode::BlobRef.tag());
        self.write_bytes(&ptr.first_block.to_le_bytes());
        self.write_bytes(&ptr.length.to_le_bytes());
    }
}

fn is_uniform(code: TypeCode, items: &[Value]) -> bool {
    code.is_typed_element() && items.iter().all(|v| v.type_code() == code)
}

/// Encode a single tagged value.
#[must_use]
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut w = BinaryWriter::new();
    w.write_value(value);
    w.into_bytes()
}
