//! Binary reader, the inverse of [`BinaryWriter`](crate::codec::BinaryWriter).

use time::{Duration, OffsetDateTime, UtcOffset};

use crate::codec::DecodeError;
use crate::codec::document::Document;
use crate::codec::type_code::TypeCode;
use crate::codec::value::Value;
use crate::codec::writer::BlobPointer;
use crate::types::{Decimal, OBJECT_ID_SIZE, ObjectId};

/// Nesting limit for arrays and embedded objects.
const MAX_DEPTH: usize = 64;

/// Cursor over an encoded byte slice.
#[derive(Debug)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> BinaryReader<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Current offset into the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[must_use]
    pub const fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Fail unless the whole input was consumed.
    pub const fn finish(&self) -> Result<(), DecodeError> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(self.remaining()))
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::UnexpectedEnd)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// LEB128 varint.
    pub fn read_varint(&mut self) -> Result<u128, DecodeError> {
        let mut result: u128 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 128 {
                return Err(DecodeError::InvalidValue("varint too long".to_string()));
            }
            result |= u128::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Zigzag-encoded signed varint.
    #[allow(clippy::cast_possible_wrap)]
    pub fn read_signed_varint(&mut self) -> Result<i128, DecodeError> {
        let v = self.read_varint()?;
        Ok((v >> 1) as i128 ^ -((v & 1) as i128))
    }

    fn read_varint_as<T: TryFrom<u128>>(&mut self) -> Result<T, DecodeError> {
        T::try_from(self.read_varint()?)
            .map_err(|_| DecodeError::InvalidValue("varint out of range".to_string()))
    }

    fn read_signed_as<T: TryFrom<i128>>(&mut self) -> Result<T, DecodeError> {
        T::try_from(self.read_signed_varint()?)
            .map_err(|_| DecodeError::InvalidValue("varint out of range".to_string()))
    }

    /// Read a length prefix, bounded by the remaining input.
    pub fn read_len(&mut self) -> Result<usize, DecodeError> {
        let len: usize = self.read_varint_as()?;
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEnd);
        }
        Ok(len)
    }

    pub fn read_len_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_len()?;
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_len_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Read a type tag.
    pub fn read_tag(&mut self) -> Result<TypeCode, DecodeError> {
        TypeCode::from_tag(self.read_u8()?)
    }

    /// Read a tagged value.
    pub fn read_value(&mut self) -> Result<Value, DecodeError> {
        let code = self.read_tag()?;
        if code == TypeCode::BlobRef {
            return Err(DecodeError::UnexpectedBlobRef);
        }
        self.read_untagged(code)
    }

    /// Read a value whose type is known from context.
    pub fn read_untagged(&mut self, code: TypeCode) -> Result<Value, DecodeError> {
        let value = match code {
            TypeCode::Null => Value::Null,
            TypeCode::Min => Value::Min,
            TypeCode::Max => Value::Max,
            TypeCode::Boolean => match self.read_u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => {
                    return Err(DecodeError::InvalidValue(format!("boolean byte {other}")));
                }
            },
            TypeCode::Byte => Value::Byte(self.read_u8()?),
            TypeCode::SByte => Value::SByte(i8::from_le_bytes(self.read_array()?)),
            TypeCode::Int16 => Value::Int16(i16::from_le_bytes(self.read_array()?)),
            TypeCode::UInt16 => Value::UInt16(u16::from_le_bytes(self.read_array()?)),
            TypeCode::Int32 => Value::Int32(self.read_signed_as()?),
            TypeCode::Int64 => Value::Int64(self.read_signed_as()?),
            TypeCode::UInt32 => Value::UInt32(self.read_varint_as()?),
            TypeCode::UInt64 => Value::UInt64(self.read_varint_as()?),
            TypeCode::Single => Value::Single(f32::from_le_bytes(self.read_array()?)),
            TypeCode::Double => Value::Double(f64::from_le_bytes(self.read_array()?)),
            TypeCode::Decimal => {
                let scale = self.read_u8()?;
                let mantissa = self.read_signed_varint()?;
                let d = Decimal::new(mantissa, scale)
                    .ok_or_else(|| DecodeError::InvalidValue(format!("decimal scale {scale}")))?;
                Value::Decimal(d)
            }
            TypeCode::DateTime => {
                let nanos = self.read_signed_varint()?;
                let offset_secs: i32 = self.read_signed_as()?;
                let offset = UtcOffset::from_whole_seconds(offset_secs)
                    .map_err(|e| DecodeError::InvalidValue(e.to_string()))?;
                let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
                    .map_err(|e| DecodeError::InvalidValue(e.to_string()))?;
                Value::DateTime(dt.to_offset(offset))
            }
            TypeCode::Duration => {
                let secs: i64 = self.read_signed_as()?;
                let nanos: i32 = self.read_signed_as()?;
                if nanos.unsigned_abs() >= 1_000_000_000 {
                    return Err(DecodeError::InvalidValue(format!("duration nanos {nanos}")));
                }
                Value::Duration(Duration::new(secs, nanos))
            }
            TypeCode::Char => {
                let scalar: u32 = self.read_varint_as()?;
                let c = char::from_u32(scalar)
                    .ok_or_else(|| DecodeError::InvalidValue(format!("char {scalar:#x}")))?;
                Value::Char(c)
            }
            TypeCode::String => Value::String(self.read_string()?),
            TypeCode::Enum => Value::Enum(self.read_string()?),
            TypeCode::Bytes => Value::Bytes(self.read_len_bytes()?.to_vec()),
            TypeCode::Identifier => {
                Value::Identifier(ObjectId(self.read_array::<OBJECT_ID_SIZE>()?))
            }
            TypeCode::Array => {
                self.enter()?;
                let count = self.read_len()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                self.depth -= 1;
                Value::Array(items)
            }
            TypeCode::TypedArray => {
                self.enter()?;
                let element = self.read_tag()?;
                if !element.is_typed_element() {
                    return Err(DecodeError::BadTag(element.tag()));
                }
                let count = self.read_len()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_untagged(element)?);
                }
                self.depth -= 1;
                Value::TypedArray(element, items)
            }
            TypeCode::Object => {
                self.enter()?;
                let doc = self.read_document()?;
                self.depth -= 1;
                Value::Object(Box::new(doc))
            }
            TypeCode::BlobRef => return Err(DecodeError::UnexpectedBlobRef),
        };
        Ok(value)
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(DecodeError::InvalidValue("nesting too deep".to_string()));
        }
        Ok(())
    }

    /// Read a document body.
    pub fn read_document(&mut self) -> Result<Document, DecodeError> {
        let type_name = self.read_string()?;
        let count = self.read_len()?;
        let mut doc = Document::new(type_name);
        for _ in 0..count {
            let name = self.read_string()?;
            let value = self.read_value()?;
            doc.set(name, value);
        }
        Ok(doc)
    }

    /// Read a document field value that may be a BLOB pointer.
    pub fn read_field(&mut self) -> Result<FieldSlot, DecodeError> {
        let code = self.read_tag()?;
        if code == TypeCode::BlobRef {
            let first_block = self.read_u32_le()?;
            let length = self.read_u32_le()?;
            return Ok(FieldSlot::Blob(BlobPointer {
                first_block,
                length,
            }));
        }
        Ok(FieldSlot::Inline(self.read_untagged(code)?))
    }
}

/// A stored field: either the value itself or a pointer to its BLOB.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSlot {
    Inline(Value),
    Blob(BlobPointer),
}

/// Decode a single tagged value, requiring the input to be fully consumed.
pub fn decode_value(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut r = BinaryReader::new(bytes);
    let value = r.read_value()?;
    r.finish()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::writer::{BinaryWriter, encode_value};
    use time::macros::datetime;

    fn roundtrip(value: &Value) -> Value {
        decode_value(&encode_value(value)).expect("decode")
    }

    #[test]
    fn test_scalar_roundtrip() {
        let values = [
            Value::Null,
            Value::Min,
            Value::Max,
            Value::Boolean(true),
            Value::Byte(u8::MAX),
            Value::SByte(i8::MIN),
            Value::Int16(i16::MIN),
            Value::UInt16(u16::MAX),
            Value::Int32(i32::MIN),
            Value::UInt32(u32::MAX),
            Value::Int64(i64::MIN),
            Value::UInt64(u64::MAX),
            Value::Single(-1.5),
            Value::Double(f64::MAX),
            Value::Decimal("-79228162514264337593543950335.5".parse().expect("decimal")),
            Value::Char('\u{1F600}'),
            Value::String("héllo".to_string()),
            Value::Enum("Green".to_string()),
            Value::Bytes(vec![0, 1, 2, 255]),
            Value::Identifier(ObjectId::from_u128(u128::MAX - 7)),
        ];
        for v in &values {
            assert_eq!(&roundtrip(v), v);
        }
    }

    #[test]
    fn test_time_roundtrip() {
        let dt = datetime!(2024-02-29 13:45:10.123_456_789 +05:30);
        let Value::DateTime(back) = roundtrip(&Value::DateTime(dt)) else {
            panic!("expected datetime");
        };
        assert_eq!(back, dt);
        assert_eq!(back.offset(), dt.offset());

        let d = Duration::new(-3, -250);
        assert_eq!(roundtrip(&Value::Duration(d)), Value::Duration(d));
    }

    #[test]
    fn test_nested_roundtrip() {
        let inner = Document::new("Point").with("x", 1i32).with("y", 2i32);
        let value = Value::Array(vec![
            Value::from(vec![1.5f64, 2.5]),
            Value::from(inner),
            Value::from(vec!["a", "b"]),
            Value::Null,
        ]);
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode_value(&Value::String("truncated".to_string()));
        assert!(matches!(
            decode_value(&bytes[..bytes.len() - 1]),
            Err(DecodeError::UnexpectedEnd)
        ));
        assert!(matches!(decode_value(&[]), Err(DecodeError::UnexpectedEnd)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_value(&Value::Int32(1));
        bytes.push(0);
        assert!(matches!(
            decode_value(&bytes),
            Err(DecodeError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_blob_pointer_only_in_field_position() {
        let mut w = BinaryWriter::new();
        let ptr = BlobPointer {
            first_block: 7,
            length: 9000,
        };
        w.write_blob_pointer(ptr);
        let bytes = w.into_bytes();

        assert!(matches!(
            decode_value(&bytes),
            Err(DecodeError::UnexpectedBlobRef)
        ));
        let mut r = BinaryReader::new(&bytes);
        assert_eq!(r.read_field().expect("field"), FieldSlot::Blob(ptr));
    }

    #[test]
    fn test_invalid_utf8() {
        let bytes = [TypeCode::String.tag(), 2, 0xC3, 0x28];
        assert!(matches!(
            decode_value(&bytes),
            Err(DecodeError::InvalidUtf8)
        ));
    }
}
