//! Type-tagged binary serialization.
//!
//! Values are written as a one-byte type tag followed by a compact payload.
//! Documents (type name plus named fields) are the unit the storage engine
//! persists; [`Persistent`] connects user types to documents.

mod convert;
mod document;
mod persistent;
mod reader;
mod type_code;
mod value;
mod writer;

pub use convert::FromValue;
pub use document::Document;
pub use persistent::{
    ConstraintError, IndexDefinition, IndexField, Persistent, SortDirection, validate_name,
};
pub use reader::{BinaryReader, FieldSlot, decode_value};
pub use type_code::{TYPE_CODE_MASK, TypeCode};
pub use value::{Value, ValueClass};
pub use writer::{BinaryWriter, BlobPointer, encode_value};

/// Errors that can occur while decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Unknown type code or reserved tag bits set.
    BadTag(u8),
    /// Input ended in the middle of a value.
    UnexpectedEnd,
    /// Input continued after the last value.
    TrailingBytes(usize),
    /// Stored type cannot be read as the requested type.
    Incompatible {
        target: &'static str,
        found: TypeCode,
    },
    /// Text could not be parsed as the requested type.
    Unparsable { text: String, target: &'static str },
    /// String bytes were not valid UTF-8.
    InvalidUtf8,
    /// Null stored where a value is required.
    UnexpectedNull,
    /// Required field absent from the document.
    MissingField(String),
    /// BLOB pointer outside a field position.
    UnexpectedBlobRef,
    /// Payload out of range for its type.
    InvalidValue(String),
    /// Error while decoding a named field.
    Field {
        name: String,
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    /// Attach the field name to an error.
    #[must_use]
    pub fn in_field(self, name: &str) -> Self {
        match self {
            already @ (Self::Field { .. } | Self::MissingField(_)) => already,
            other => Self::Field {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadTag(tag) => write!(f, "bad type tag 0x{tag:02x}"),
            Self::UnexpectedEnd => write!(f, "unexpected end of input"),
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after value"),
            Self::Incompatible { target, found } => {
                write!(f, "cannot read {found} as {target}")
            }
            Self::Unparsable { text, target } => write!(f, "cannot parse {text:?} as {target}"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 in string"),
            Self::UnexpectedNull => write!(f, "unexpected null"),
            Self::MissingField(name) => write!(f, "missing field {name}"),
            Self::UnexpectedBlobRef => write!(f, "BLOB pointer outside a field"),
            Self::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            Self::Field { name, source } => write!(f, "field {name}: {source}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Field { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
