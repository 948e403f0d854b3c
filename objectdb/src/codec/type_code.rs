//! Type tags.
//!
//! Every encoded value starts with a one-byte tag whose low six bits hold the
//! type code. The two high bits are reserved and must be zero; a reader that
//! meets a set reserved bit rejects the value rather than guessing.

use crate::codec::DecodeError;

/// Mask selecting the type code bits of a tag byte.
pub const TYPE_CODE_MASK: u8 = 0x3F;

/// Type code of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeCode {
    Null = 0,
    Boolean = 1,
    Byte = 2,
    SByte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Single = 10,
    Double = 11,
    Decimal = 12,
    DateTime = 13,
    Duration = 14,
    Char = 15,
    String = 16,
    Enum = 17,
    Bytes = 18,
    Identifier = 19,
    Array = 20,
    TypedArray = 21,
    Object = 22,
    /// Pointer into the BLOB store. Only valid as a document field value.
    BlobRef = 23,
    /// Sentinel below every other value.
    Min = 62,
    /// Sentinel above every other value.
    Max = 63,
}

impl TypeCode {
    /// Decode a tag byte.
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        if tag & !TYPE_CODE_MASK != 0 {
            return Err(DecodeError::BadTag(tag));
        }
        let code = match tag {
            0 => Self::Null,
            1 => Self::Boolean,
            2 => Self::Byte,
            3 => Self::SByte,
            4 => Self::Int16,
            5 => Self::UInt16,
            6 => Self::Int32,
            7 => Self::UInt32,
            8 => Self::Int64,
            9 => Self::UInt64,
            10 => Self::Single,
            11 => Self::Double,
            12 => Self::Decimal,
            13 => Self::DateTime,
            14 => Self::Duration,
            15 => Self::Char,
            16 => Self::String,
            17 => Self::Enum,
            18 => Self::Bytes,
            19 => Self::Identifier,
            20 => Self::Array,
            21 => Self::TypedArray,
            22 => Self::Object,
            23 => Self::BlobRef,
            62 => Self::Min,
            63 => Self::Max,
            _ => return Err(DecodeError::BadTag(tag)),
        };
        Ok(code)
    }

    /// The tag byte for this code.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Whether values of this type may appear as elements of a typed array.
    #[must_use]
    pub const fn is_typed_element(self) -> bool {
        !matches!(
            self,
            Self::Null | Self::TypedArray | Self::BlobRef | Self::Min | Self::Max
        )
    }
}

impl std::fmt::Display for TypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
