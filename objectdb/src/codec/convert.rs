//! Typed conversion out of [`Value`].
//!
//! Numeric conversions only widen: a stored 8-bit value reads as any wider
//! integer, but a stored 64-bit value never reads as a 32-bit one. A string
//! read into a numeric target is parsed; a number read into a string is
//! formatted. `Null` only converts into `Option<T>`.

use std::str::FromStr;

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::codec::DecodeError;
use crate::codec::document::Document;
use crate::codec::value::Value;
use crate::types::{Decimal, ObjectId};

/// Conversion from a decoded value into a concrete Rust type.
pub trait FromValue: Sized {
    /// Human-readable target name used in error messages.
    const TARGET: &'static str;

    fn from_value(value: &Value) -> Result<Self, DecodeError>;
}

fn incompatible<T: FromValue>(value: &Value) -> DecodeError {
    match value {
        Value::Null => DecodeError::UnexpectedNull,
        other => DecodeError::Incompatible {
            target: T::TARGET,
            found: other.type_code(),
        },
    }
}

fn parse_text<T: FromValue + FromStr>(text: &str) -> Result<T, DecodeError> {
    text.trim()
        .parse()
        .map_err(|_| DecodeError::Unparsable {
            text: text.to_string(),
            target: T::TARGET,
        })
}

macro_rules! impl_integer {
    ($ty:ty, $name:literal, [$($variant:ident),*]) => {
        impl FromValue for $ty {
            const TARGET: &'static str = $name;

            fn from_value(value: &Value) -> Result<Self, DecodeError> {
                match value {
                    $(Value::$variant(v) => Ok(Self::from(*v)),)*
                    Value::String(s) => parse_text(s),
                    other => Err(incompatible::<Self>(other)),
                }
            }
        }
    };
}

impl_integer!(u8, "u8", [Byte]);
impl_integer!(i8, "i8", [SByte]);
impl_integer!(i16, "i16", [Byte, SByte, Int16]);
impl_integer!(u16, "u16", [Byte, UInt16]);
impl_integer!(i32, "i32", [Byte, SByte, Int16, UInt16, Int32]);
impl_integer!(u32, "u32", [Byte, UInt16, UInt32]);
impl_integer!(i64, "i64", [Byte, SByte, Int16, UInt16, Int32, UInt32, Int64]);
impl_integer!(u64, "u64", [Byte, UInt16, UInt32, UInt64]);

impl FromValue for f32 {
    const TARGET: &'static str = "f32";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Single(v) => Ok(*v),
            Value::Byte(v) => Ok(Self::from(*v)),
            Value::SByte(v) => Ok(Self::from(*v)),
            Value::Int16(v) => Ok(Self::from(*v)),
            Value::UInt16(v) => Ok(Self::from(*v)),
            Value::String(s) => parse_text(s),
            other => Err(incompatible::<Self>(other)),
        }
    }
}

impl FromValue for f64 {
    const TARGET: &'static str = "f64";

    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Double(v) => Ok(*v),
            Value::Single(v) => Ok(Self::from(*v)),
            Value::Byte(v) => Ok(Self::from(*v)),
            Value::SByte(v) => Ok(Self::from(*v)),
            Value::Int16(v) => Ok(Self::from(*v)),
            Value::UInt16(v) => Ok(Self::from(*v)),
            Value::Int32(v) => Ok(Self::from(*v)),
            Value::UInt32(v) => Ok(Self::from(*v)),
            Value::Int64(v) => Ok(*v as Self),
            Value::UInt64(v) => Ok(*v as Self),
            Value::String(s) => parse_text(s),
            other => Err(incompatible::<Self>(other)),
        }
    }
}

impl FromValue for Decimal {
    const TARGET: &'static str = "decimal";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Decimal(d) => Ok(*d),
            Value::Byte(v) => Ok(Self::from_i128(i128::from(*v))),
            Value::SByte(v) => Ok(Self::from_i128(i128::from(*v))),
            Value::Int16(v) => Ok(Self::from_i128(i128::from(*v))),
            Value::UInt16(v) => Ok(Self::from_i128(i128::from(*v))),
            Value::Int32(v) => Ok(Self::from_i128(i128::from(*v))),
            Value::UInt32(v) => Ok(Self::from_i128(i128::from(*v))),
            Value::Int64(v) => Ok(Self::from_i128(i128::from(*v))),
            Value::UInt64(v) => Ok(Self::from_i128(i128::from(*v))),
            Value::String(s) => parse_text(s),
            other => Err(incompatible::<Self>(other)),
        }
    }
}

impl FromValue for bool {
    const TARGET: &'static str = "bool";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::String(s) => parse_text(s),
            other => Err(incompatible::<Self>(other)),
        }
    }
}

impl FromValue for char {
    const TARGET: &'static str = "char";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Char(c) => Ok(*c),
            Value::String(s) => parse_text(s),
            other => Err(incompatible::<Self>(other)),
        }
    }
}

impl FromValue for String {
    const TARGET: &'static str = "string";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::String(s) | Value::Enum(s) => Ok(s.clone()),
            Value::Null
            | Value::Min
            | Value::Max
            | Value::Bytes(_)
            | Value::Array(_)
            | Value::TypedArray(..)
            | Value::Object(_) => Err(incompatible::<Self>(value)),
            Value::DateTime(dt) => dt
                .format(&Rfc3339)
                .map_err(|e| DecodeError::InvalidValue(e.to_string())),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for OffsetDateTime {
    const TARGET: &'static str = "date/time";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::DateTime(dt) => Ok(*dt),
            Value::String(s) => Self::parse(s.trim(), &Rfc3339).map_err(|_| {
                DecodeError::Unparsable {
                    text: s.clone(),
                    target: Self::TARGET,
                }
            }),
            other => Err(incompatible::<Self>(other)),
        }
    }
}

impl FromValue for Duration {
    const TARGET: &'static str = "duration";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Duration(d) => Ok(*d),
            other => Err(incompatible::<Self>(other)),
        }
    }
}

impl FromValue for ObjectId {
    const TARGET: &'static str = "object id";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Identifier(id) => Ok(*id),
            Value::String(s) => parse_text(s),
            other => Err(incompatible::<Self>(other)),
        }
    }
}

impl FromValue for Document {
    const TARGET: &'static str = "object";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Object(doc) => Ok((**doc).clone()),
            other => Err(incompatible::<Self>(other)),
        }
    }
}

impl FromValue for Value {
    const TARGET: &'static str = "value";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const TARGET: &'static str = T::TARGET;

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    const TARGET: &'static str = "array";

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Array(items) | Value::TypedArray(_, items) => {
                items.iter().map(T::from_value).collect()
            }
            Value::Bytes(bytes) => bytes
                .iter()
                .map(|b| T::from_value(&Value::Byte(*b)))
                .collect(),
            other => Err(incompatible::<Self>(other)),
        }
    }
}
