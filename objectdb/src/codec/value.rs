//! Tagged values.
//!
//! [`Value`] is the closed set of kinds the codec can store. Values carry a
//! total order used by index keys and in-memory sorting:
//!
//! ```text
//! Min < Null < Boolean < numbers < DateTime < Duration < text < bytes
//!     < identifier < array < object < Max
//! ```
//!
//! Numbers of different widths compare by numeric value, and `Char`, `String`
//! and `Enum` compare as text.

use std::cmp::Ordering;

use time::{Duration, OffsetDateTime};

use crate::codec::document::Document;
use crate::codec::type_code::TypeCode;
use crate::types::{Decimal, ObjectId};

/// A single encoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(u8),
    SByte(i8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    Decimal(Decimal),
    DateTime(OffsetDateTime),
    Duration(Duration),
    Char(char),
    String(String),
    /// Enumeration member, stored by name.
    Enum(String),
    Bytes(Vec<u8>),
    Identifier(ObjectId),
    Array(Vec<Value>),
    /// Array whose elements all share one type; written with a single element tag.
    TypedArray(TypeCode, Vec<Value>),
    Object(Box<Document>),
    Min,
    Max,
}

/// Ordering class of a value. Values in different classes never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueClass {
    Min,
    Null,
    Boolean,
    Number,
    DateTime,
    Duration,
    Text,
    Bytes,
    Identifier,
    Array,
    Object,
    Max,
}

/// A number lifted to a common representation for comparison.
#[derive(Clone, Copy)]
enum Number {
    Int(i128),
    Float(f64),
    Decimal(Decimal),
}

impl Number {
    /// Exact comparison by numeric value. NaN sorts above every other number
    /// and `-0.0` equals zero, which keeps the order transitive across kinds.
    fn compare(self, other: Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(&b),
            (Self::Decimal(a), Self::Decimal(b)) => a.cmp(&b),
            (Self::Float(a), Self::Float(b)) => compare_floats(a, b),
            (Self::Int(a), Self::Decimal(b)) => Decimal::from_i128(a).cmp(&b),
            (Self::Decimal(a), Self::Int(b)) => a.cmp(&Decimal::from_i128(b)),
            (Self::Int(a), Self::Float(b)) => Decimal::from_i128(a).compare_f64(b),
            (Self::Float(a), Self::Int(b)) => Decimal::from_i128(b).compare_f64(a).reverse(),
            (Self::Decimal(a), Self::Float(b)) => a.compare_f64(b),
            (Self::Float(a), Self::Decimal(b)) => b.compare_f64(a).reverse(),
        }
    }
}

fn compare_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl Value {
    /// The type code this value is written with.
    #[must_use]
    pub const fn type_code(&self) -> TypeCode {
        match self {
            Self::Null => TypeCode::Null,
            Self::Boolean(_) => TypeCode::Boolean,
            Self::Byte(_) => TypeCode::Byte,
            Self::SByte(_) => TypeCode::SByte,
            Self::Int16(_) => TypeCode::Int16,
            Self::UInt16(_) => TypeCode::UInt16,
            Self::Int32(_) => TypeCode::Int32,
            Self::UInt32(_) => TypeCode::UInt32,
            Self::Int64(_) => TypeCode::Int64,
            Self::UInt64(_) => TypeCode::UInt64,
            Self::Single(_) => TypeCode::Single,
            Self::Double(_) => TypeCode::Double,
            Self::Decimal(_) => TypeCode::Decimal,
            Self::DateTime(_) => TypeCode::DateTime,
            Self::Duration(_) => TypeCode::Duration,
            Self::Char(_) => TypeCode::Char,
            Self::String(_) => TypeCode::String,
            Self::Enum(_) => TypeCode::Enum,
            Self::Bytes(_) => TypeCode::Bytes,
            Self::Identifier(_) => TypeCode::Identifier,
            Self::Array(_) => TypeCode::Array,
            Self::TypedArray(..) => TypeCode::TypedArray,
            Self::Object(_) => TypeCode::Object,
            Self::Min => TypeCode::Min,
            Self::Max => TypeCode::Max,
        }
    }

    /// The ordering class of this value.
    #[must_use]
    pub const fn class(&self) -> ValueClass {
        match self {
            Self::Min => ValueClass::Min,
            Self::Null => ValueClass::Null,
            Self::Boolean(_) => ValueClass::Boolean,
            Self::Byte(_)
            | Self::SByte(_)
            | Self::Int16(_)
            | Self::UInt16(_)
            | Self::Int32(_)
            | Self::UInt32(_)
            | Self::Int64(_)
            | Self::UInt64(_)
            | Self::Single(_)
            | Self::Double(_)
            | Self::Decimal(_) => ValueClass::Number,
            Self::DateTime(_) => ValueClass::DateTime,
            Self::Duration(_) => ValueClass::Duration,
            Self::Char(_) | Self::String(_) | Self::Enum(_) => ValueClass::Text,
            Self::Bytes(_) => ValueClass::Bytes,
            Self::Identifier(_) => ValueClass::Identifier,
            Self::Array(_) | Self::TypedArray(..) => ValueClass::Array,
            Self::Object(_) => ValueClass::Object,
            Self::Max => ValueClass::Max,
        }
    }

    fn as_number(&self) -> Option<Number> {
        let n = match self {
            Self::Byte(v) => Number::Int(i128::from(*v)),
            Self::SByte(v) => Number::Int(i128::from(*v)),
            Self::Int16(v) => Number::Int(i128::from(*v)),
            Self::UInt16(v) => Number::Int(i128::from(*v)),
            Self::Int32(v) => Number::Int(i128::from(*v)),
            Self::UInt32(v) => Number::Int(i128::from(*v)),
            Self::Int64(v) => Number::Int(i128::from(*v)),
            Self::UInt64(v) => Number::Int(i128::from(*v)),
            Self::Single(v) => Number::Float(f64::from(*v)),
            Self::Double(v) => Number::Float(*v),
            Self::Decimal(v) => Number::Decimal(*v),
            _ => return None,
        };
        Some(n)
    }

    /// Text content of `Char`, `String` and `Enum` values.
    #[must_use]
    pub fn as_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            Self::Char(c) => Some(std::borrow::Cow::Owned(c.to_string())),
            Self::String(s) | Self::Enum(s) => Some(std::borrow::Cow::Borrowed(s)),
            _ => None,
        }
    }

    /// Elements of an array value.
    #[must_use]
    pub fn as_elements(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) | Self::TypedArray(_, items) => Some(items),
            _ => None,
        }
    }

    /// Total order across all values.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.class(), other.class());
        if a != b {
            return a.cmp(&b);
        }
        self.compare_same_class(other).unwrap_or(Ordering::Equal)
    }

    /// Compare two values of the same class. Returns `None` across classes.
    ///
    /// This is the comparison filters use: `Null` only equals `Null`, and a
    /// number never equals a string.
    #[must_use]
    pub fn partial_compare(&self, other: &Self) -> Option<Ordering> {
        if self.class() != other.class() {
            return None;
        }
        self.compare_same_class(other)
    }

    fn compare_same_class(&self, other: &Self) -> Option<Ordering> {
        let ordering = match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Duration(a), Self::Duration(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::Identifier(a), Self::Identifier(b)) => a.cmp(b),
            (Self::Object(a), Self::Object(b)) => a.total_cmp(b),
            _ => match self.class() {
                ValueClass::Min | ValueClass::Null | ValueClass::Max => Ordering::Equal,
                ValueClass::Number => self.as_number()?.compare(other.as_number()?),
                ValueClass::Text => self.as_text()?.cmp(&other.as_text()?),
                ValueClass::Array => compare_elements(self.as_elements()?, other.as_elements()?),
                _ => return None,
            },
        };
        Some(ordering)
    }
}

/// Lexicographic comparison of two element lists.
fn compare_elements(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = x.total_cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Byte(v) => write!(f, "{v}"),
            Self::SByte(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Single(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{v}"),
            Self::Duration(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "{v}"),
            Self::String(v) | Self::Enum(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::Identifier(v) => write!(f, "{v}"),
            Self::Array(items) | Self::TypedArray(_, items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Object(doc) => write!(f, "{doc}"),
            Self::Min => write!(f, "<min>"),
            Self::Max => write!(f, "<max>"),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Boolean,
    u8 => Byte,
    i8 => SByte,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Single,
    f64 => Double,
    Decimal => Decimal,
    OffsetDateTime => DateTime,
    Duration => Duration,
    char => Char,
    String => String,
    ObjectId => Identifier,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Self::Object(Box::new(doc))
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        let items: Vec<Self> = items.into_iter().map(Into::into).collect();
        let first = items.first().map(Self::type_code);
        match first {
            Some(code)
                if code.is_typed_element() && items.iter().all(|v| v.type_code() == code) =>
            {
                Self::TypedArray(code, items)
            }
            _ => Self::Array(items),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_numbers_compare_across_widths() {
        assert_eq!(
            Value::Byte(5).partial_compare(&Value::Int64(5)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Int32(-1).partial_compare(&Value::UInt64(1)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Double(2.5).partial_compare(&Value::Int16(2)),
            Some(Ordering::Greater)
        );
        let d: Decimal = "2.50".parse().expect("decimal");
        assert_eq!(
            Value::Decimal(d).partial_compare(&Value::Double(2.5)),
            Some(Ordering::Equal)
        );
    }

    fn decimal(text: &str) -> Value {
        Value::Decimal(text.parse().expect("decimal"))
    }

    #[test]
    fn test_numbers_near_double_precision() {
        let big = 1i64 << 53;
        let cases = [
            (Value::Int64(big + 1), Value::Double(2f64.powi(53)), Ordering::Greater),
            (Value::Int64(big), Value::Double(2f64.powi(53)), Ordering::Equal),
            (Value::Int64(i64::MAX), Value::Double(2f64.powi(63)), Ordering::Less),
            (Value::UInt64(u64::MAX), Value::Double(2f64.powi(64)), Ordering::Less),
            (decimal("9007199254740993"), Value::Double(2f64.powi(53)), Ordering::Greater),
            (decimal("0.1"), Value::Double(0.1), Ordering::Less),
            (Value::Single(0.1), Value::Double(0.1), Ordering::Greater),
            (decimal("-0.5"), Value::Double(-0.5), Ordering::Equal),
            (Value::Int32(0), Value::Double(-0.0), Ordering::Equal),
            (Value::Int64(i64::MIN), Value::Double(f64::NEG_INFINITY), Ordering::Greater),
            (Value::Double(f64::INFINITY), Value::Double(f64::NAN), Ordering::Less),
            (Value::Double(f64::NAN), Value::Double(-f64::NAN), Ordering::Equal),
        ];
        for (a, b, expected) in cases {
            assert_eq!(a.partial_compare(&b), Some(expected), "{a:?} vs {b:?}");
            assert_eq!(b.partial_compare(&a), Some(expected.reverse()), "{b:?} vs {a:?}");
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn number_pool() -> Vec<Value> {
        let big = 1i64 << 53;
        let mut pool = vec![
            Value::Int64(big - 1),
            Value::Int64(big),
            Value::Int64(big + 1),
            Value::Int64(i64::MAX),
            Value::UInt64(u64::MAX),
            Value::Int32(0),
            Value::Int32(-1),
            Value::Double(2f64.powi(53)),
            Value::Double(2f64.powi(53) + 2.0),
            Value::Double(2f64.powi(63)),
            Value::Double(-0.0),
            Value::Double(0.1),
            Value::Double(-1.5),
            Value::Double(f64::NAN),
            Value::Double(f64::INFINITY),
            Value::Double(f64::NEG_INFINITY),
            Value::Single(0.1),
            decimal("0.1"),
            decimal("-1.5"),
            decimal("9007199254740993"),
            decimal("9007199254740992.5"),
            decimal("0.0000000000000000000000000001"),
        ];
        let mut rng = StdRng::seed_from_u64(53);
        for _ in 0..24 {
            let n = big + rng.random_range(-4i64..=4);
            pool.push(match rng.random_range(0..3) {
                0 => Value::Int64(n),
                1 => Value::Double(n as f64 + 0.5),
                _ => Value::Decimal(
                    Decimal::new(i128::from(n) * 10 + rng.random_range(0..10), 1).expect("scale"),
                ),
            });
        }
        pool
    }

    #[test]
    fn test_mixed_number_order_is_transitive() {
        let pool = number_pool();
        for a in &pool {
            for b in &pool {
                let ab = a.total_cmp(b);
                assert_eq!(ab, b.total_cmp(a).reverse(), "{a:?} vs {b:?}");
                for c in &pool {
                    if ab.is_le() && b.total_cmp(c).is_le() {
                        assert!(a.total_cmp(c).is_le(), "{a:?} <= {b:?} <= {c:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_cross_class_is_incomparable() {
        assert_eq!(Value::Int32(1).partial_compare(&Value::from("1")), None);
        assert_eq!(Value::Null.partial_compare(&Value::Int32(0)), None);
        assert_eq!(
            Value::Null.partial_compare(&Value::Null),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_total_order_by_class() {
        let ordered = [
            Value::Min,
            Value::Null,
            Value::Boolean(true),
            Value::Int32(-100),
            Value::Duration(Duration::seconds(1)),
            Value::from("abc"),
            Value::Bytes(vec![0]),
            Value::Identifier(ObjectId::from_u128(1)),
            Value::Array(Vec::new()),
            Value::Max,
        ];
        for pair in ordered.windows(2) {
            assert_eq!(pair[0].total_cmp(&pair[1]), Ordering::Less, "{pair:?}");
        }
    }

    #[test]
    fn test_text_kinds_compare_as_text() {
        assert_eq!(
            Value::Char('b').partial_compare(&Value::from("b")),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Enum("Red".to_string()).partial_compare(&Value::from("Blue")),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn test_vec_becomes_typed_array() {
        let v = Value::from(vec![1i32, 2, 3]);
        assert!(matches!(v, Value::TypedArray(TypeCode::Int32, ref items) if items.len() == 3));

        let mixed = Value::from(vec![Value::Int32(1), Value::from("x")]);
        assert!(matches!(mixed, Value::Array(_)));
    }
}
