//! Object identifier type.
//!
//! Every stored object is keyed by a 128-bit identifier. Identifiers are
//! immutable once assigned and order byte-lexicographically, which is the
//! order the primary B+Tree places objects in.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

/// Size of an object identifier in bytes.
pub const OBJECT_ID_SIZE: usize = 16;

/// A unique 128-bit object identifier.
///
/// # Invariants
///
/// - The ID is exactly 16 bytes.
/// - Ordering is byte-lexicographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId(pub [u8; OBJECT_ID_SIZE]);

impl ObjectId {
    /// The all-zero identifier. Never assigned to a stored object.
    pub const NIL: Self = Self([0u8; OBJECT_ID_SIZE]);

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new_random() -> Self {
        let mut rng = rand::rng();
        loop {
            let bytes: [u8; OBJECT_ID_SIZE] = rng.random();
            if bytes != Self::NIL.0 {
                return Self(bytes);
            }
        }
    }

    /// Create an identifier from a u128 (big-endian, so numeric order matches byte order).
    #[must_use]
    pub const fn from_u128(n: u128) -> Self {
        Self(n.to_be_bytes())
    }

    /// Get the underlying byte array.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; OBJECT_ID_SIZE] {
        &self.0
    }

    /// Check whether this is the nil identifier.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0 == Self::NIL.0
    }

    /// Read an identifier from the first 16 bytes of a slice.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; OBJECT_ID_SIZE] = bytes.get(..OBJECT_ID_SIZE)?.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    /// Parse a 32-character hex string, optionally containing `-` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: Vec<u8> = s.bytes().filter(|b| *b != b'-').collect();
        if hex.len() != OBJECT_ID_SIZE * 2 {
            return Err(ParseObjectIdError);
        }

        let mut bytes = [0u8; OBJECT_ID_SIZE];
        for (i, pair) in hex.chunks_exact(2).enumerate() {
            let hi = hex_digit(pair[0]).ok_or(ParseObjectIdError)?;
            let lo = hex_digit(pair[1]).ok_or(ParseObjectIdError)?;
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

const fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl From<[u8; OBJECT_ID_SIZE]> for ObjectId {
    fn from(bytes: [u8; OBJECT_ID_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<ObjectId> for [u8; OBJECT_ID_SIZE] {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// Error returned when parsing an identifier from text fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseObjectIdError;

impl fmt::Display for ParseObjectIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object id must be 32 hexadecimal digits")
    }
}

impl std::error::Error for ParseObjectIdError {}
