//! Persistent types and index definitions.
//!
//! A type becomes storable by implementing [`Persistent`]: it names its
//! collection, declares its indices and converts itself to and from a
//! [`Document`]. The conversion pair is resolved statically, once per
//! collection, so no type inspection happens on the read or write path.

use std::collections::HashSet;

use crate::codec::DecodeError;
use crate::codec::document::Document;
use crate::codec::reader::BinaryReader;
use crate::codec::writer::BinaryWriter;
use crate::types::ObjectId;

/// A type that can be stored in a collection.
pub trait Persistent: Sized + Send + Sync + 'static {
    /// Collection (file set) the type is stored in.
    const COLLECTION: &'static str;

    /// Type name written into every stored document.
    const TYPE_NAME: &'static str;

    /// Identifier of this object, if it has been stored.
    fn object_id(&self) -> Option<ObjectId>;

    /// Called with the identifier assigned on first insert.
    fn set_object_id(&mut self, id: ObjectId);

    /// Secondary indices maintained for this collection.
    #[must_use]
    fn indices() -> Vec<IndexDefinition> {
        Vec::new()
    }

    /// Convert to a document for storage.
    fn to_document(&self) -> Document;

    /// Rebuild from a stored document.
    fn from_document(doc: &Document) -> Result<Self, DecodeError>;
}

/// Sort direction of one index field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Apply the direction to an ascending comparison result.
    #[must_use]
    pub const fn apply(self, ord: std::cmp::Ordering) -> std::cmp::Ordering {
        match self {
            Self::Ascending => ord,
            Self::Descending => ord.reverse(),
        }
    }
}

/// One field of an index definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexField {
    pub name: String,
    pub direction: SortDirection,
}

impl IndexField {
    /// Parse a sort-order token: `Name` is ascending, `-Name` descending.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token.strip_prefix('-') {
            Some(name) => Self {
                name: name.to_string(),
                direction: SortDirection::Descending,
            },
            None => Self {
                name: token.strip_prefix('+').unwrap_or(token).to_string(),
                direction: SortDirection::Ascending,
            },
        }
    }
}

impl std::fmt::Display for IndexField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.direction {
            SortDirection::Ascending => write!(f, "{}", self.name),
            SortDirection::Descending => write!(f, "-{}", self.name),
        }
    }
}

/// An ordered list of fields covered by one secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexDefinition {
    fields: Vec<IndexField>,
}

impl IndexDefinition {
    /// Build a definition from sort-order tokens such as `["Name", "-Age"]`.
    pub fn new<S: AsRef<str>>(tokens: &[S]) -> Result<Self, ConstraintError> {
        Self::from_fields(tokens.iter().map(|t| IndexField::parse(t.as_ref())).collect())
    }

    /// Build a definition from explicit fields, validating it.
    pub fn from_fields(fields: Vec<IndexField>) -> Result<Self, ConstraintError> {
        if fields.is_empty() {
            return Err(ConstraintError::EmptyIndex);
        }
        let mut seen = HashSet::new();
        for field in &fields {
            validate_name(&field.name)?;
            if !seen.insert(field.name.as_str()) {
                return Err(ConstraintError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    #[must_use]
    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    /// Names of the covered fields in declared order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// File-name-safe stem, e.g. `Name_asc.Age_desc`.
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.fields
            .iter()
            .map(|f| match f.direction {
                SortDirection::Ascending => format!("{}_asc", f.name),
                SortDirection::Descending => format!("{}_desc", f.name),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Serialize for the index file header.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = BinaryWriter::new();
        w.write_varint(self.fields.len() as u128);
        for field in &self.fields {
            w.write_u8(match field.direction {
                SortDirection::Ascending => 0,
                SortDirection::Descending => 1,
            });
            w.write_str(&field.name);
        }
        w.into_bytes()
    }

    /// Parse a definition stored in an index file header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = BinaryReader::new(bytes);
        let count = r.read_len()?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let direction = match r.read_u8()? {
                0 => SortDirection::Ascending,
                1 => SortDirection::Descending,
                other => {
                    return Err(DecodeError::InvalidValue(format!("sort direction {other}")));
                }
            };
            let name = r.read_string()?;
            fields.push(IndexField { name, direction });
        }
        r.finish()?;
        Self::from_fields(fields).map_err(|e| DecodeError::InvalidValue(e.to_string()))
    }
}

impl std::fmt::Display for IndexDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.fields.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Check that a collection or field name is usable in file names.
pub fn validate_name(name: &str) -> Result<(), ConstraintError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(ConstraintError::InvalidName(name.to_string()))
    }
}

/// Malformed collection or index definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    /// An index with no fields.
    EmptyIndex,
    /// A field listed twice in one index.
    DuplicateField(String),
    /// The same index declared twice on one collection.
    DuplicateIndex(String),
    /// A collection or field name with unsupported characters.
    InvalidName(String),
    /// An index file whose stored definition differs from the declared one.
    DefinitionMismatch { expected: String, found: String },
}

impl std::fmt::Display for ConstraintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyIndex => write!(f, "index must cover at least one field"),
            Self::DuplicateField(name) => write!(f, "field {name} listed twice in index"),
            Self::DuplicateIndex(def) => write!(f, "index {def} declared twice"),
            Self::InvalidName(name) => write!(
                f,
                "invalid name {name:?}: use 1-64 ASCII letters, digits or underscores"
            ),
            Self::DefinitionMismatch { expected, found } => {
                write!(f, "index file defines {found}, expected {expected}")
            }
        }
    }
}

impl std::error::Error for ConstraintError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        let def = IndexDefinition::new(&["Name", "-Age", "+City"]).expect("valid");
        let dirs: Vec<SortDirection> = def.fields().iter().map(|f| f.direction).collect();
        assert_eq!(
            dirs,
            vec![
                SortDirection::Ascending,
                SortDirection::Descending,
                SortDirection::Ascending
            ]
        );
        assert_eq!(def.file_stem(), "Name_asc.Age_desc.City_asc");
        assert_eq!(def.to_string(), "[Name, -Age, City]");
    }

    #[test]
    fn test_invalid_definitions() {
        assert_eq!(
            IndexDefinition::new::<&str>(&[]),
            Err(ConstraintError::EmptyIndex)
        );
        assert_eq!(
            IndexDefinition::new(&["A", "-A"]),
            Err(ConstraintError::DuplicateField("A".to_string()))
        );
        assert!(matches!(
            IndexDefinition::new(&["bad name"]),
            Err(ConstraintError::InvalidName(_))
        ));
    }

    #[test]
    fn test_definition_bytes() {
        let def = IndexDefinition::new(&["-Score", "Name"]).expect("valid");
        let back = IndexDefinition::from_bytes(&def.to_bytes()).expect("parse");
        assert_eq!(back, def);
    }
}
