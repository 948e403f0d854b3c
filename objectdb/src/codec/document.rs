//! Documents: a type name plus an ordered list of named fields.
//!
//! A document is what every stored object is converted to before encoding.
//! Field order is preserved so re-encoding an unchanged document produces
//! identical bytes.

use std::cmp::Ordering;

use crate::codec::DecodeError;
use crate::codec::convert::FromValue;
use crate::codec::reader::BinaryReader;
use crate::codec::value::Value;
use crate::codec::writer::BinaryWriter;

/// A named, ordered collection of field values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    type_name: String,
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Create an empty document.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing an existing value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Get a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Iterate over `(name, value)` pairs in stored order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Decode a field into a typed value.
    ///
    /// A missing field reads as `Null`, so `Option<T>` targets see `None` and
    /// other targets fail with [`DecodeError::MissingField`].
    pub fn field<T: FromValue>(&self, name: &str) -> Result<T, DecodeError> {
        match self.get(name) {
            Some(value) => T::from_value(value).map_err(|e| e.in_field(name)),
            None => T::from_value(&Value::Null).map_err(|e| match e {
                DecodeError::UnexpectedNull => DecodeError::MissingField(name.to_string()),
                other => other.in_field(name),
            }),
        }
    }

    /// Total order used when documents are compared as values.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.type_name.cmp(&other.type_name).then_with(|| {
            for ((an, av), (bn, bv)) in self.fields.iter().zip(&other.fields) {
                let ord = an.cmp(bn).then_with(|| av.total_cmp(bv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            self.fields.len().cmp(&other.fields.len())
        })
    }

    /// Encode the document body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = BinaryWriter::new();
        w.write_document(self);
        w.into_bytes()
    }

    /// Decode a document body, requiring all input to be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = BinaryReader::new(bytes);
        let doc = r.read_document()?;
        r.finish()?;
        Ok(doc)
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {{", self.type_name)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {name}: {value}")?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut doc = Document::new("T").with("a", 1i32).with("b", 2i32);
        doc.set("a", 10i32);
        let names: Vec<&str> = doc.fields().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(doc.get("a"), Some(&Value::Int32(10)));
    }

    #[test]
    fn test_encode_decode() {
        let doc = Document::new("Person")
            .with("Name", "Ada")
            .with("Age", 36u8)
            .with("Tags", vec!["math", "engines"])
            .with("Manager", Option::<String>::None);
        let decoded = Document::decode(&doc.encode()).expect("decode");
        assert_eq!(decoded, doc);
        assert_eq!(decoded.type_name(), "Person");
    }

    #[test]
    fn test_typed_field_access() {
        let doc = Document::new("T").with("n", 7u8);
        assert_eq!(doc.field::<i64>("n").expect("widen"), 7);
        assert_eq!(doc.field::<Option<i32>>("missing").expect("option"), None);
        assert!(matches!(
            doc.field::<i32>("missing"),
            Err(DecodeError::MissingField(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_display() {
        let doc = Document::new("P").with("x", 1i32);
        assert_eq!(doc.to_string(), "P { x: 1 }");
    }
}
