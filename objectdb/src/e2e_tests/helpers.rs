//! Common helpers for end-to-end tests.

use std::path::Path;

use crate::codec::{DecodeError, Document, IndexDefinition, Persistent};
use crate::config::DatabaseConfig;
use crate::database::Database;
use crate::types::ObjectId;

#[allow(clippy::expect_used)]
fn definition(tokens: &[&str]) -> IndexDefinition {
    IndexDefinition::new(tokens).expect("valid index definition")
}

/// A person with two indices: `[Age]` and `[Name, -Age]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: Option<ObjectId>,
    pub name: String,
    pub age: i32,
    pub bio: Option<String>,
}

impl Person {
    pub fn new(name: &str, age: i32) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            age,
            bio: None,
        }
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }
}

impl Persistent for Person {
    const COLLECTION: &'static str = "Person";
    const TYPE_NAME: &'static str = "Person";

    fn object_id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }

    fn indices() -> Vec<IndexDefinition> {
        vec![definition(&["Age"]), definition(&["Name", "-Age"])]
    }

    fn to_document(&self) -> Document {
        let mut doc = Document::new(Self::TYPE_NAME)
            .with("Name", self.name.as_str())
            .with("Age", self.age);
        if let Some(bio) = &self.bio {
            doc.set("Bio", bio.as_str());
        }
        doc
    }

    fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        Ok(Self {
            id: None,
            name: doc.field("Name")?,
            age: doc.field("Age")?,
            bio: doc.field("Bio")?,
        })
    }
}

/// Two integer fields under a composite `[A, B]` index.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub id: Option<ObjectId>,
    pub a: i32,
    pub b: i32,
}

impl Pair {
    pub const fn new(a: i32, b: i32) -> Self {
        Self { id: None, a, b }
    }
}

impl Persistent for Pair {
    const COLLECTION: &'static str = "Pair";
    const TYPE_NAME: &'static str = "Pair";

    fn object_id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }

    fn indices() -> Vec<IndexDefinition> {
        vec![definition(&["A", "B"])]
    }

    fn to_document(&self) -> Document {
        Document::new(Self::TYPE_NAME)
            .with("A", self.a)
            .with("B", self.b)
    }

    fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        Ok(Self {
            id: None,
            a: doc.field("A")?,
            b: doc.field("B")?,
        })
    }
}

/// An unindexed record with a sortable field.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub id: Option<ObjectId>,
    pub field: i64,
    pub label: String,
}

impl Ranked {
    pub fn new(field: i64, label: &str) -> Self {
        Self {
            id: None,
            field,
            label: label.to_string(),
        }
    }
}

impl Persistent for Ranked {
    const COLLECTION: &'static str = "Ranked";
    const TYPE_NAME: &'static str = "Ranked";

    fn object_id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_object_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }

    fn to_document(&self) -> Document {
        Document::new(Self::TYPE_NAME)
            .with("Field", self.field)
            .with("Label", self.label.as_str())
    }

    fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        Ok(Self {
            id: None,
            field: doc.field("Field")?,
            label: doc.field("Label")?,
        })
    }
}

/// A fresh in-memory database with small blocks, so trees split early.
pub async fn memory_database() -> Database {
    memory_database_with(DatabaseConfig::in_memory().with_block_size(1024).with_blob_threshold(64))
        .await
}

#[allow(clippy::expect_used)]
pub async fn memory_database_with(config: DatabaseConfig) -> Database {
    Database::open(config).await.expect("open in-memory database")
}

/// A database in `dir` with small blocks.
#[allow(clippy::expect_used)]
pub async fn directory_database(dir: &Path) -> Database {
    let config = DatabaseConfig::new(dir)
        .with_block_size(1024)
        .with_blob_threshold(64);
    Database::open(config).await.expect("open database directory")
}

/// Assert that a collection passes every integrity check.
pub async fn assert_healthy(database: &Database, collection: &str) {
    #[allow(clippy::expect_used)]
    let report = database.verify(collection).await.expect("verify");
    assert!(report.is_ok(), "{report}");
}
