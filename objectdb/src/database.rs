//! Database facade.
//!
//! A [`Database`] is an explicitly opened handle over a directory (or an
//! in-memory file set). It owns a registry of open collections; each
//! collection is opened on first use and shared by every caller through an
//! `Arc`.
//!
//! # Thread Safety
//!
//! The registry and every collection sit behind `tokio::sync::RwLock`s:
//! - Any number of reads and cursor pulls proceed concurrently
//! - A mutation holds its collection's write lock for the whole logical
//!   operation (primary tree, BLOBs, every index)
//!
//! # Invariants
//!
//! - Each collection name maps to exactly one [`Collection`] for the life of
//!   the handle
//! - After [`Database::shutdown`] every operation fails with
//!   [`DatabaseError::Closed`]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::codec::{ConstraintError, DecodeError, IndexDefinition, Persistent, validate_name};
use crate::collection::{Collection, collection_names};
use crate::config::{ConfigError, DatabaseConfig};
use crate::query::{Cursor, DocumentCursor, Filter, QueryPlan, parse_sort_order};
use crate::storage::{FaultHandle, IntegrityReport, StorageError};
use crate::types::ObjectId;

/// Error returned by database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// I/O failure or structural corruption.
    Storage(StorageError),
    /// A stored value could not be decoded into the requested shape.
    Decode(DecodeError),
    /// A malformed collection or index definition.
    Constraint(ConstraintError),
    /// Invalid configuration.
    Config(ConfigError),
    /// The database has been shut down.
    Closed,
    /// No collection with this name is open.
    UnknownCollection(String),
    /// The object has never been stored, so it has no identifier.
    MissingObjectId,
    /// An object with this identifier is already stored.
    DuplicateObject(ObjectId),
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Constraint(e) => write!(f, "constraint error: {e}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Closed => write!(f, "database is closed"),
            Self::UnknownCollection(name) => write!(f, "unknown collection: {name}"),
            Self::MissingObjectId => write!(f, "object has no identifier"),
            Self::DuplicateObject(id) => write!(f, "object {id} already exists"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Constraint(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Closed
            | Self::UnknownCollection(_)
            | Self::MissingObjectId
            | Self::DuplicateObject(_) => None,
        }
    }
}

impl From<StorageError> for DatabaseError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Decode(e) => Self::Decode(e),
            StorageError::Constraint(e) => Self::Constraint(e),
            e => Self::Storage(e),
        }
    }
}

impl From<DecodeError> for DatabaseError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<ConstraintError> for DatabaseError {
    fn from(e: ConstraintError) -> Self {
        Self::Constraint(e)
    }
}

impl From<ConfigError> for DatabaseError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Handle to an open database.
pub struct Database {
    config: DatabaseConfig,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    closed: AtomicBool,
}

impl Database {
    /// Open a database, creating its directory if needed.
    ///
    /// Collections are opened lazily; see
    /// [`open_collections`](Self::open_collections) to open every collection
    /// already present in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the directory
    /// cannot be created.
    pub async fn open(config: DatabaseConfig) -> Result<Self, DatabaseError> {
        config.validate()?;
        if !config.in_memory {
            tokio::fs::create_dir_all(&config.directory)
                .await
                .map_err(StorageError::from)?;
        }
        info!(
            directory = %config.directory.display(),
            in_memory = config.in_memory,
            block_size = config.block_size,
            blob_threshold = config.blob_threshold,
            "opened database"
        );
        Ok(Self {
            config,
            collections: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::Acquire) {
            Err(DatabaseError::Closed)
        } else {
            Ok(())
        }
    }

    /// Open a collection, creating its files and any missing index.
    ///
    /// If the collection is already open, indices missing from it are added
    /// (and backfilled) and the shared handle is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintError`] for an invalid name or a definition listed
    /// twice, and storage errors from opening the files.
    #[allow(clippy::significant_drop_tightening)] // The write lock must cover the open.
    pub async fn register_collection(
        &self,
        name: &str,
        definitions: &[IndexDefinition],
    ) -> Result<Arc<Collection>, DatabaseError> {
        self.ensure_open()?;
        validate_name(name)?;
        let mut declared = HashSet::new();
        for definition in definitions {
            if !declared.insert(definition) {
                return Err(ConstraintError::DuplicateIndex(definition.to_string()).into());
            }
        }

        // Fast path: already open.
        let existing = self.collections.read().await.get(name).cloned();
        if let Some(collection) = existing {
            collection.ensure_indices(definitions).await?;
            return Ok(collection);
        }

        let mut collections = self.collections.write().await;
        // Another task may have opened it while we waited for the write lock.
        if let Some(collection) = collections.get(name) {
            let collection = Arc::clone(collection);
            drop(collections);
            collection.ensure_indices(definitions).await?;
            return Ok(collection);
        }
        self.ensure_open()?;

        let collection = Arc::new(Collection::open(name, &self.config, definitions)?);
        collections.insert(name.to_string(), Arc::clone(&collection));
        info!(collection = name, indices = definitions.len(), "registered collection");
        Ok(collection)
    }

    /// Open every collection that has files in the database directory.
    ///
    /// Returns the collection names. In-memory databases have none.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or a collection
    /// fails to open.
    pub async fn open_collections(&self) -> Result<Vec<String>, DatabaseError> {
        self.ensure_open()?;
        if self.config.in_memory {
            return Ok(Vec::new());
        }
        let names = collection_names(&self.config.directory)?;
        for name in &names {
            self.register_collection(name, &[]).await?;
        }
        Ok(names)
    }

    /// An open collection.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::UnknownCollection`] if it has not been
    /// registered.
    pub async fn collection(&self, name: &str) -> Result<Arc<Collection>, DatabaseError> {
        self.ensure_open()?;
        self.collections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownCollection(name.to_string()))
    }

    async fn collection_for<T: Persistent>(&self) -> Result<Arc<Collection>, DatabaseError> {
        self.register_collection(T::COLLECTION, &T::indices()).await
    }

    /// Names of the open collections, sorted.
    pub async fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Store a new object, assigning it an identifier if it has none.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::DuplicateObject`] if the object carries an
    /// identifier that is already stored. Any storage failure aborts the
    /// whole insert.
    pub async fn insert<T: Persistent>(&self, object: &mut T) -> Result<ObjectId, DatabaseError> {
        let collection = self.collection_for::<T>().await?;
        let doc = object.to_document();
        let id = match object.object_id().filter(|id| !id.is_nil()) {
            Some(id) => {
                if !collection.insert(&id, &doc).await? {
                    return Err(DatabaseError::DuplicateObject(id));
                }
                id
            }
            None => loop {
                let id = ObjectId::new_random();
                if collection.insert(&id, &doc).await? {
                    break id;
                }
                debug!(%id, "identifier collision, retrying");
            },
        };
        object.set_object_id(id);
        Ok(id)
    }

    /// Replace a stored object. Returns `false` if it is not stored.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::MissingObjectId`] if the object has no
    /// identifier.
    pub async fn update<T: Persistent>(&self, object: &T) -> Result<bool, DatabaseError> {
        let id = object.object_id().ok_or(DatabaseError::MissingObjectId)?;
        let collection = self.collection_for::<T>().await?;
        collection.update(&id, &object.to_document()).await
    }

    /// Delete a stored object. Returns `false` if it is not stored.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::MissingObjectId`] if the object has no
    /// identifier.
    pub async fn delete<T: Persistent>(&self, object: &T) -> Result<bool, DatabaseError> {
        let id = object.object_id().ok_or(DatabaseError::MissingObjectId)?;
        self.delete_by_id::<T>(&id).await
    }

    /// Delete by identifier. Returns `false` if nothing was stored under it.
    pub async fn delete_by_id<T: Persistent>(&self, id: &ObjectId) -> Result<bool, DatabaseError> {
        self.collection_for::<T>().await?.delete(id).await
    }

    /// Load one object. A missing identifier is `Ok(None)`.
    pub async fn get<T: Persistent>(&self, id: &ObjectId) -> Result<Option<T>, DatabaseError> {
        let collection = self.collection_for::<T>().await?;
        let Some(doc) = collection.get(id).await? else {
            return Ok(None);
        };
        let mut object = T::from_document(&doc)?;
        object.set_object_id(*id);
        Ok(Some(object))
    }

    /// Number of stored objects of a type.
    pub async fn count<T: Persistent>(&self) -> Result<u64, DatabaseError> {
        self.collection_for::<T>().await?.count().await
    }

    /// Query objects of a type.
    ///
    /// Results skip the first `offset` matches and stop after `max_count`.
    /// `sort_order` lists field names, each optionally prefixed with `-` for
    /// descending order. An index whose leading fields match the sort order
    /// drives the scan; otherwise the matches are sorted in memory.
    pub async fn find<T: Persistent>(
        &self,
        offset: usize,
        max_count: usize,
        filter: Option<Filter>,
        sort_order: &[&str],
    ) -> Result<Cursor<T>, DatabaseError> {
        let collection = self.collection_for::<T>().await?;
        let cursor = Self::cursor(collection, offset, max_count, filter, sort_order).await?;
        Ok(Cursor::new(cursor))
    }

    /// Query the documents of a collection by name.
    pub async fn find_documents(
        &self,
        collection: &str,
        offset: usize,
        max_count: usize,
        filter: Option<Filter>,
        sort_order: &[&str],
    ) -> Result<DocumentCursor, DatabaseError> {
        let collection = self.collection(collection).await?;
        Self::cursor(collection, offset, max_count, filter, sort_order).await
    }

    async fn cursor(
        collection: Arc<Collection>,
        offset: usize,
        max_count: usize,
        filter: Option<Filter>,
        sort_order: &[&str],
    ) -> Result<DocumentCursor, DatabaseError> {
        let definitions = collection.definitions().await?;
        let complete = collection.complete_indices().await?;
        let sort = parse_sort_order(sort_order);
        let plan = QueryPlan::with_coverage(&definitions, filter.as_ref(), &sort, |d| {
            complete.contains(d)
        });
        debug!(
            collection = collection.name(),
            ?filter,
            ?plan,
            "planned query"
        );
        Ok(DocumentCursor::new(
            collection,
            plan,
            filter,
            offset,
            Some(max_count),
        ))
    }

    /// Verify the files of one collection.
    pub async fn verify(&self, collection: &str) -> Result<IntegrityReport, DatabaseError> {
        self.collection(collection).await?.verify().await
    }

    /// Fault controls of one file of an in-memory database.
    pub async fn fault_handle(
        &self,
        collection: &str,
        file_name: &str,
    ) -> Result<Option<FaultHandle>, DatabaseError> {
        Ok(self.collection(collection).await?.fault_handle(file_name))
    }

    /// Close every collection. Later operations fail with
    /// [`DatabaseError::Closed`].
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let collections: Vec<Arc<Collection>> =
            self.collections.read().await.values().cloned().collect();
        for collection in &collections {
            collection.close().await;
        }
        info!(collections = collections.len(), "database shut down");
    }
}
