//! One collection: its primary, BLOB and index files behind a single lock.
//!
//! Every mutation runs with the write lock held and touches the files in
//! this order:
//!
//! ```text
//! primary tree (+ BLOB chains) ──► every index ──► flush: blobs, indices, objects
//!            │                          │
//!            └──── any error ───────────┴──► discard buffered changes everywhere
//! ```
//!
//! Block files buffer their writes until flushed, so an error before the
//! flush leaves every file exactly as it was. A flush that fails part way
//! rolls back the files already flushed. Readers take the read lock for
//! one pull at a time and therefore never see a half-applied mutation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tokio::sync::{RwLock, RwLockMappedWriteGuard, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::codec::{ConstraintError, Document, IndexDefinition};
use crate::config::DatabaseConfig;
use crate::database::DatabaseError;
use crate::storage::btree::{BytewiseComparator, LeafEntry};
use crate::storage::index_file::encode_index_key;
use crate::storage::integrity::{check_block_accounting, check_blobs, check_tree};
use crate::storage::object_file::record_blobs;
use crate::storage::{
    BlockDevice, BlockFile, FaultHandle, FileDevice, FileKind, IndexFile, IntegrityReport,
    MemoryDevice, ObjectFile, ObjectFileWriter, StorageError,
};
use crate::types::ObjectId;

const OBJECTS_EXTENSION: &str = "btree";
const BLOBS_EXTENSION: &str = "blob";
const INDEX_EXTENSION: &str = "index";

/// Where a database keeps its files.
#[derive(Debug, Clone)]
pub(crate) enum Location {
    Directory(PathBuf),
    Memory,
}

impl Location {
    pub(crate) fn from_config(config: &DatabaseConfig) -> Self {
        if config.in_memory {
            Self::Memory
        } else {
            Self::Directory(config.directory.clone())
        }
    }

    /// Open a file, creating it when it does not exist yet. The flag tells
    /// whether the file existed.
    fn open_file(
        &self,
        file_name: &str,
        faults: &mut HashMap<String, FaultHandle>,
    ) -> Result<(Box<dyn BlockDevice>, bool), StorageError> {
        match self {
            Self::Directory(dir) => {
                let path = dir.join(file_name);
                if path.exists() {
                    Ok((Box::new(FileDevice::open(&path)?), true))
                } else {
                    Ok((Box::new(FileDevice::create(&path)?), false))
                }
            }
            Self::Memory => {
                let device = MemoryDevice::new();
                faults.insert(file_name.to_string(), device.fault_handle());
                Ok((Box::new(device), false))
            }
        }
    }

    fn remove_file(&self, file_name: &str) {
        if let Self::Directory(dir) = self
            && let Err(e) = std::fs::remove_file(dir.join(file_name))
        {
            warn!(file = file_name, error = %e, "failed to remove file");
        }
    }

    /// Names of the index files present for a collection.
    fn index_files(&self, collection: &str) -> Result<Vec<String>, StorageError> {
        let Self::Directory(dir) = self else {
            return Ok(Vec::new());
        };
        let prefix = format!("{collection}.");
        let suffix = format!(".{INDEX_EXTENSION}");
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(&suffix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Collections that have a primary file in `dir`.
pub(crate) fn collection_names(dir: &Path) -> Result<Vec<String>, StorageError> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == OBJECTS_EXTENSION)
            && let Some(stem) = path.file_stem()
        {
            names.push(stem.to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// File name of a collection's primary tree.
#[must_use]
pub fn objects_file_name(collection: &str) -> String {
    format!("{collection}.{OBJECTS_EXTENSION}")
}

/// File name of a collection's BLOB file.
#[must_use]
pub fn blobs_file_name(collection: &str) -> String {
    format!("{collection}.{BLOBS_EXTENSION}")
}

/// File name of one of a collection's index files.
#[must_use]
pub fn index_file_name(collection: &str, definition: &IndexDefinition) -> String {
    format!("{collection}.{}.{INDEX_EXTENSION}", definition.file_stem())
}

fn open_block_file(
    location: &Location,
    file_name: &str,
    kind: FileKind,
    block_size: usize,
    faults: &mut HashMap<String, FaultHandle>,
) -> Result<BlockFile, StorageError> {
    let (device, existed) = location.open_file(file_name, faults)?;
    if existed {
        BlockFile::open(device, kind)
    } else {
        BlockFile::create(device, kind, block_size, Vec::new())
    }
}

/// One of the block files a commit flushes.
#[derive(Clone, Copy, Debug)]
enum FileSlot {
    Blobs,
    Index(usize),
    Objects,
}

/// The open files of a collection.
pub struct CollectionFiles {
    objects: BlockFile,
    blobs: BlockFile,
    indices: Vec<IndexFile>,
}

impl CollectionFiles {
    /// Read access to the stored objects.
    #[must_use]
    pub const fn objects(&self) -> ObjectFile<'_> {
        ObjectFile::new(&self.objects, &self.blobs)
    }

    #[must_use]
    pub fn indices(&self) -> &[IndexFile] {
        &self.indices
    }

    /// The open index with the given definition.
    #[must_use]
    pub fn index(&self, definition: &IndexDefinition) -> Option<&IndexFile> {
        self.indices.iter().find(|i| i.definition() == definition)
    }

    fn insert(
        &mut self,
        id: &ObjectId,
        doc: &Document,
        blob_threshold: usize,
    ) -> Result<bool, DatabaseError> {
        let mut writer = ObjectFileWriter::new(&mut self.objects, &mut self.blobs, blob_threshold);
        if !writer.insert(id, doc)? {
            return Ok(false);
        }
        for index in &mut self.indices {
            index.insert_document(doc, id)?;
        }
        Ok(true)
    }

    fn update(
        &mut self,
        id: &ObjectId,
        doc: &Document,
        blob_threshold: usize,
    ) -> Result<bool, DatabaseError> {
        let mut writer = ObjectFileWriter::new(&mut self.objects, &mut self.blobs, blob_threshold);
        let Some(old) = writer.update(id, doc)? else {
            return Ok(false);
        };
        for index in &mut self.indices {
            if index.values_for(&old) == index.values_for(doc) {
                continue;
            }
            index.remove_document(&old, id)?;
            index.insert_document(doc, id)?;
        }
        Ok(true)
    }

    fn delete(&mut self, id: &ObjectId, blob_threshold: usize) -> Result<bool, DatabaseError> {
        let mut writer = ObjectFileWriter::new(&mut self.objects, &mut self.blobs, blob_threshold);
        let Some(old) = writer.delete(id)? else {
            return Ok(false);
        };
        for index in &mut self.indices {
            index.remove_document(&old, id)?;
        }
        Ok(true)
    }

    /// Every stored object in identifier order.
    fn documents(&self) -> Result<Vec<(ObjectId, Document)>, DatabaseError> {
        let objects = self.objects();
        let mut cursor = objects.scan_after(None)?;
        let mut documents = Vec::new();
        while let Some(entry) = cursor.next_entry()? {
            let id = primary_key(&entry)?;
            documents.push((id, objects.decode_record(&entry.value)?));
        }
        Ok(documents)
    }

    /// Create an index file and fill it from the stored objects.
    fn add_index(
        &mut self,
        collection: &str,
        definition: &IndexDefinition,
        location: &Location,
        faults: &mut HashMap<String, FaultHandle>,
    ) -> Result<(), DatabaseError> {
        let file_name = index_file_name(collection, definition);
        let (device, _) = location.open_file(&file_name, faults)?;
        let mut index = IndexFile::create(device, self.objects.block_size(), definition.clone())?;

        let filled = self.documents().and_then(|documents| {
            for (id, doc) in &documents {
                index.insert_document(doc, id)?;
            }
            index.file_mut().flush()?;
            Ok(())
        });
        if let Err(e) = filled {
            warn!(collection, index = %definition, error = %e, "index backfill failed");
            location.remove_file(&file_name);
            return Err(e);
        }

        if !index.is_empty() {
            info!(collection, index = %definition, entries = index.len(), "backfilled index");
        }
        self.indices.push(index);
        Ok(())
    }

    fn file_mut(&mut self, slot: FileSlot) -> &mut BlockFile {
        match slot {
            FileSlot::Blobs => &mut self.blobs,
            FileSlot::Index(i) => self.indices[i].file_mut(),
            FileSlot::Objects => &mut self.objects,
        }
    }

    /// Flush every file, or none of them.
    ///
    /// Files flushed before a failing one are rolled back from their undo
    /// logs, newest first.
    fn commit(&mut self) -> Result<(), StorageError> {
        let slots = std::iter::once(FileSlot::Blobs)
            .chain((0..self.indices.len()).map(FileSlot::Index))
            .chain(std::iter::once(FileSlot::Objects));

        let mut flushed = Vec::new();
        for slot in slots {
            match self.file_mut(slot).flush_logged() {
                Ok(Some(undo)) => flushed.push((slot, undo)),
                Ok(None) => {}
                Err(e) => {
                    warn!(?slot, error = %e, rolled_back = flushed.len(), "commit failed");
                    for (slot, undo) in flushed.into_iter().rev() {
                        if let Err(rollback_error) = self.file_mut(slot).roll_back(undo) {
                            error!(?slot, error = %rollback_error, "failed to roll back flushed file");
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.blobs.discard();
        for index in &mut self.indices {
            index.file_mut().discard();
        }
        self.objects.discard();
    }

    fn verify(&self, collection: &str) -> IntegrityReport {
        let mut report = IntegrityReport::new(collection);
        let mut problems = Vec::new();

        let mut pointers = Vec::new();
        let mut unreadable = Vec::new();
        let objects_in_use = check_tree(
            &self.objects,
            &BytewiseComparator,
            "objects",
            &mut problems,
            &mut |entry: &LeafEntry| match record_blobs(&entry.value) {
                Ok(found) => pointers.extend(found),
                Err(e) => unreadable.push(format!(
                    "objects: record {} is unreadable: {e}",
                    describe_key(&entry.key)
                )),
            },
        );
        problems.extend(unreadable);
        check_block_accounting(&self.objects, "objects", &objects_in_use, &mut problems);

        let blobs_in_use = check_blobs(&self.blobs, &pointers, &mut problems);
        check_block_accounting(&self.blobs, "blobs", &blobs_in_use, &mut problems);

        let documents = if self.indices.is_empty() {
            Vec::new()
        } else {
            self.documents().unwrap_or_else(|e| {
                problems.push(format!("objects: cannot load documents: {e}"));
                Vec::new()
            })
        };
        for index in &self.indices {
            let label = format!("index {}", index.definition());
            let mut stored = HashSet::new();
            let in_use = check_tree(
                index.file(),
                index.comparator(),
                &label,
                &mut problems,
                &mut |entry: &LeafEntry| {
                    stored.insert(entry.key.clone());
                },
            );
            check_block_accounting(index.file(), &label, &in_use, &mut problems);

            let mut missing = 0usize;
            let mut expected = HashSet::new();
            for (id, doc) in &documents {
                if let Some(values) = index.values_for(doc) {
                    let key = encode_index_key(&values, id);
                    if !stored.contains(&key) {
                        missing += 1;
                    }
                    expected.insert(key);
                }
            }
            let extra = stored.difference(&expected).count();
            if missing > 0 || extra > 0 {
                problems.push(format!(
                    "{label}: {missing} missing and {extra} stray entries"
                ));
            }
            report
                .indices
                .push((index.definition().file_stem(), index.len()));
        }

        report.objects = self.objects.header().entry_count;
        report.blobs = self.blobs.header().entry_count;
        report.problems = problems;
        report
    }
}

fn primary_key(entry: &LeafEntry) -> Result<ObjectId, StorageError> {
    ObjectId::from_slice(&entry.key).ok_or_else(|| {
        StorageError::Corruption(format!("primary key of {} bytes", entry.key.len()))
    })
}

fn describe_key(key: &[u8]) -> String {
    ObjectId::from_slice(key).map_or_else(|| format!("{key:02x?}"), |id| id.to_string())
}

/// A collection and its files.
pub struct Collection {
    name: String,
    blob_threshold: usize,
    location: Location,
    /// `None` once the database has shut down.
    files: RwLock<Option<CollectionFiles>>,
    /// Fault controls of in-memory files, by file name.
    faults: Mutex<HashMap<String, FaultHandle>>,
}

impl Collection {
    /// Open (or create) a collection's files.
    ///
    /// Every index file already present for the collection is opened and
    /// kept up to date, whether or not it appears in `definitions`. Indices in
    /// `definitions` that do not exist yet are created and backfilled.
    pub(crate) fn open(
        name: &str,
        config: &DatabaseConfig,
        definitions: &[IndexDefinition],
    ) -> Result<Self, DatabaseError> {
        let location = Location::from_config(config);
        let mut faults = HashMap::new();
        let objects = open_block_file(
            &location,
            &objects_file_name(name),
            FileKind::Objects,
            config.block_size,
            &mut faults,
        )?;
        let blobs = open_block_file(
            &location,
            &blobs_file_name(name),
            FileKind::Blobs,
            config.block_size,
            &mut faults,
        )?;

        let mut indices = Vec::new();
        for file_name in location.index_files(name)? {
            let (device, _) = location.open_file(&file_name, &mut faults)?;
            let index = IndexFile::open(device, None)?;
            if index_file_name(name, index.definition()) != file_name {
                return Err(ConstraintError::DefinitionMismatch {
                    expected: file_name,
                    found: index.definition().to_string(),
                }
                .into());
            }
            indices.push(index);
        }

        let mut files = CollectionFiles {
            objects,
            blobs,
            indices,
        };
        for definition in definitions {
            if files.index(definition).is_none() {
                files.add_index(name, definition, &location, &mut faults)?;
            }
        }
        debug!(
            collection = name,
            objects = files.objects().len(),
            indices = files.indices.len(),
            "opened collection"
        );

        Ok(Self {
            name: name.to_string(),
            blob_threshold: config.blob_threshold,
            location,
            files: RwLock::new(Some(files)),
            faults: Mutex::new(faults),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared access to the files for one read.
    pub async fn read(&self) -> Result<RwLockReadGuard<'_, CollectionFiles>, DatabaseError> {
        RwLockReadGuard::try_map(self.files.read().await, Option::as_ref)
            .map_err(|_| DatabaseError::Closed)
    }

    async fn write(&self) -> Result<RwLockMappedWriteGuard<'_, CollectionFiles>, DatabaseError> {
        RwLockWriteGuard::try_map(self.files.write().await, Option::as_mut)
            .map_err(|_| DatabaseError::Closed)
    }

    /// Run one mutation under the write lock, persisting it only if every
    /// step succeeded.
    async fn mutate<R>(
        &self,
        operation: &str,
        apply: impl FnOnce(&mut CollectionFiles, usize) -> Result<R, DatabaseError>,
    ) -> Result<R, DatabaseError> {
        let mut files = self.write().await?;
        let result = apply(&mut *files, self.blob_threshold).and_then(|value| {
            files.commit()?;
            Ok(value)
        });
        if let Err(e) = &result {
            files.abort();
            warn!(collection = %self.name, operation, error = %e, "mutation aborted");
        }
        result
    }

    /// Store a new document. Returns `false` if the identifier is taken.
    pub async fn insert(&self, id: &ObjectId, doc: &Document) -> Result<bool, DatabaseError> {
        self.mutate("insert", |files, threshold| files.insert(id, doc, threshold))
            .await
    }

    /// Replace a stored document. Returns `false` if it does not exist.
    pub async fn update(&self, id: &ObjectId, doc: &Document) -> Result<bool, DatabaseError> {
        self.mutate("update", |files, threshold| files.update(id, doc, threshold))
            .await
    }

    /// Delete a stored document. Returns `false` if it does not exist.
    pub async fn delete(&self, id: &ObjectId) -> Result<bool, DatabaseError> {
        self.mutate("delete", |files, threshold| files.delete(id, threshold))
            .await
    }

    pub async fn get(&self, id: &ObjectId) -> Result<Option<Document>, DatabaseError> {
        Ok(self.read().await?.objects().get(id)?)
    }

    pub async fn count(&self) -> Result<u64, DatabaseError> {
        Ok(self.read().await?.objects().len())
    }

    /// Definitions of every open index.
    pub async fn definitions(&self) -> Result<Vec<IndexDefinition>, DatabaseError> {
        Ok(self
            .read()
            .await?
            .indices
            .iter()
            .map(|i| i.definition().clone())
            .collect())
    }

    /// Definitions of the open indices that hold an entry for every object.
    pub async fn complete_indices(&self) -> Result<Vec<IndexDefinition>, DatabaseError> {
        let files = self.read().await?;
        let objects = files.objects().len();
        Ok(files
            .indices
            .iter()
            .filter(|i| i.len() == objects)
            .map(|i| i.definition().clone())
            .collect())
    }

    /// Create and backfill any of `definitions` that is not open yet.
    pub(crate) async fn ensure_indices(
        &self,
        definitions: &[IndexDefinition],
    ) -> Result<(), DatabaseError> {
        {
            let files = self.read().await?;
            if definitions.iter().all(|d| files.index(d).is_some()) {
                return Ok(());
            }
        }
        let mut files = self.write().await?;
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        for definition in definitions {
            if files.index(definition).is_none() {
                files.add_index(&self.name, definition, &self.location, &mut faults)?;
            }
        }
        Ok(())
    }

    /// Check every file of the collection.
    pub async fn verify(&self) -> Result<IntegrityReport, DatabaseError> {
        let report = self.read().await?.verify(&self.name);
        if !report.is_ok() {
            warn!(
                collection = %self.name,
                problems = report.problems.len(),
                "integrity check found problems"
            );
        }
        Ok(report)
    }

    /// Fault controls of an in-memory file, by file name.
    #[must_use]
    pub fn fault_handle(&self, file_name: &str) -> Option<FaultHandle> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(file_name)
            .cloned()
    }

    /// Close the files. Later operations fail with [`DatabaseError::Closed`].
    pub(crate) async fn close(&self) {
        if self.files.write().await.take().is_some() {
            debug!(collection = %self.name, "closed collection");
        }
    }
}
