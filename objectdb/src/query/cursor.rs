//! Query cursors.
//!
//! A cursor never holds a lock between pulls. Each pull takes the
//! collection's read lock, re-seeks from where the previous pull stopped,
//! produces one result and releases the lock again. Writers can therefore
//! interleave with a long-running query; the cursor sees every object that
//! stayed in range for the whole scan and reports each identifier at most
//! once.
//!
//! Index scans walk the segments of the plan in order:
//!
//! ```text
//! entry inside the segment ────────────► yield, resume just past it
//! field 0 past the segment ────────────► next segment
//! field i past the segment ────────────► seek past the entry's first i values
//! field i not yet in the segment ──────► seek to the segment's start on field i
//! ```

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use futures::Stream;
use tracing::trace;

use crate::codec::{Document, IndexDefinition, IndexField, Persistent, SortDirection, Value};
use crate::collection::{Collection, CollectionFiles};
use crate::database::DatabaseError;
use crate::query::filter::Filter;
use crate::query::planner::{QueryPlan, Source};
use crate::query::range::{ScanSide, Segment};
use crate::storage::{IndexEntry, IndexFile, SeekBound, StorageError};
use crate::types::ObjectId;

/// Where the next index seek of a [`RangeScan`] lands.
///
/// The scan keeps no narrowed per-field bounds. Each entry outside the
/// current segment yields a seek key past the violating prefix instead, and
/// an emitted entry resumes strictly after itself.
enum Resume {
    Start,
    Seek(SeekBound),
    Past(IndexEntry),
}

/// Skip-scan over the segments of one index.
pub struct RangeScan {
    directions: Vec<SortDirection>,
    segments: Vec<Segment>,
    current: usize,
    resume: Resume,
}

impl RangeScan {
    #[must_use]
    pub fn new(definition: &IndexDefinition, segments: Vec<Segment>) -> Self {
        Self {
            directions: definition.fields().iter().map(|f| f.direction).collect(),
            segments,
            current: 0,
            resume: Resume::Start,
        }
    }

    /// Whether every segment has been scanned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.current >= self.segments.len()
    }

    /// Next entry inside any segment, in index order.
    pub fn next_match(&mut self, index: &IndexFile) -> Result<Option<IndexEntry>, DatabaseError> {
        while let Some(segment) = self.segments.get(self.current) {
            let mut cursor = match &self.resume {
                Resume::Start => index.seek(&segment.start_bound(&self.directions))?,
                Resume::Seek(bound) => index.seek(bound)?,
                Resume::Past(entry) => index.seek_past(entry)?,
            };
            loop {
                let Some(entry) = cursor.next_entry()? else {
                    // Later segments start further along the index.
                    self.current = self.segments.len();
                    break;
                };
                match segment.check(&entry.values, &self.directions) {
                    None => {
                        self.resume = Resume::Past(entry.clone());
                        return Ok(Some(entry));
                    }
                    Some((0, ScanSide::After)) => {
                        self.current += 1;
                        self.resume = Resume::Start;
                        break;
                    }
                    Some((field, ScanSide::After)) => {
                        self.resume =
                            Resume::Seek(SeekBound::after(entry.values[..field].to_vec()));
                        break;
                    }
                    Some((field, ScanSide::Before)) => {
                        if let Some(bound) =
                            segment.jump_bound(&entry.values, field, &self.directions)
                        {
                            self.resume = Resume::Seek(bound);
                            break;
                        }
                    }
                }
            }
        }
        Ok(None)
    }
}

enum Candidates {
    Primary { after: Option<ObjectId> },
    Index {
        definition: IndexDefinition,
        scan: RangeScan,
    },
    Empty,
}

/// Cursor over the documents matching a query.
///
/// `previous` steps in the same direction as `next`: cursors only move
/// forward through their result order.
pub struct DocumentCursor {
    collection: Arc<Collection>,
    candidates: Candidates,
    filter: Option<Filter>,
    sort: Option<Vec<IndexField>>,
    sorted: Option<VecDeque<(ObjectId, Document)>>,
    seen: HashSet<ObjectId>,
    skip: usize,
    remaining: Option<usize>,
    done: bool,
}

impl DocumentCursor {
    pub(crate) fn new(
        collection: Arc<Collection>,
        plan: QueryPlan,
        filter: Option<Filter>,
        offset: usize,
        max_count: Option<usize>,
    ) -> Self {
        let candidates = match plan.source {
            Source::FullScan => Candidates::Primary { after: None },
            Source::Index {
                definition,
                segments,
            } => Candidates::Index {
                scan: RangeScan::new(&definition, segments),
                definition,
            },
            Source::Empty => Candidates::Empty,
        };
        Self {
            collection,
            candidates,
            filter,
            sort: plan.sort,
            sorted: None,
            seen: HashSet::new(),
            skip: offset,
            remaining: max_count,
            done: false,
        }
    }

    /// Next matching document with its identifier.
    pub async fn next(&mut self) -> Result<Option<(ObjectId, Document)>, DatabaseError> {
        match self.advance().await {
            Ok(item) => {
                if item.is_none() {
                    self.done = true;
                }
                Ok(item)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    /// Same as [`next`](Self::next).
    pub async fn previous(&mut self) -> Result<Option<(ObjectId, Document)>, DatabaseError> {
        self.next().await
    }

    /// Drain the cursor.
    pub async fn collect_all(mut self) -> Result<Vec<(ObjectId, Document)>, DatabaseError> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await? {
            out.push(item);
        }
        Ok(out)
    }

    /// Turn the cursor into a stream. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<(ObjectId, Document), DatabaseError>> {
        futures::stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(item)) => Some((Ok(item), cursor)),
                Ok(None) => None,
                Err(e) => Some((Err(e), cursor)),
            }
        })
    }

    async fn advance(&mut self) -> Result<Option<(ObjectId, Document)>, DatabaseError> {
        if self.done {
            return Ok(None);
        }
        if self.sort.is_some() && self.sorted.is_none() {
            self.materialize().await?;
        }
        loop {
            if self.remaining == Some(0) {
                return Ok(None);
            }
            let item = match self.sorted.as_mut() {
                Some(buffer) => buffer.pop_front(),
                None => self.matching().await?,
            };
            let Some(item) = item else {
                return Ok(None);
            };
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Ok(Some(item));
        }
    }

    /// Run the whole query and sort it in memory.
    async fn materialize(&mut self) -> Result<(), DatabaseError> {
        let mut items = Vec::new();
        while let Some(item) = self.matching().await? {
            items.push(item);
        }
        if let Some(order) = &self.sort {
            items.sort_by(|(a_id, a), (b_id, b)| compare_by(order, a, b).then(a_id.cmp(b_id)));
        }
        trace!(count = items.len(), "sorted query results in memory");
        self.sorted = Some(items.into());
        Ok(())
    }

    /// Next unseen candidate that passes the filter.
    async fn matching(&mut self) -> Result<Option<(ObjectId, Document)>, DatabaseError> {
        loop {
            let Some((id, doc)) = self.candidate().await? else {
                return Ok(None);
            };
            if !self.seen.insert(id) {
                continue;
            }
            if self.filter.as_ref().is_some_and(|f| !f.matches(&doc)) {
                continue;
            }
            return Ok(Some((id, doc)));
        }
    }

    async fn candidate(&mut self) -> Result<Option<(ObjectId, Document)>, DatabaseError> {
        let files = self.collection.read().await?;
        match &mut self.candidates {
            Candidates::Empty => Ok(None),
            Candidates::Primary { after } => {
                let objects = files.objects();
                let Some(entry) = objects.scan_after(after.as_ref())?.next_entry()? else {
                    return Ok(None);
                };
                let id = ObjectId::from_slice(&entry.key).ok_or_else(|| {
                    StorageError::Corruption(format!("primary key of {} bytes", entry.key.len()))
                })?;
                let doc = objects.decode_record(&entry.value)?;
                *after = Some(id);
                Ok(Some((id, doc)))
            }
            Candidates::Index { definition, scan } => {
                let index = files.index(definition).ok_or_else(|| {
                    StorageError::Corruption(format!("index {definition} is not open"))
                })?;
                let Some(entry) = scan.next_match(index)? else {
                    return Ok(None);
                };
                let doc = lookup(&files, &entry.id)?;
                Ok(Some((entry.id, doc)))
            }
        }
    }
}

fn lookup(files: &CollectionFiles, id: &ObjectId) -> Result<Document, DatabaseError> {
    files.objects().get(id)?.ok_or_else(|| {
        StorageError::Corruption(format!("index entry for missing object {id}")).into()
    })
}

fn compare_by(order: &[IndexField], a: &Document, b: &Document) -> Ordering {
    order
        .iter()
        .map(|field| {
            let left = a.get(&field.name).unwrap_or(&Value::Null);
            let right = b.get(&field.name).unwrap_or(&Value::Null);
            field.direction.apply(left.total_cmp(right))
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Cursor over stored objects of type `T`.
pub struct Cursor<T> {
    inner: DocumentCursor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persistent> Cursor<T> {
    pub(crate) const fn new(inner: DocumentCursor) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub async fn next(&mut self) -> Result<Option<T>, DatabaseError> {
        self.inner.next().await?.map(into_object::<T>).transpose()
    }

    /// Same as [`next`](Self::next).
    pub async fn previous(&mut self) -> Result<Option<T>, DatabaseError> {
        self.next().await
    }

    pub async fn collect_all(mut self) -> Result<Vec<T>, DatabaseError> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await? {
            out.push(item);
        }
        Ok(out)
    }

    /// Turn the cursor into a stream. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, DatabaseError>> {
        futures::StreamExt::map(self.inner.into_stream(), |item| item.and_then(into_object::<T>))
    }
}

fn into_object<T: Persistent>((id, doc): (ObjectId, Document)) -> Result<T, DatabaseError> {
    let mut object = T::from_document(&doc)?;
    object.set_object_id(id);
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDevice;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn index_with(tokens: &[&str], rows: &[(i32, i32)]) -> IndexFile {
        let definition = IndexDefinition::new(tokens).expect("definition");
        let mut index =
            IndexFile::create(Box::new(MemoryDevice::new()), 1024, definition).expect("index");
        for (n, &(a, b)) in rows.iter().enumerate() {
            let id = ObjectId::from_u128(n as u128 + 1);
            index
                .insert_entry(&[Value::Int32(a), Value::Int32(b)], &id)
                .expect("insert");
        }
        index
    }

    fn scan(index: &IndexFile, filter: &Filter) -> Vec<ObjectId> {
        let plan = QueryPlan::new(&[index.definition().clone()], Some(filter), &[]);
        let Source::Index {
            definition,
            segments,
        } = plan.source
        else {
            panic!("expected an index scan, got {:?}", plan.source);
        };
        let mut scan = RangeScan::new(&definition, segments);
        let mut ids = Vec::new();
        while let Some(entry) = scan.next_match(index).expect("scan") {
            ids.push(entry.id);
        }
        assert!(scan.is_finished());
        ids
    }

    fn ids(ns: &[u128]) -> Vec<ObjectId> {
        ns.iter().copied().map(ObjectId::from_u128).collect()
    }

    #[test]
    fn test_leading_point_with_trailing_range() {
        let index = index_with(&["A", "B"], &[(1, 5), (1, 9), (2, 7), (0, 8)]);
        let filter = Filter::eq("A", 1i32) & Filter::ge("B", 6i32);
        assert_eq!(scan(&index, &filter), ids(&[2]));
    }

    #[test]
    fn test_skips_between_leading_values() {
        let mut rows = Vec::new();
        for a in 1..=3 {
            for b in 1..=10 {
                rows.push((a, b));
            }
        }
        let index = index_with(&["A", "B"], &rows);
        let filter = Filter::ge("A", 2i32) & Filter::eq("B", 4i32);
        // Row n holds (n / 10 + 1, n % 10 + 1), ids start at 1.
        assert_eq!(scan(&index, &filter), ids(&[14, 24]));
    }

    #[test]
    fn test_or_segments_with_descending_field() {
        let rows = [(1, 1), (1, 5), (1, 9), (2, 3), (3, 9), (3, 4)];
        let index = index_with(&["A", "-B"], &rows);
        let filter = (Filter::eq("A", 1i32) & Filter::ge("B", 5i32))
            | (Filter::eq("A", 3i32) & Filter::lt("B", 5i32));
        assert_eq!(scan(&index, &filter), ids(&[3, 2, 6]));
    }

    #[test]
    fn test_overlapping_segments_do_not_repeat() {
        let rows = [(1, 1), (2, 2), (3, 3), (4, 4), (5, 5)];
        let index = index_with(&["A", "B"], &rows);
        let filter = (Filter::ge("A", 1i32) & Filter::le("A", 3i32))
            | (Filter::ge("A", 2i32) & Filter::le("A", 5i32));
        assert_eq!(scan(&index, &filter), ids(&[1, 2, 3, 4, 5]));
    }

    fn comparison(rng: &mut StdRng, field: &str) -> Filter {
        let value = rng.random_range(0..8i32);
        match rng.random_range(0..5) {
            0 => Filter::eq(field, value),
            1 => Filter::lt(field, value),
            2 => Filter::le(field, value),
            3 => Filter::gt(field, value),
            _ => Filter::ge(field, value),
        }
    }

    #[test]
    fn test_skip_scan_matches_exhaustive_filtering() {
        let mut rng = StdRng::seed_from_u64(0x5ca7);
        let rows: Vec<(i32, i32)> = (0..150)
            .map(|_| (rng.random_range(0..8), rng.random_range(0..8)))
            .collect();
        let index = index_with(&["A", "B"], &rows);
        let row_of: std::collections::HashMap<ObjectId, usize> = (0..rows.len())
            .map(|n| (ObjectId::from_u128(n as u128 + 1), n))
            .collect();

        for _ in 0..300 {
            let mut filter = comparison(&mut rng, "A") & comparison(&mut rng, "B");
            if rng.random_bool(0.5) {
                filter = filter | (comparison(&mut rng, "A") & comparison(&mut rng, "B"));
            }

            let matches = |n: usize| {
                let (a, b) = rows[n];
                filter.matches(&Document::new("T").with("A", a).with("B", b))
            };
            let mut expected: Vec<(i32, i32, usize)> = (0..rows.len())
                .filter(|&n| matches(n))
                .map(|n| (rows[n].0, rows[n].1, n))
                .collect();
            expected.sort_unstable();

            let plan = QueryPlan::new(&[index.definition().clone()], Some(&filter), &[]);
            let found: Vec<usize> = match plan.source {
                Source::Empty => Vec::new(),
                Source::Index { .. } => scan(&index, &filter)
                    .iter()
                    .map(|id| row_of[id])
                    .collect(),
                // Branches whose A ranges merge into an open range.
                Source::FullScan => continue,
            };

            // Merged segments may yield extra candidates, never a repeat or
            // an out-of-order one.
            let keys: Vec<(i32, i32, usize)> =
                found.iter().map(|&n| (rows[n].0, rows[n].1, n)).collect();
            assert!(keys.windows(2).all(|w| w[0] < w[1]), "{filter:?}");
            let kept: Vec<(i32, i32, usize)> =
                keys.into_iter().filter(|&(_, _, n)| matches(n)).collect();
            assert_eq!(kept, expected, "{filter:?}");
        }
    }

    #[test]
    fn test_compare_by_sort_order() {
        let a = Document::new("T").with("X", 1i32).with("Y", "b");
        let b = Document::new("T").with("X", 1i32).with("Y", "a");
        let order = vec![IndexField::parse("X"), IndexField::parse("-Y")];
        assert_eq!(compare_by(&order, &a, &b), Ordering::Less);
        let missing = Document::new("T");
        assert_eq!(compare_by(&order, &missing, &a), Ordering::Less);
    }
}
