//! Query planning.
//!
//! A plan picks one of three sources and says whether the results still
//! need sorting in memory:
//!
//! ```text
//! filter + sort order
//!       │
//!       ├─ complete index led by the sort order ───────────► ordered index scan
//!       ├─ index constraining the most leading fields ─────► index scan (+ sort)
//!       └─ otherwise ──────────────────────────────────────► primary scan (+ sort)
//! ```
//!
//! The full filter is always re-checked against every candidate, so a plan
//! only has to be wide enough, never exact.

use crate::codec::{IndexDefinition, IndexField, SortDirection};
use crate::query::filter::Filter;
use crate::query::range::{Segment, Term, arrange_segments, decompose};

/// Where candidates come from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Every object in identifier order.
    FullScan,
    /// Entries of one index within the given segments, in index order.
    Index {
        definition: IndexDefinition,
        segments: Vec<Segment>,
    },
    /// The filter is contradictory.
    Empty,
}

/// How a query is executed.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub source: Source,
    /// Order to sort the filtered results in, when the source does not
    /// already produce it.
    pub sort: Option<Vec<IndexField>>,
}

impl QueryPlan {
    /// Plan a query over a collection whose indices each hold an entry for
    /// every object.
    #[must_use]
    pub fn new(indices: &[IndexDefinition], filter: Option<&Filter>, sort: &[IndexField]) -> Self {
        Self::with_coverage(indices, filter, sort, |_| true)
    }

    /// Plan a query where `covers_all` tells which indices hold an entry for
    /// every object.
    ///
    /// Only such an index may supply the sort order. A partial one would
    /// silently drop the objects that lack its fields, so those queries scan
    /// and sort in memory instead.
    #[must_use]
    pub fn with_coverage(
        indices: &[IndexDefinition],
        filter: Option<&Filter>,
        sort: &[IndexField],
        covers_all: impl Fn(&IndexDefinition) -> bool,
    ) -> Self {
        let terms = filter.map_or_else(|| vec![Vec::new()], decompose);

        if !sort.is_empty()
            && let Some(definition) = indices
                .iter()
                .find(|d| provides_order(d, sort) && covers_all(d))
        {
            return Self {
                source: index_source(definition, &terms),
                sort: None,
            };
        }

        let sort = (!sort.is_empty()).then(|| sort.to_vec());
        let mut best: Option<(usize, Source)> = None;
        for definition in indices {
            let source = index_source(definition, &terms);
            let score = match &source {
                Source::Empty => return Self { source, sort },
                Source::Index { segments, .. } => segments
                    .iter()
                    .map(Segment::constrained_prefix)
                    .min()
                    .unwrap_or(0),
                Source::FullScan => 0,
            };
            if score > 0 && best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, source));
            }
        }

        Self {
            source: best.map_or(Source::FullScan, |(_, source)| source),
            sort,
        }
    }
}

/// Parse sort-order tokens such as `["Name", "-Age"]`.
#[must_use]
pub fn parse_sort_order<S: AsRef<str>>(tokens: &[S]) -> Vec<IndexField> {
    tokens
        .iter()
        .map(|t| IndexField::parse(t.as_ref()))
        .collect()
}

fn provides_order(definition: &IndexDefinition, sort: &[IndexField]) -> bool {
    definition.fields().len() >= sort.len() && definition.fields()[..sort.len()] == *sort
}

fn index_source(definition: &IndexDefinition, terms: &[Term]) -> Source {
    let segments: Vec<Segment> = terms
        .iter()
        .filter_map(|term| Segment::from_term(definition, term))
        .collect();
    if segments.is_empty() {
        return Source::Empty;
    }
    let directions: Vec<SortDirection> = definition.fields().iter().map(|f| f.direction).collect();
    Source::Index {
        definition: definition.clone(),
        segments: arrange_segments(segments, &directions),
    }
}
