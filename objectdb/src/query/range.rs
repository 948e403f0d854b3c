//! Per-field ranges and filter decomposition.
//!
//! A filter is rewritten into disjunctive normal form: an OR of terms, each
//! an AND of simple field constraints. Against a chosen index every term
//! becomes a *segment*, one [`RangeInfo`] per index field, and segments are
//! ordered and merged so that scanning them in sequence yields entries in
//! index order.
//!
//! Decomposition only ever widens: constraints it cannot express (`NOT`,
//! not-equal, `Null` constants, oversized expansions) are dropped and left
//! to the post-filter, which always re-checks the whole filter.

use std::cmp::Ordering;

use crate::codec::{IndexDefinition, SortDirection, Value, ValueClass};
use crate::query::filter::{CompareOp, Filter, like_prefix, prefix_successor};
use crate::storage::SeekBound;

/// Largest number of terms a filter may expand to.
pub const MAX_TERMS: usize = 64;

/// One end of a range.
#[derive(Debug, Clone, PartialEq)]
pub enum Limit {
    Open,
    Inclusive(Value),
    Exclusive(Value),
}

impl Limit {
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Open => None,
            Self::Inclusive(v) | Self::Exclusive(v) => Some(v),
        }
    }
}

/// Where a value lies relative to a range, in ascending value order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Below,
    Inside,
    Above,
}

/// Where a value lies relative to a range, in index scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSide {
    /// Not reached yet: the scan can jump forward to the range.
    Before,
    /// Passed: nothing further along can match.
    After,
}

/// Bounds on one field.
///
/// Bounded ranges also carry the value class of their bounds: values of
/// another class never fall inside, and sort below or above the range by
/// class.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeInfo {
    pub min: Limit,
    pub max: Limit,
}

impl Default for RangeInfo {
    fn default() -> Self {
        Self::open()
    }
}

impl RangeInfo {
    #[must_use]
    pub const fn open() -> Self {
        Self {
            min: Limit::Open,
            max: Limit::Open,
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!((&self.min, &self.max), (Limit::Open, Limit::Open))
    }

    /// The single value this range admits, if it is a point.
    #[must_use]
    pub fn as_point(&self) -> Option<&Value> {
        match (&self.min, &self.max) {
            (Limit::Inclusive(a), Limit::Inclusive(b)) if a.total_cmp(b).is_eq() => Some(a),
            _ => None,
        }
    }

    fn class(&self) -> Option<ValueClass> {
        self.min
            .value()
            .or_else(|| self.max.value())
            .map(Value::class)
    }

    /// Whether no value can satisfy the range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match (&self.min, &self.max) {
            (Limit::Open, _) | (_, Limit::Open) => false,
            (Limit::Inclusive(a), Limit::Inclusive(b)) => a.total_cmp(b).is_gt(),
            (Limit::Inclusive(a) | Limit::Exclusive(a), Limit::Inclusive(b) | Limit::Exclusive(b)) => {
                a.total_cmp(b).is_ge()
            }
        }
    }

    /// Narrow the range by one comparison. Returns `false` if the result is
    /// empty, including when the constant's class differs from the range's.
    pub fn restrict(&mut self, op: CompareOp, value: Value) -> bool {
        if self.class().is_some_and(|c| c != value.class()) {
            return false;
        }
        match op {
            CompareOp::Eq => {
                self.tighten_min(Limit::Inclusive(value.clone()));
                self.tighten_max(Limit::Inclusive(value));
            }
            CompareOp::Gt => self.tighten_min(Limit::Exclusive(value)),
            CompareOp::Ge => self.tighten_min(Limit::Inclusive(value)),
            CompareOp::Lt => self.tighten_max(Limit::Exclusive(value)),
            CompareOp::Le => self.tighten_max(Limit::Inclusive(value)),
            CompareOp::Ne => {}
        }
        !self.is_empty()
    }

    fn tighten_min(&mut self, limit: Limit) {
        let replace = match (&self.min, &limit) {
            (Limit::Open, _) => true,
            (current, new) => match (current.value(), new.value()) {
                (Some(c), Some(n)) => match n.total_cmp(c) {
                    Ordering::Greater => true,
                    Ordering::Equal => matches!(new, Limit::Exclusive(_)),
                    Ordering::Less => false,
                },
                _ => false,
            },
        };
        if replace {
            self.min = limit;
        }
    }

    fn tighten_max(&mut self, limit: Limit) {
        let replace = match (&self.max, &limit) {
            (Limit::Open, _) => true,
            (current, new) => match (current.value(), new.value()) {
                (Some(c), Some(n)) => match n.total_cmp(c) {
                    Ordering::Less => true,
                    Ordering::Equal => matches!(new, Limit::Exclusive(_)),
                    Ordering::Greater => false,
                },
                _ => false,
            },
        };
        if replace {
            self.max = limit;
        }
    }

    /// Locate a value relative to the range.
    #[must_use]
    pub fn position(&self, value: &Value) -> Position {
        if let Some(class) = self.class() {
            match value.class().cmp(&class) {
                Ordering::Less => return Position::Below,
                Ordering::Greater => return Position::Above,
                Ordering::Equal => {}
            }
        }
        let below = match &self.min {
            Limit::Open => false,
            Limit::Inclusive(m) => value.total_cmp(m).is_lt(),
            Limit::Exclusive(m) => value.total_cmp(m).is_le(),
        };
        if below {
            return Position::Below;
        }
        let above = match &self.max {
            Limit::Open => false,
            Limit::Inclusive(m) => value.total_cmp(m).is_gt(),
            Limit::Exclusive(m) => value.total_cmp(m).is_ge(),
        };
        if above {
            return Position::Above;
        }
        Position::Inside
    }

    /// Locate a value relative to the range in scan order.
    #[must_use]
    pub fn scan_side(&self, value: &Value, direction: SortDirection) -> Option<ScanSide> {
        match (self.position(value), direction) {
            (Position::Inside, _) => None,
            (Position::Below, SortDirection::Ascending)
            | (Position::Above, SortDirection::Descending) => Some(ScanSide::Before),
            (Position::Above, SortDirection::Ascending)
            | (Position::Below, SortDirection::Descending) => Some(ScanSide::After),
        }
    }

    /// The limit a scan in `direction` reaches first.
    #[must_use]
    pub const fn start(&self, direction: SortDirection) -> &Limit {
        match direction {
            SortDirection::Ascending => &self.min,
            SortDirection::Descending => &self.max,
        }
    }

    fn lower_edge(&self) -> Edge<'_> {
        match (&self.min, self.class()) {
            (Limit::Inclusive(v), _) => Edge::Value(v, 0),
            (Limit::Exclusive(v), _) => Edge::Value(v, 1),
            (Limit::Open, Some(class)) => Edge::ClassStart(class),
            (Limit::Open, None) => Edge::Min,
        }
    }

    fn upper_edge(&self) -> Edge<'_> {
        match (&self.max, self.class()) {
            (Limit::Inclusive(v), _) => Edge::Value(v, 0),
            (Limit::Exclusive(v), _) => Edge::Value(v, -1),
            (Limit::Open, Some(class)) => Edge::ClassEnd(class),
            (Limit::Open, None) => Edge::Max,
        }
    }

    /// Smallest range containing both.
    fn hull(&self, other: &Self) -> Self {
        let min = if self.lower_edge().compare(&other.lower_edge()).is_le() {
            self.min.clone()
        } else {
            other.min.clone()
        };
        let max = if self.upper_edge().compare(&other.upper_edge()).is_ge() {
            self.max.clone()
        } else {
            other.max.clone()
        };
        let hull = Self { min, max };
        if self.class() == other.class() {
            hull
        } else {
            Self::open()
        }
    }
}

/// A range end placed on the total value order. Exclusive ends sit just
/// inside their value (the `i8` offset).
#[derive(Debug, Clone, Copy)]
enum Edge<'a> {
    Min,
    ClassStart(ValueClass),
    Value(&'a Value, i8),
    ClassEnd(ValueClass),
    Max,
}

impl Edge<'_> {
    fn compare(&self, other: &Self) -> Ordering {
        fn rank(edge: &Edge<'_>) -> (u8, Option<ValueClass>, u8) {
            match edge {
                Edge::Min => (0, None, 0),
                Edge::ClassStart(c) => (1, Some(*c), 0),
                Edge::Value(v, _) => (1, Some(v.class()), 1),
                Edge::ClassEnd(c) => (1, Some(*c), 2),
                Edge::Max => (2, None, 0),
            }
        }
        rank(self).cmp(&rank(other)).then_with(|| match (self, other) {
            (Self::Value(a, da), Self::Value(b, db)) => a.total_cmp(b).then(da.cmp(db)),
            _ => Ordering::Equal,
        })
    }
}

/// A single constraint a term places on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

/// An AND of constraints. An empty term admits everything.
pub type Term = Vec<Constraint>;

/// Rewrite a filter as an OR of terms.
///
/// The result admits at least every document the filter admits.
#[must_use]
pub fn decompose(filter: &Filter) -> Vec<Term> {
    dnf(filter, false)
}

fn unconstrained() -> Vec<Term> {
    vec![Vec::new()]
}

fn dnf(filter: &Filter, negated: bool) -> Vec<Term> {
    match filter {
        Filter::Not(inner) => dnf(inner, !negated),
        Filter::And(parts) if !negated => conjunction(parts, negated),
        Filter::Or(parts) if negated => conjunction(parts, negated),
        Filter::And(parts) | Filter::Or(parts) => disjunction(parts, negated),
        // A negated comparison is not a range: `NOT (A < 5)` also admits
        // values of other classes.
        _ if negated => unconstrained(),
        Filter::Compare { field, op, value } => match (op, value.class()) {
            (CompareOp::Ne, _)
            | (_, ValueClass::Null | ValueClass::Min | ValueClass::Max) => unconstrained(),
            _ => vec![vec![Constraint {
                field: field.clone(),
                op: *op,
                value: value.clone(),
            }]],
        },
        Filter::Like { field, pattern } => {
            let prefix = like_prefix(pattern);
            if prefix.is_empty() {
                return unconstrained();
            }
            let mut term = vec![Constraint {
                field: field.clone(),
                op: CompareOp::Ge,
                value: Value::String(prefix.to_string()),
            }];
            if let Some(upper) = prefix_successor(prefix) {
                term.push(Constraint {
                    field: field.clone(),
                    op: CompareOp::Lt,
                    value: Value::String(upper),
                });
            }
            vec![term]
        }
    }
}

fn conjunction(parts: &[Filter], negated: bool) -> Vec<Term> {
    let mut terms = unconstrained();
    for part in parts {
        let rhs = dnf(part, negated);
        if terms.len() * rhs.len() > MAX_TERMS {
            // Dropping the part only widens the result.
            continue;
        }
        let mut product = Vec::with_capacity(terms.len() * rhs.len());
        for left in &terms {
            for right in &rhs {
                let mut term = left.clone();
                term.extend(right.iter().cloned());
                product.push(term);
            }
        }
        terms = product;
    }
    terms
}

fn disjunction(parts: &[Filter], negated: bool) -> Vec<Term> {
    let mut terms = Vec::new();
    for part in parts {
        let sub = dnf(part, negated);
        if sub.iter().any(Vec::is_empty) || terms.len() + sub.len() > MAX_TERMS {
            return unconstrained();
        }
        terms.extend(sub);
    }
    terms
}

/// Ranges for every field of an index, derived from one term.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub ranges: Vec<RangeInfo>,
}

impl Segment {
    /// Build a segment for `definition` from a term. Returns `None` when the
    /// term is contradictory.
    #[must_use]
    pub fn from_term(definition: &IndexDefinition, term: &Term) -> Option<Self> {
        let mut ranges = vec![RangeInfo::open(); definition.fields().len()];
        for constraint in term {
            let Some(idx) = definition
                .field_names()
                .position(|name| name == constraint.field)
            else {
                continue;
            };
            if !ranges[idx].restrict(constraint.op, constraint.value.clone()) {
                return None;
            }
        }
        Some(Self { ranges })
    }

    /// Number of leading fields with a bound.
    #[must_use]
    pub fn constrained_prefix(&self) -> usize {
        self.ranges.iter().take_while(|r| !r.is_open()).count()
    }

    /// Where a scan of this segment starts.
    #[must_use]
    pub fn start_bound(&self, directions: &[SortDirection]) -> SeekBound {
        self.jump_bound(&[], 0, directions)
            .unwrap_or_else(|| SeekBound::before(Vec::new()))
    }

    /// Bound that skips from an entry whose first `field` values are `prefix`
    /// to the start of this segment's range on `field`.
    ///
    /// Leading point ranges after `field` are folded into the bound. Returns
    /// `None` if the range on `field` has no start value to seek to.
    #[must_use]
    pub fn jump_bound(
        &self,
        prefix: &[Value],
        field: usize,
        directions: &[SortDirection],
    ) -> Option<SeekBound> {
        let mut values = prefix[..field].to_vec();
        let mut after = false;
        for (range, &direction) in self.ranges.iter().zip(directions).skip(field) {
            if let Some(point) = range.as_point() {
                values.push(point.clone());
                continue;
            }
            match range.start(direction) {
                Limit::Open => {}
                Limit::Inclusive(v) => values.push(v.clone()),
                Limit::Exclusive(v) => {
                    values.push(v.clone());
                    after = true;
                }
            }
            break;
        }
        if values.len() == field {
            return None;
        }
        Some(SeekBound { values, after })
    }

    /// First field whose range excludes the entry, and on which side.
    #[must_use]
    pub fn check(&self, values: &[Value], directions: &[SortDirection]) -> Option<(usize, ScanSide)> {
        self.ranges
            .iter()
            .zip(values)
            .zip(directions)
            .enumerate()
            .find_map(|(i, ((range, value), &direction))| {
                range.scan_side(value, direction).map(|side| (i, side))
            })
    }
}

/// Order segments by where their scans start and merge any that overlap, so
/// that scanning them in turn visits entries in index order.
#[must_use]
pub fn arrange_segments(segments: Vec<Segment>, directions: &[SortDirection]) -> Vec<Segment> {
    arrange_from(segments, 0, directions)
}

fn arrange_from(
    mut segments: Vec<Segment>,
    field: usize,
    directions: &[SortDirection],
) -> Vec<Segment> {
    let Some(&direction) = directions.get(field) else {
        segments.truncate(1);
        return segments;
    };
    if segments.len() < 2 {
        return segments;
    }

    let starts_before = |a: &RangeInfo, b: &RangeInfo| match direction {
        SortDirection::Ascending => a.lower_edge().compare(&b.lower_edge()),
        SortDirection::Descending => b.upper_edge().compare(&a.upper_edge()),
    };
    // Whether `b` starts no later than `a` ends, in scan order.
    let overlaps = |a: &RangeInfo, b: &RangeInfo| match direction {
        SortDirection::Ascending => b.lower_edge().compare(&a.upper_edge()).is_le(),
        SortDirection::Descending => b.upper_edge().compare(&a.lower_edge()).is_ge(),
    };
    segments.sort_by(|a, b| starts_before(&a.ranges[field], &b.ranges[field]));

    let mut groups: Vec<Vec<Segment>> = Vec::new();
    let mut reach: Option<RangeInfo> = None;
    for segment in segments {
        let range = segment.ranges[field].clone();
        if let (Some(hull), Some(group)) = (reach.as_mut(), groups.last_mut())
            && overlaps(hull, &range)
        {
            *hull = hull.hull(&range);
            group.push(segment);
            continue;
        }
        reach = Some(range);
        groups.push(vec![segment]);
    }

    let mut arranged = Vec::new();
    for group in groups {
        arranged.extend(merge_group(group, field, directions));
    }
    arranged
}

fn merge_group(group: Vec<Segment>, field: usize, directions: &[SortDirection]) -> Vec<Segment> {
    if group.len() == 1 {
        return group;
    }
    let first = group[0].ranges[field].as_point().cloned();
    let same_point = first.as_ref().is_some_and(|p| {
        group
            .iter()
            .all(|s| s.ranges[field].as_point().is_some_and(|q| q.total_cmp(p).is_eq()))
    });
    if same_point {
        return arrange_from(group, field + 1, directions);
    }

    let mut merged = group[0].clone();
    for segment in &group[1..] {
        merged.ranges[field] = merged.ranges[field].hull(&segment.ranges[field]);
    }
    for range in &mut merged.ranges[field + 1..] {
        *range = RangeInfo::open();
    }
    vec![merged]
}
