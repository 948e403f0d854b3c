//! Filter expressions.
//!
//! A [`Filter`] is an immutable predicate tree over document fields. Filters
//! are built with the constructor functions and combined with `&`, `|` and
//! `!`:
//!
//! ```ignore
//! let f = Filter::eq("A", 1) & (Filter::ge("B", 6) | !Filter::like("Name", "x%"));
//! ```
//!
//! A field missing from a document evaluates as `Null`. Ordered comparisons
//! between values of different classes (a number against a string, anything
//! against `Null`) are false.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use crate::codec::{Document, Value};

/// Comparison operator of a field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// Whether an ordering between a field and a constant satisfies the operator.
    #[must_use]
    pub const fn accepts(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ord, Ordering::Equal),
            Self::Ne => !matches!(ord, Ordering::Equal),
            Self::Lt => matches!(ord, Ordering::Less),
            Self::Le => !matches!(ord, Ordering::Greater),
            Self::Gt => matches!(ord, Ordering::Greater),
            Self::Ge => !matches!(ord, Ordering::Less),
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A predicate over documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Compare a field with a constant.
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    /// Match a text field against a pattern with `%` and `_` wildcards.
    Like { field: String, pattern: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    #[must_use]
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    #[must_use]
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    #[must_use]
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    #[must_use]
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    #[must_use]
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    #[must_use]
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    #[must_use]
    pub const fn and(filters: Vec<Self>) -> Self {
        Self::And(filters)
    }

    #[must_use]
    pub const fn or(filters: Vec<Self>) -> Self {
        Self::Or(filters)
    }

    /// Evaluate the filter against a document.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Compare { field, op, value } => {
                let actual = doc.get(field).unwrap_or(&Value::Null);
                match op {
                    CompareOp::Ne => !CompareOp::Eq.accepts_values(actual, value),
                    _ => op.accepts_values(actual, value),
                }
            }
            Self::Like { field, pattern } => doc
                .get(field)
                .and_then(Value::as_text)
                .is_some_and(|text| like_matches(&text, pattern)),
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Self::Not(inner) => !inner.matches(doc),
        }
    }
}

impl CompareOp {
    fn accepts_values(self, actual: &Value, constant: &Value) -> bool {
        actual
            .partial_compare(constant)
            .is_some_and(|ord| self.accepts(ord))
    }
}

impl BitAnd for Filter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(rhs);
                Self::And(filters)
            }
            lhs => Self::And(vec![lhs, rhs]),
        }
    }
}

impl BitOr for Filter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        match self {
            Self::Or(mut filters) => {
                filters.push(rhs);
                Self::Or(filters)
            }
            lhs => Self::Or(vec![lhs, rhs]),
        }
    }
}

impl Not for Filter {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, filters: &[Filter], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, filter) in filters.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{filter}")?;
            }
            write!(f, ")")
        }

        match self {
            Self::Compare { field, op, value } => write!(f, "{field} {} {value}", op.symbol()),
            Self::Like { field, pattern } => write!(f, "{field} LIKE {pattern:?}"),
            Self::And(filters) => join(f, filters, "AND"),
            Self::Or(filters) => join(f, filters, "OR"),
            Self::Not(inner) => write!(f, "NOT {inner}"),
        }
    }
}

/// SQL `LIKE` matching: `%` matches any run of characters, `_` exactly one.
#[must_use]
pub fn like_matches(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    // Position of the last `%` and the text position it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(&c) if c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, tried)) => {
                    p = star + 1;
                    t = tried + 1;
                    backtrack = Some((star, tried + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

/// Literal text before the first wildcard.
#[must_use]
pub fn like_prefix(pattern: &str) -> &str {
    let end = pattern.find(['%', '_']).unwrap_or(pattern.len());
    &pattern[..end]
}

/// Smallest string greater than every string that starts with `prefix`.
///
/// Returns `None` when no such string exists (empty prefix, or every
/// character already at the maximum).
#[must_use]
pub fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let mut next = u32::from(last) + 1;
        // Skip the surrogate gap.
        if (0xD800..=0xDFFF).contains(&next) {
            next = 0xE000;
        }
        if let Some(c) = char::from_u32(next) {
            chars.push(c);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
