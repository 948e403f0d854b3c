//! Filters, planning and cursors.
//!
//! ```text
//! Filter ──decompose──► terms ──per index──► segments ──arrange──► plan
//!                                                                   │
//!            post-filter ◄── documents ◄── primary lookups ◄── RangeScan
//! ```

pub mod cursor;
pub mod filter;
pub mod planner;
pub mod range;

pub use cursor::{Cursor, DocumentCursor, RangeScan};
pub use filter::{CompareOp, Filter};
pub use planner::{QueryPlan, Source, parse_sort_order};
pub use range::{Limit, RangeInfo, Segment};
