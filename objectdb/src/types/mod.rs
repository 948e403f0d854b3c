//! Core identifier and scalar types shared by the codec and the storage engine.

mod decimal;
mod ids;

pub use decimal::{Decimal, MAX_SCALE, ParseDecimalError};
pub use ids::{OBJECT_ID_SIZE, ObjectId, ParseObjectIdError};
