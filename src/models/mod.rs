//! Record model: schemas, lazily resolved records and query text.

pub(crate) mod kinds;
mod query;
mod record;
mod schema;
mod value;

pub(crate) use kinds::raw_identifier;
pub use query::{parse_query, ParsedQuery, ResultKind};
pub use record::{FieldStatus, MergePolicy, Record, RecordRef};
pub use schema::{EntityKind, FieldSet, KindFlags};
pub use value::{json_is_empty, ordered, FieldValue};
