mod query;
mod record;

pub use query::{sort_column, RecordFilters, RecordPage, RecordQuery, SortOrder, DEFAULT_LIMIT_CAP};
pub use record::{ChainRecord, OriginKind, Record};
