use serde::Serialize;

use super::Record;

/// Hard ceiling for page size when no store setting overrides it
pub const DEFAULT_LIMIT_CAP: u32 = 1000;

/// Columns a caller may sort by, keyed by their public name
const SORTABLE: &[(&str, &str)] = &[
    ("id", "id"),
    ("score", "score"),
    ("weight", "weight"),
    ("displayName", "display_name"),
    ("createdAt", "created_at"),
    ("category", "category"),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Anything other than an explicit "desc" sorts ascending
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Resolve a public sort field to its column, falling back to `id`
pub fn sort_column(field: &str) -> &'static str {
    SORTABLE
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, column)| *column)
        .unwrap_or("id")
}

#[derive(Clone, Debug, Default)]
pub struct RecordFilters {
    pub category: Option<String>,
    pub verified: Option<bool>,
    /// Case-insensitive substring match on the display name
    pub search: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RecordQuery {
    pub page: u32,
    pub limit: u32,
    pub sort: String,
    pub order: String,
    pub filters: RecordFilters,
    /// Administrative access: do not drop hidden ids
    pub include_hidden: bool,
    pub include_spam: bool,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 100,
            sort: "id".to_string(),
            order: "asc".to_string(),
            filters: RecordFilters::default(),
            include_hidden: false,
            include_spam: false,
        }
    }
}

impl RecordQuery {
    pub fn sorted_by(mut self, sort: &str, order: &str) -> Self {
        self.sort = sort.to_string();
        self.order = order.to_string();
        self
    }

    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }
}

/// One page of query results.
///
/// `total` counts rows matching the SQL predicates only. Names removed by the
/// in-memory spam check still count toward it, so `records.len()` may be
/// smaller than a full page even when more pages follow.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub total: u64,
    pub total_unfiltered: u64,
    pub page: u32,
    pub pages: u64,
    pub limit: u32,
}
