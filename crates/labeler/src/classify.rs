//! Workload name to business category

use labeler_config::CategoryTable;

/// Category for `name`: the first table entry whose members contain it,
/// otherwise the table's fallback
#[must_use]
pub fn classify<'a>(name: &str, table: &'a CategoryTable) -> &'a str {
    table.lookup(name).unwrap_or(table.fallback.as_str())
}
