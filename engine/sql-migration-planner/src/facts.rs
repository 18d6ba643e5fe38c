//! Live-data facts the safety guards need.
//!
//! Gathered before planning (by the describer, driven by the executor) so
//! the planner itself stays a pure function of its inputs.

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct TableFacts {
    pub row_count: u64,
    /// Lower-cased names of columns currently holding at least one NULL.
    columns_with_nulls: HashSet<String>,
}

impl TableFacts {
    /// The facts for a table that does not exist yet.
    pub fn empty() -> Self {
        TableFacts::default()
    }

    pub fn new(row_count: u64, columns_with_nulls: impl IntoIterator<Item = String>) -> Self {
        TableFacts {
            row_count,
            columns_with_nulls: columns_with_nulls
                .into_iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn has_rows(&self) -> bool {
        self.row_count > 0
    }

    pub fn column_has_nulls(&self, column: &str) -> bool {
        self.columns_with_nulls
            .contains(&column.to_ascii_lowercase())
    }
}
