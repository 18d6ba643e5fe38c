//! Recoverable planner diagnostics.
//!
//! Refused changes are never errors: they surface as SQL comments in the
//! plan, as structured log entries, and as entries here for the caller's
//! report. One-shot deduplication replaces the process-global warning set
//! the planner would otherwise need.

use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct SkipRecord {
    pub table: String,
    pub object: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    skips: Vec<SkipRecord>,
    warned: HashSet<(String, String, String, String)>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    /// Records a skipped action.
    pub fn skip(&mut self, table: impl Into<String>, object: impl Into<String>, message: impl Into<String>) {
        let record = SkipRecord {
            table: table.into(),
            object: object.into(),
            message: message.into(),
        };

        warn!(table = %record.table, object = %record.object, "{}", record.message);
        self.skips.push(record);
    }

    /// `true` the first time this `(schema, table, column, kind)` key is
    /// seen; repeated warnings for the same object are suppressed.
    pub fn warn_once(
        &mut self,
        schema: &str,
        table: &str,
        column: &str,
        kind: &str,
    ) -> bool {
        self.warned.insert((
            schema.to_ascii_lowercase(),
            table.to_ascii_lowercase(),
            column.to_ascii_lowercase(),
            kind.to_owned(),
        ))
    }

    pub fn skips(&self) -> &[SkipRecord] {
        &self.skips
    }

    pub fn is_clean(&self) -> bool {
        self.skips.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_once_deduplicates_per_object_and_kind() {
        let mut diagnostics = Diagnostics::new();

        assert!(diagnostics.warn_once("dbo", "User", "Id", "Identity"));
        assert!(!diagnostics.warn_once("dbo", "User", "Id", "Identity"));
        assert!(!diagnostics.warn_once("dbo", "USER", "ID", "Identity"));
        assert!(diagnostics.warn_once("dbo", "User", "Id", "NotNull"));
    }
}
