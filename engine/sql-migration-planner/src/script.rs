//! The plan: ordered batches of tagged statements.

use std::fmt;

/// One statement of the plan. The rendered SQL is authoritative; the tag
/// carries just enough structure for the safety analyzer to reconcile
/// drop/add pairs without re-parsing SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub tag: StatementTag,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementTag {
    /// A `--` comment line, including skip records.
    Comment,
    /// A CHECK constraint added by this plan, with its normalized
    /// expression.
    CheckAdded { expression: String },
    /// A CHECK constraint dropped by this plan. `during_pk_migration`
    /// exempts it from the unsafe classification.
    CheckDropped {
        expression: String,
        during_pk_migration: bool,
    },
    /// An index created by this plan, keyed by its structural signature.
    IndexAdded { signature: String },
    /// An index dropped by this plan.
    IndexDropped { signature: String },
    /// Anything else.
    Other,
}

impl Statement {
    pub fn other(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            tag: StatementTag::Other,
        }
    }

    pub fn comment(text: impl fmt::Display) -> Self {
        Statement {
            sql: format!("-- {text}"),
            tag: StatementTag::Comment,
        }
    }

    pub fn tagged(sql: impl Into<String>, tag: StatementTag) -> Self {
        Statement { sql: sql.into(), tag }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.tag, StatementTag::Comment)
    }
}

/// A contiguous group of statements executed as one batch, terminated by
/// the `GO` separator in the rendered script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub label: String,
    pub statements: Vec<Statement>,
}

impl Batch {
    pub fn new(label: impl Into<String>) -> Self {
        Batch {
            label: label.into(),
            statements: Vec::new(),
        }
    }

    pub fn push(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Whether the batch contains anything beyond comments.
    pub fn has_effective_statements(&self) -> bool {
        self.statements.iter().any(|s| !s.is_comment())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationScript {
    pub batches: Vec<Batch>,
}

impl MigrationScript {
    /// Appends a batch, dropping it when empty. Batch order is preserved
    /// exactly; the executor never reorders.
    pub fn push_batch(&mut self, batch: Batch) {
        if !batch.is_empty() {
            self.batches.push(batch);
        }
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.batches.iter().flat_map(|b| b.statements.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// `true` when the plan changes nothing structurally: only comments
    /// and description upserts remain.
    pub fn is_effectively_empty(&self) -> bool {
        self.batches
            .iter()
            .all(|b| !b.has_effective_statements() || b.label == "descriptions")
    }

    /// Renders the executable script, batches separated by a single-line
    /// `GO`.
    pub fn render(&self) -> String {
        let mut out = String::new();

        for batch in &self.batches {
            for statement in &batch.statements {
                out.push_str(&statement.sql);
                out.push('\n');
            }
            out.push_str("GO\n");
        }

        out
    }

    /// Concatenates the batches of several scripts, preserving order.
    pub fn concat(scripts: impl IntoIterator<Item = MigrationScript>) -> MigrationScript {
        let mut merged = MigrationScript::default();
        for script in scripts {
            merged.batches.extend(script.batches);
        }
        merged
    }
}
