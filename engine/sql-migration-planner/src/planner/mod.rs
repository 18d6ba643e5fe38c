//! Translates a diff into ordered DDL batches.
//!
//! Per entity the batch order is fixed: primary key migration (when
//! required), column additions, then everything else, then description
//! upserts. The planner is a pure function of its inputs (live-data
//! dependent guards consume the pre-gathered [`TableFacts`]), so identical
//! inputs produce byte-identical scripts.

mod changes;
mod column_migration;
mod create_table;
mod descriptions;
mod guards;
mod pk_migration;

use crate::diagnostics::Diagnostics;
use crate::differ::{diff_entities, ImpactItem};
use crate::facts::TableFacts;
use crate::script::MigrationScript;
use entity_model::EntityDefinition;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Caller-supplied overrides for the safe column migration protocol,
/// keyed by `table.column` (case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct PlannerOptions {
    copy_expressions: HashMap<String, String>,
    reapply_defaults: HashMap<String, String>,
}

impl PlannerOptions {
    pub fn new() -> Self {
        PlannerOptions::default()
    }

    /// Conversion expression used when copying `table.column` into its
    /// shadow column, e.g. `TRY_CONVERT(uniqueidentifier, [Id])`.
    pub fn with_copy_expression(
        mut self,
        table: &str,
        column: &str,
        expression: impl Into<String>,
    ) -> Self {
        self.copy_expressions.insert(key(table, column), expression.into());
        self
    }

    /// Default expression re-applied after `table.column` is migrated.
    pub fn with_reapply_default(
        mut self,
        table: &str,
        column: &str,
        expression: impl Into<String>,
    ) -> Self {
        self.reapply_defaults.insert(key(table, column), expression.into());
        self
    }

    fn copy_expression(&self, table: &str, column: &str) -> Option<&str> {
        self.copy_expressions.get(&key(table, column)).map(String::as_str)
    }

    fn reapply_default(&self, table: &str, column: &str) -> Option<&str> {
        self.reapply_defaults.get(&key(table, column)).map(String::as_str)
    }
}

fn key(table: &str, column: &str) -> String {
    format!("{}.{}", table.to_ascii_lowercase(), column.to_ascii_lowercase())
}

/// Bookkeeping shared across the plan stages of one entity.
#[derive(Debug, Default)]
pub(crate) struct PlanContext {
    /// Columns rebuilt by the key migration; downstream stages do no
    /// double work on them.
    pub(crate) excluded_columns: HashSet<String>,
    /// Constraints a migration protocol already dropped.
    pub(crate) dropped_constraints: HashSet<String>,
    /// Columns added in this plan, for the deferred-index guard.
    pub(crate) added_columns: HashSet<String>,
}

impl PlanContext {
    pub(crate) fn is_excluded(&self, column: &str) -> bool {
        self.excluded_columns.contains(&column.to_ascii_lowercase())
    }

    pub(crate) fn already_dropped(&self, constraint: &str) -> bool {
        self.dropped_constraints
            .contains(&constraint.to_ascii_lowercase())
    }
}

/// The plan for one entity: the executable script plus the typed change
/// list it was derived from.
#[derive(Debug, Clone)]
pub struct EntityPlan {
    pub script: MigrationScript,
    pub impacts: Vec<ImpactItem>,
}

pub fn plan_entity_migration(
    old: &EntityDefinition,
    new: &EntityDefinition,
    facts: &TableFacts,
    options: &PlannerOptions,
    diagnostics: &mut Diagnostics,
) -> EntityPlan {
    // Neither FK form may be lost, and the PK must appear in the unified
    // constraint list on both sides; merge up front.
    let mut old = old.clone();
    let mut new = new.clone();
    old.merge_foreign_keys();
    new.merge_foreign_keys();
    old.merge_primary_key();
    new.merge_primary_key();

    let impacts = diff_entities(&old, &new);
    let mut script = MigrationScript::default();

    if old.is_empty_shape() {
        debug!(table = %new.qualified_name(), "planning table creation");
        create_table::plan_create_table(&new, &mut script);
        descriptions::plan_descriptions(&old, &new, &mut script);
        return EntityPlan { script, impacts };
    }

    let mut ctx = PlanContext::default();

    if pk_migration::pk_migration_required(&old, &new) {
        let pk_column = &new.primary_key.as_ref().expect("required check").columns[0];
        debug!(table = %new.qualified_name(), column = %pk_column, "planning primary key migration");

        pk_migration::plan_pk_migration(
            &old,
            &new,
            options.copy_expression(&new.name, pk_column),
            &mut ctx,
            &mut script,
        );
    }

    changes::plan_added_columns(&old, &new, facts, &mut ctx, &mut script);
    changes::plan_changes(&old, &new, facts, options, diagnostics, &mut ctx, &mut script);
    descriptions::plan_descriptions(&old, &new, &mut script);

    EntityPlan { script, impacts }
}
