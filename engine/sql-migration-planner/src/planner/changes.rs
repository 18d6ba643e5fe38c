//! The change plan for an existing table: column additions first, then the
//! fixed stage order of batch three.

use crate::diagnostics::Diagnostics;
use crate::facts::TableFacts;
use crate::planner::{column_migration, guards, PlanContext, PlannerOptions};
use crate::script::{Batch, MigrationScript, Statement, StatementTag};
use entity_model::{
    checks_equivalent, columns_equivalent, constraints_equivalent, indexes_equivalent,
    normalize_expression, Column, ConstraintKind, EntityDefinition, TextLength,
};
use sql_ddl::{
    AddCheck, AddColumn, AddDefault, AddForeignKey, AddPrimaryKey, AddUnique, AlterColumn,
    ColumnDef, CreateIndex, DefaultClause, DropConstraint, DropIndex, TableName,
};
use tracing::debug;

/// Batch two: new columns only.
pub(crate) fn plan_added_columns(
    old: &EntityDefinition,
    new: &EntityDefinition,
    facts: &TableFacts,
    ctx: &mut PlanContext,
    script: &mut MigrationScript,
) {
    let table = TableName::new(&new.schema, &new.name);
    let mut batch = Batch::new("add columns");

    for column in new.persisted_columns() {
        if old.find_column(&column.name).is_some() || ctx.is_excluded(&column.name) {
            continue;
        }

        ctx.added_columns.insert(column.name.to_ascii_lowercase());

        let default_name = format!("DF_{}_{}", new.name, column.name);
        let mut nullable = column.is_nullable;

        // A NOT NULL column without a default cannot be added to a table
        // that already holds rows; relax it and leave the tightening to a
        // later model change.
        if !nullable && column.default_value.is_none() && facts.has_rows() {
            batch.push(Statement::comment(format!(
                "column {} added as NULL: table has rows and the model declares no default",
                &column.name
            )));
            nullable = true;
        }

        batch.push(Statement::other(
            AddColumn {
                table,
                column: ColumnDef {
                    name: &column.name,
                    sql_type: &column.type_name,
                    nullable,
                    identity: column.is_identity,
                    default: column.default_value.as_deref().map(|expression| DefaultClause {
                        constraint_name: Some(&default_name),
                        expression,
                    }),
                },
            }
            .to_string(),
        ));
    }

    script.push_batch(batch);
}

/// How one changed column gets to its new shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnChangeKind {
    /// Identity toggles on tables with rows are refused.
    RefusedIdentity,
    /// Type or identity rebuilds go through the safe column migration
    /// protocol.
    Protocol,
    /// Plain `ALTER COLUMN` territory.
    InPlace,
}

fn classify_column_change(previous: &Column, next: &Column, facts: &TableFacts) -> ColumnChangeKind {
    let base_changed = !previous.base_type().eq_ignore_ascii_case(next.base_type());
    let identity_changed = previous.is_identity != next.is_identity;

    if identity_changed && facts.has_rows() {
        return ColumnChangeKind::RefusedIdentity;
    }

    if base_changed || length_reduced(previous, next) || identity_changed {
        return ColumnChangeKind::Protocol;
    }

    ColumnChangeKind::InPlace
}

/// The constraints the column migration protocol will drop through its
/// catalog cursors, marked up front so the drop stages, which come first
/// in the batch, do not drop them a second time.
fn precompute_protocol_drops(
    old: &EntityDefinition,
    new: &EntityDefinition,
    facts: &TableFacts,
    ctx: &mut PlanContext,
) {
    for column in new.persisted_columns() {
        let Some(previous) = old.find_column(&column.name) else {
            continue;
        };

        if ctx.is_excluded(&column.name)
            || columns_equivalent(previous, column)
            || classify_column_change(previous, column, facts) != ColumnChangeKind::Protocol
        {
            continue;
        }

        for constraint in &old.constraints {
            let on_column = constraint
                .columns
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&column.name));

            if on_column
                && matches!(constraint.kind, ConstraintKind::Default | ConstraintKind::Check)
            {
                ctx.dropped_constraints
                    .insert(constraint.name.to_ascii_lowercase());
            }
        }

        for check in &old.check_constraints {
            if check
                .referenced_columns
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&column.name))
            {
                ctx.dropped_constraints
                    .insert(check.name.to_ascii_lowercase());
            }
        }
    }
}

/// Batch three. Internal stage order is fixed: drop indexes, drop non-PK
/// constraints, drop checks, modify columns, add constraints, add checks,
/// add indexes, add foreign keys.
pub(crate) fn plan_changes(
    old: &EntityDefinition,
    new: &EntityDefinition,
    facts: &TableFacts,
    options: &PlannerOptions,
    diagnostics: &mut Diagnostics,
    ctx: &mut PlanContext,
    script: &mut MigrationScript,
) {
    let table = TableName::new(&new.schema, &new.name);
    let mut batch = Batch::new("changes");

    precompute_protocol_drops(old, new, facts, ctx);

    drop_indexes(old, new, table, ctx, &mut batch);
    drop_constraints(old, new, table, ctx, &mut batch);
    drop_checks(old, new, table, ctx, &mut batch);
    modify_columns(old, new, facts, options, diagnostics, ctx, &mut batch);
    add_constraints(old, new, table, &mut batch);
    add_checks(old, new, table, &mut batch);
    add_indexes(old, new, table, diagnostics, ctx, &mut batch);
    add_foreign_keys(old, new, table, &mut batch);

    script.push_batch(batch);
}

fn drop_indexes(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: TableName<'_>,
    ctx: &PlanContext,
    batch: &mut Batch,
) {
    for index in &old.indexes {
        let keep = match new.find_index(&index.name) {
            Some(next) => indexes_equivalent(index, next),
            None => false,
        };

        if keep {
            continue;
        }

        if index.columns.iter().any(|c| ctx.is_excluded(c)) {
            debug!(index = %index.name, "index touches a migrated key column, skipping drop");
            continue;
        }

        batch.push(Statement::tagged(
            DropIndex {
                table,
                name: &index.name,
            }
            .to_string(),
            StatementTag::IndexDropped {
                signature: guards::index_signature(index),
            },
        ));
    }
}

fn drop_constraints(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: TableName<'_>,
    ctx: &PlanContext,
    batch: &mut Batch,
) {
    for constraint in &old.constraints {
        if !matches!(
            constraint.kind,
            ConstraintKind::Unique | ConstraintKind::Default | ConstraintKind::ForeignKey
        ) {
            continue;
        }

        if ctx.already_dropped(&constraint.name) {
            continue;
        }

        let keep = match new.find_constraint(&constraint.name) {
            Some(next) => constraints_equivalent(constraint, next),
            None => {
                // The builder leaves column defaults on the column itself;
                // a name miss alone does not drop an equivalent default.
                constraint.kind == ConstraintKind::Default && default_still_in_model(constraint, new)
            }
        };

        if keep {
            continue;
        }

        if constraint.columns.iter().any(|c| ctx.is_excluded(c)) {
            debug!(constraint = %constraint.name, "constraint handled by key migration, skipping drop");
            continue;
        }

        batch.push(Statement::other(
            DropConstraint {
                table,
                name: &constraint.name,
            }
            .to_string(),
        ));
    }
}

/// Whether a catalog default constraint is still expressed by the new
/// model as a column default.
fn default_still_in_model(constraint: &entity_model::Constraint, new: &EntityDefinition) -> bool {
    let Some(column_name) = constraint.columns.first() else {
        return false;
    };
    let Some(column) = new.find_column(column_name) else {
        return false;
    };

    match (&constraint.expression, &column.default_value) {
        (Some(old_expr), Some(new_expr)) => {
            normalize_expression(old_expr) == normalize_expression(new_expr)
        }
        _ => false,
    }
}

fn drop_checks(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: TableName<'_>,
    ctx: &PlanContext,
    batch: &mut Batch,
) {
    for check in &old.check_constraints {
        if ctx.already_dropped(&check.name) {
            continue;
        }

        let keep = match new.find_check(&check.name) {
            Some(next) => checks_equivalent(check, next),
            // An equivalent check under another name also keeps the old
            // one in place only when the new one is not being added; the
            // safety reconciler treats the swap as a no-op either way.
            None => false,
        };

        if keep {
            continue;
        }

        let on_migrated_column = check
            .referenced_columns
            .iter()
            .any(|c| ctx.is_excluded(c));

        batch.push(Statement::tagged(
            DropConstraint {
                table,
                name: &check.name,
            }
            .to_string(),
            StatementTag::CheckDropped {
                expression: normalize_expression(&check.expression),
                during_pk_migration: on_migrated_column,
            },
        ));
    }
}

#[allow(clippy::too_many_arguments)]
fn modify_columns(
    old: &EntityDefinition,
    new: &EntityDefinition,
    facts: &TableFacts,
    options: &PlannerOptions,
    diagnostics: &mut Diagnostics,
    ctx: &mut PlanContext,
    batch: &mut Batch,
) {
    let table = TableName::new(&new.schema, &new.name);

    for column in new.persisted_columns() {
        let Some(previous) = old.find_column(&column.name) else {
            continue;
        };

        if ctx.is_excluded(&column.name) || columns_equivalent(previous, column) {
            continue;
        }

        let tightened = previous.is_nullable && !column.is_nullable;

        match classify_column_change(previous, column, facts) {
            ColumnChangeKind::RefusedIdentity => {
                if diagnostics.warn_once(&new.schema, &new.name, &column.name, "Identity") {
                    diagnostics.skip(
                        &new.name,
                        &column.name,
                        format!(
                            "identity change on `{}` skipped: table is not empty",
                            column.name
                        ),
                    );
                }
                batch.push(Statement::comment(format!(
                    "skipped identity change on {}: table is not empty",
                    &column.name
                )));
                continue;
            }
            ColumnChangeKind::Protocol => {
                column_migration::plan_safe_column_migration(
                    old,
                    new,
                    previous,
                    column,
                    options.copy_expression(&new.name, &column.name),
                    options.reapply_default(&new.name, &column.name),
                    ctx,
                    batch,
                );
                continue;
            }
            ColumnChangeKind::InPlace => {}
        }

        if tightened && facts.column_has_nulls(&column.name) {
            diagnostics.skip(
                &new.name,
                &column.name,
                format!(
                    "NOT NULL tightening on `{}` skipped: column contains NULLs",
                    column.name
                ),
            );
            batch.push(Statement::comment(format!(
                "skipped NOT NULL tightening on {}: column contains NULLs",
                &column.name
            )));

            // Apply the remaining shape change, keeping the column
            // nullable.
            if previous.type_name.to_ascii_lowercase() != column.type_name.to_ascii_lowercase() {
                batch.push(Statement::other(
                    AlterColumn {
                        table,
                        name: &column.name,
                        sql_type: &column.type_name,
                        nullable: true,
                    }
                    .to_string(),
                ));
            }
        } else if previous.type_name.to_ascii_lowercase() != column.type_name.to_ascii_lowercase()
            || previous.is_nullable != column.is_nullable
        {
            batch.push(Statement::other(
                AlterColumn {
                    table,
                    name: &column.name,
                    sql_type: &column.type_name,
                    nullable: column.is_nullable,
                }
                .to_string(),
            ));
        }

        apply_default_change(previous, column, new, table, batch);
    }
}

fn length_reduced(previous: &Column, next: &Column) -> bool {
    if !previous.is_text_type() {
        return false;
    }

    matches!(
        (previous.declared_length(), next.declared_length()),
        (Some(TextLength::Chars(from)), Some(TextLength::Chars(to))) if to < from
    ) || matches!(
        (previous.declared_length(), next.declared_length()),
        (Some(TextLength::Max), Some(TextLength::Chars(_)))
    )
}

/// Re-applies a changed column default. The old default constraint is
/// dropped by the constraint stage (introspected models carry it by name).
fn apply_default_change(
    previous: &Column,
    column: &Column,
    new: &EntityDefinition,
    table: TableName<'_>,
    batch: &mut Batch,
) {
    let changed = match (&previous.default_value, &column.default_value) {
        (Some(old_expr), Some(new_expr)) => {
            normalize_expression(old_expr) != normalize_expression(new_expr)
        }
        (None, Some(_)) => true,
        _ => false,
    };

    if !changed {
        return;
    }

    // A named default constraint in the new model is handled by the
    // constraint stages instead.
    let covered_by_constraint = new.constraints.iter().any(|c| {
        c.kind == ConstraintKind::Default
            && c.columns
                .first()
                .is_some_and(|col| col.eq_ignore_ascii_case(&column.name))
    });

    if covered_by_constraint {
        return;
    }

    let expression = column.default_value.as_deref().expect("checked above");
    let name = format!("DF_{}_{}", new.name, column.name);

    batch.push(Statement::other(
        AddDefault {
            table,
            constraint_name: &name,
            column: &column.name,
            expression,
        }
        .to_string(),
    ));
}

fn add_constraints(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: TableName<'_>,
    batch: &mut Batch,
) {
    for constraint in &new.constraints {
        let needed = match old.find_constraint(&constraint.name) {
            Some(previous) => !constraints_equivalent(previous, constraint),
            None => true,
        };

        if !needed {
            continue;
        }

        match constraint.kind {
            ConstraintKind::Unique => batch.push(Statement::other(
                AddUnique {
                    table,
                    constraint_name: &constraint.name,
                    columns: &constraint.columns,
                }
                .to_string(),
            )),
            ConstraintKind::Default => {
                if let (Some(column), Some(expression)) =
                    (constraint.columns.first(), constraint.expression.as_deref())
                {
                    batch.push(Statement::other(
                        AddDefault {
                            table,
                            constraint_name: &constraint.name,
                            column,
                            expression,
                        }
                        .to_string(),
                    ));
                }
            }
            ConstraintKind::PrimaryKey => match &old.primary_key {
                None => batch.push(Statement::other(
                    AddPrimaryKey {
                        table,
                        constraint_name: &constraint.name,
                        columns: &constraint.columns,
                    }
                    .to_string(),
                )),
                // A changed key column set rebuilds the constraint; the
                // same-name retype case is the key migration's job and
                // never reaches here.
                Some(old_pk) if !same_columns(&old_pk.columns, &constraint.columns) => {
                    batch.push(Statement::other(
                        DropConstraint {
                            table,
                            name: &old_pk.name,
                        }
                        .to_string(),
                    ));
                    batch.push(Statement::other(
                        AddPrimaryKey {
                            table,
                            constraint_name: &constraint.name,
                            columns: &constraint.columns,
                        }
                        .to_string(),
                    ));
                }
                Some(_) => {}
            },
            // Checks have their own stage; FKs come last.
            ConstraintKind::Check | ConstraintKind::ForeignKey => {}
        }
    }
}

fn same_columns(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut a: Vec<String> = a.iter().map(|c| c.to_ascii_lowercase()).collect();
    let mut b: Vec<String> = b.iter().map(|c| c.to_ascii_lowercase()).collect();
    a.sort();
    b.sort();

    a == b
}

fn add_checks(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: TableName<'_>,
    batch: &mut Batch,
) {
    for check in &new.check_constraints {
        let needed = match old.find_check(&check.name) {
            Some(previous) => !checks_equivalent(previous, check),
            None => true,
        };

        if !needed {
            continue;
        }

        batch.push(Statement::tagged(
            AddCheck {
                table,
                constraint_name: &check.name,
                expression: &check.expression,
            }
            .to_string(),
            StatementTag::CheckAdded {
                expression: normalize_expression(&check.expression),
            },
        ));
    }
}

fn add_indexes(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: TableName<'_>,
    diagnostics: &mut Diagnostics,
    ctx: &PlanContext,
    batch: &mut Batch,
) {
    for index in &new.indexes {
        let needed = match old.find_index(&index.name) {
            Some(previous) => !indexes_equivalent(previous, index),
            None => true,
        };

        if !needed {
            continue;
        }

        if let Some(added) = index
            .columns
            .iter()
            .find(|c| ctx.added_columns.contains(&c.to_ascii_lowercase()))
        {
            diagnostics.skip(
                &new.name,
                &index.name,
                format!(
                    "index `{}` deferred: column `{added}` is added in this plan",
                    index.name
                ),
            );
            batch.push(Statement::comment(format!(
                "deferred index {}: references column {added} added in this plan",
                &index.name
            )));
            continue;
        }

        let key_bytes = guards::index_key_bytes(index, new);
        if key_bytes > guards::MAX_INDEX_KEY_BYTES {
            diagnostics.skip(
                &new.name,
                &index.name,
                format!(
                    "index `{}` skipped: key is {key_bytes} bytes, over the {} byte limit",
                    index.name,
                    guards::MAX_INDEX_KEY_BYTES
                ),
            );
            batch.push(Statement::comment(format!(
                "skipped index {}: key is {key_bytes} bytes, over the {} byte limit",
                &index.name,
                guards::MAX_INDEX_KEY_BYTES
            )));
            continue;
        }

        batch.push(Statement::tagged(
            CreateIndex {
                table,
                name: &index.name,
                columns: &index.columns,
                unique: index.is_unique,
                include_columns: &index.include_columns,
                filter: index.filter_expression.as_deref(),
            }
            .to_string(),
            StatementTag::IndexAdded {
                signature: guards::index_signature(index),
            },
        ));
    }
}

fn add_foreign_keys(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: TableName<'_>,
    batch: &mut Batch,
) {
    for constraint in &new.constraints {
        if constraint.kind != ConstraintKind::ForeignKey {
            continue;
        }

        let needed = match old.find_constraint(&constraint.name) {
            Some(previous) => !constraints_equivalent(previous, constraint),
            None => true,
        };

        if !needed {
            continue;
        }

        let referenced_schema = constraint.referenced_schema.as_deref().unwrap_or(&new.schema);
        let referenced_table = constraint.referenced_table.as_deref().unwrap_or_default();

        batch.push(Statement::other(
            AddForeignKey {
                table,
                constraint_name: &constraint.name,
                columns: &constraint.columns,
                referenced_table: TableName::new(referenced_schema, referenced_table),
                referenced_columns: &constraint.referenced_columns,
                on_delete: constraint.on_delete.unwrap_or_default().as_sql(),
                on_update: constraint.on_update.unwrap_or_default().as_sql(),
            }
            .to_string(),
        ));
    }
}
