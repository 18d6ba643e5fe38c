//! The new-table path: one CREATE script instead of a change plan.

use crate::planner::guards;
use crate::script::{Batch, MigrationScript, Statement, StatementTag};
use entity_model::{normalize_expression, ConstraintKind, EntityDefinition};
use sql_ddl::{
    AddCheck, AddForeignKey, AddUnique, ColumnDef, CreateIndex, CreateTable, DefaultClause,
    PrimaryKeyClause, TableName,
};
use std::collections::HashSet;

pub(crate) fn plan_create_table(new: &EntityDefinition, script: &mut MigrationScript) {
    let table = TableName::new(&new.schema, &new.name);

    // Inline default constraints get conventional names so later plans can
    // address them.
    let default_names: Vec<(String, String)> = new
        .persisted_columns()
        .filter_map(|c| {
            c.default_value
                .as_ref()
                .map(|expr| (format!("DF_{}_{}", new.name, c.name), expr.clone()))
        })
        .collect();

    let mut header = Batch::new("create table");
    {
        let mut defaults = default_names.iter();
        let columns: Vec<ColumnDef<'_>> = new
            .persisted_columns()
            .map(|c| ColumnDef {
                name: &c.name,
                sql_type: &c.type_name,
                nullable: c.is_nullable,
                identity: c.is_identity,
                default: c.default_value.as_deref().map(|_| {
                    let (name, expr) = defaults.next().expect("one entry per defaulted column");
                    DefaultClause {
                        constraint_name: Some(name.as_str()),
                        expression: expr,
                    }
                }),
            })
            .collect();

        let create = CreateTable {
            table,
            columns,
            primary_key: new.primary_key.as_ref().map(|pk| PrimaryKeyClause {
                constraint_name: &pk.name,
                columns: &pk.columns,
            }),
        };

        header.push(Statement::other(create.to_string()));
    }
    script.push_batch(header);

    let mut objects = Batch::new("constraints and indexes");

    for constraint in &new.constraints {
        match constraint.kind {
            ConstraintKind::Unique => objects.push(Statement::other(
                AddUnique {
                    table,
                    constraint_name: &constraint.name,
                    columns: &constraint.columns,
                }
                .to_string(),
            )),
            ConstraintKind::Check => {
                let expression = constraint.expression.as_deref().unwrap_or_default();
                objects.push(Statement::tagged(
                    AddCheck {
                        table,
                        constraint_name: &constraint.name,
                        expression,
                    }
                    .to_string(),
                    StatementTag::CheckAdded {
                        expression: normalize_expression(expression),
                    },
                ));
            }
            // PK is inline, defaults are inline, FKs come last.
            _ => {}
        }
    }

    // Structured checks, skipping any already present in the unified list.
    let unified_checks: HashSet<String> = new
        .constraints
        .iter()
        .filter(|c| c.kind == ConstraintKind::Check)
        .map(|c| c.name.to_ascii_lowercase())
        .collect();

    for check in &new.check_constraints {
        if unified_checks.contains(&check.name.to_ascii_lowercase()) {
            continue;
        }

        objects.push(Statement::tagged(
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

    for index in &new.indexes {
        objects.push(Statement::tagged(
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

    for constraint in &new.constraints {
        if constraint.kind != ConstraintKind::ForeignKey {
            continue;
        }

        let referenced_schema = constraint.referenced_schema.as_deref().unwrap_or(&new.schema);
        let referenced_table = constraint.referenced_table.as_deref().unwrap_or_default();

        objects.push(Statement::other(
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

    script.push_batch(objects);
}
