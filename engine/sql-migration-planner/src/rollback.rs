//! Inverse-statement synthesis from a change list.
//!
//! Additions invert mechanically. Dropped objects cannot be synthesized
//! back from a diff and are flagged irreversible instead.

use crate::differ::{ChangeAction, ImpactItem, ObjectKind};
use entity_model::EntityDefinition;
use sql_ddl::{AddCheck, AlterColumn, CreateIndex, DropColumn, DropConstraint, DropIndex, TableName};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackPlan {
    pub statements: Vec<String>,
    /// Human-readable records of changes the rollback cannot undo.
    pub irreversible: Vec<String>,
}

impl RollbackPlan {
    pub fn is_complete(&self) -> bool {
        self.irreversible.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.irreversible {
            out.push_str("-- irreversible: ");
            out.push_str(entry);
            out.push('\n');
        }
        for statement in &self.statements {
            out.push_str(statement);
            out.push('\n');
        }
        out
    }
}

/// Synthesizes the inverse of a plan's change list. Statements come out in
/// reverse application order.
pub fn synthesize_rollback(
    impacts: &[ImpactItem],
    old: &EntityDefinition,
    new: &EntityDefinition,
) -> RollbackPlan {
    let table = TableName::new(&new.schema, &new.name);
    let mut plan = RollbackPlan::default();

    for impact in impacts.iter().rev() {
        match (impact.object_kind, impact.action) {
            (ObjectKind::Column, ChangeAction::Added) => {
                plan.statements.push(
                    DropColumn {
                        table,
                        name: &impact.name,
                    }
                    .to_string(),
                );
            }
            (ObjectKind::Column, ChangeAction::Modified) => {
                match old.find_column(&impact.name) {
                    Some(original) => plan.statements.push(
                        AlterColumn {
                            table,
                            name: &impact.name,
                            sql_type: &original.type_name,
                            nullable: original.is_nullable,
                        }
                        .to_string(),
                    ),
                    None => plan.irreversible.push(format!(
                        "column `{}` was modified but its original definition is unknown",
                        impact.name
                    )),
                }
            }
            (ObjectKind::Constraint | ObjectKind::Default | ObjectKind::Check, ChangeAction::Added) => {
                plan.statements.push(
                    DropConstraint {
                        table,
                        name: &impact.name,
                    }
                    .to_string(),
                );
            }
            (ObjectKind::Check, ChangeAction::Modified) => {
                match old.find_check(&impact.name) {
                    Some(original) => {
                        plan.statements.push(
                            DropConstraint {
                                table,
                                name: &impact.name,
                            }
                            .to_string(),
                        );
                        plan.statements.push(
                            AddCheck {
                                table,
                                constraint_name: &original.name,
                                expression: &original.expression,
                            }
                            .to_string(),
                        );
                    }
                    None => plan.irreversible.push(format!(
                        "check constraint `{}` was modified but its original expression is unknown",
                        impact.name
                    )),
                }
            }
            (ObjectKind::Index, ChangeAction::Added) => {
                plan.statements.push(
                    DropIndex {
                        table,
                        name: &impact.name,
                    }
                    .to_string(),
                );
            }
            (ObjectKind::Index, ChangeAction::Modified) => {
                match old.find_index(&impact.name) {
                    Some(original) => {
                        plan.statements.push(
                            DropIndex {
                                table,
                                name: &impact.name,
                            }
                            .to_string(),
                        );
                        plan.statements.push(
                            CreateIndex {
                                table,
                                name: &original.name,
                                columns: &original.columns,
                                unique: original.is_unique,
                                include_columns: &original.include_columns,
                                filter: original.filter_expression.as_deref(),
                            }
                            .to_string(),
                        );
                    }
                    None => plan.irreversible.push(format!(
                        "index `{}` was modified but its original shape is unknown",
                        impact.name
                    )),
                }
            }
            (ObjectKind::Constraint | ObjectKind::Default, ChangeAction::Modified) => {
                plan.irreversible.push(format!(
                    "constraint `{}` was modified; restore it from the previous model snapshot",
                    impact.name
                ));
            }
            (_, ChangeAction::Dropped) => {
                plan.irreversible.push(format!(
                    "{} `{}` was dropped and cannot be synthesized back",
                    impact.object_kind, impact.name
                ));
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::diff_entities;
    use entity_model::{Column, EntityDefinition, Index};
    use pretty_assertions::assert_eq;

    fn base() -> EntityDefinition {
        let mut entity = EntityDefinition::new("dbo", "User");
        entity.columns.push(Column::new("Id", "uniqueidentifier"));
        entity
    }

    // A plan consisting only of additions inverts exactly.
    #[test]
    fn additive_plans_invert_completely() {
        let old = base();
        let mut new = base();
        new.columns.push(Column {
            is_nullable: true,
            ..Column::new("Age", "int")
        });
        new.indexes.push(Index::new("IX_User_Age", vec!["Age".into()]));

        let impacts = diff_entities(&old, &new);
        let rollback = synthesize_rollback(&impacts, &old, &new);

        assert!(rollback.is_complete());
        assert_eq!(
            rollback.statements,
            vec![
                "DROP INDEX [IX_User_Age] ON [dbo].[User];".to_owned(),
                "ALTER TABLE [dbo].[User] DROP COLUMN [Age];".to_owned(),
            ]
        );
    }

    #[test]
    fn modified_column_rolls_back_to_the_original_type() {
        let mut old = base();
        old.columns.push(Column {
            is_nullable: true,
            ..Column::new("Email", "nvarchar(200)")
        });
        let mut new = base();
        new.columns.push(Column {
            is_nullable: true,
            ..Column::new("Email", "nvarchar(400)")
        });

        let impacts = diff_entities(&old, &new);
        let rollback = synthesize_rollback(&impacts, &old, &new);

        assert_eq!(
            rollback.statements,
            vec!["ALTER TABLE [dbo].[User] ALTER COLUMN [Email] nvarchar(200) NULL;".to_owned()]
        );
    }

    #[test]
    fn dropped_items_are_flagged_irreversible() {
        let mut old = base();
        old.columns.push(Column::new("Legacy", "int"));
        let new = base();

        let impacts = diff_entities(&old, &new);
        let rollback = synthesize_rollback(&impacts, &old, &new);

        assert!(!rollback.is_complete());
        assert!(rollback.statements.is_empty());
        assert!(rollback.irreversible[0].contains("Legacy"));
    }
}
