//! The trailing descriptions batch: idempotent extended-property upserts.

use crate::script::{Batch, MigrationScript, Statement};
use entity_model::EntityDefinition;
use sql_ddl::{DescriptionTarget, DescriptionUpsert, TableName};

pub(crate) fn plan_descriptions(
    old: &EntityDefinition,
    new: &EntityDefinition,
    script: &mut MigrationScript,
) {
    let mut batch = Batch::new("descriptions");
    let table = TableName::new(&new.schema, &new.name);

    if let Some(description) = &new.description {
        if old.description.as_deref() != Some(description) {
            batch.push(Statement::other(
                DescriptionUpsert {
                    table,
                    target: DescriptionTarget::Table,
                    description,
                }
                .to_string(),
            ));
        }
    }

    for column in new.persisted_columns() {
        let Some(description) = &column.description else {
            continue;
        };

        let unchanged = old
            .find_column(&column.name)
            .and_then(|c| c.description.as_deref())
            == Some(description);

        if !unchanged {
            batch.push(Statement::other(
                DescriptionUpsert {
                    table,
                    target: DescriptionTarget::Column(&column.name),
                    description,
                }
                .to_string(),
            ));
        }
    }

    for constraint in &new.constraints {
        let Some(description) = &constraint.description else {
            continue;
        };

        let unchanged = old
            .find_constraint(&constraint.name)
            .and_then(|c| c.description.as_deref())
            == Some(description);

        if !unchanged {
            batch.push(Statement::other(
                DescriptionUpsert {
                    table,
                    target: DescriptionTarget::Constraint(&constraint.name),
                    description,
                }
                .to_string(),
            ));
        }
    }

    for check in &new.check_constraints {
        let Some(description) = &check.description else {
            continue;
        };

        let unchanged = old
            .find_check(&check.name)
            .and_then(|c| c.description.as_deref())
            == Some(description);

        if !unchanged {
            batch.push(Statement::other(
                DescriptionUpsert {
                    table,
                    target: DescriptionTarget::Constraint(&check.name),
                    description,
                }
                .to_string(),
            ));
        }
    }

    script.push_batch(batch);
}
