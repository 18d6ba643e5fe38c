//! The safe column migration protocol: shadow column, copy, constraint
//! drop, swap, reinstate. One transactional block per column.

use crate::planner::PlanContext;
use crate::script::{Batch, Statement, StatementTag};
use entity_model::{
    checks_equivalent, normalize_expression, Column, ConstraintKind, EntityDefinition,
};
use sql_ddl::{escape_string, AddCheck, Ident, TableName};
use std::fmt::Write as _;

/// The rewrite applied while copying values into the shadow column. Plain
/// copy when the base type is unchanged, a safe conversion otherwise.
pub(crate) fn copy_expression(old_column: &Column, new_column: &Column) -> String {
    if old_column
        .base_type()
        .eq_ignore_ascii_case(new_column.base_type())
    {
        format!("{}", Ident(&old_column.name))
    } else {
        format!("TRY_CONVERT({}, {})", new_column.type_name, Ident(&old_column.name))
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn plan_safe_column_migration(
    old: &EntityDefinition,
    new: &EntityDefinition,
    old_column: &Column,
    new_column: &Column,
    copy_expr: Option<&str>,
    reapply_default: Option<&str>,
    ctx: &mut PlanContext,
    batch: &mut Batch,
) {
    let table = TableName::new(&new.schema, &new.name);
    let column = &new_column.name;
    let shadow = format!("{column}_New");
    let object_id = format!("{}.{}", new.schema, new.name);

    let copy = copy_expr
        .map(str::to_owned)
        .unwrap_or_else(|| copy_expression(old_column, new_column));

    batch.push(Statement::comment(format!(
        "Safe column migration for {table}.{}: {} -> {}",
        Ident(column),
        old_column.type_name,
        new_column.type_name
    )));

    let mut sql = String::new();
    let w = &mut sql;

    writeln!(w, "BEGIN TRANSACTION;").unwrap();
    writeln!(w, "BEGIN TRY").unwrap();
    writeln!(
        w,
        "    ALTER TABLE {table} ADD {} {} NULL;",
        Ident(&shadow),
        new_column.type_name
    )
    .unwrap();
    writeln!(w).unwrap();
    writeln!(w, "    UPDATE {table} SET {} = {copy};", Ident(&shadow)).unwrap();
    writeln!(w).unwrap();

    // Catalog-driven drop of every default and check constraint still
    // referencing the old column.
    writeln!(w, "    DECLARE @drop_sql nvarchar(max);").unwrap();
    writeln!(
        w,
        "    DECLARE constraint_cursor CURSOR LOCAL FAST_FORWARD FOR"
    )
    .unwrap();
    writeln!(
        w,
        "        SELECT 'ALTER TABLE {table} DROP CONSTRAINT [' + dc.name + ']'"
    )
    .unwrap();
    writeln!(w, "        FROM sys.default_constraints dc").unwrap();
    writeln!(
        w,
        "             JOIN sys.columns c ON dc.parent_object_id = c.object_id AND dc.parent_column_id = c.column_id"
    )
    .unwrap();
    writeln!(
        w,
        "        WHERE dc.parent_object_id = OBJECT_ID('{}') AND c.name = '{}'",
        escape_string(&object_id),
        escape_string(column)
    )
    .unwrap();
    writeln!(w, "        UNION ALL").unwrap();
    writeln!(
        w,
        "        SELECT 'ALTER TABLE {table} DROP CONSTRAINT [' + cc.name + ']'"
    )
    .unwrap();
    writeln!(w, "        FROM sys.check_constraints cc").unwrap();
    writeln!(
        w,
        "        WHERE cc.parent_object_id = OBJECT_ID('{}') AND cc.definition LIKE '%[[]{}]%';",
        escape_string(&object_id),
        escape_string(column)
    )
    .unwrap();
    writeln!(w, "    OPEN constraint_cursor;").unwrap();
    writeln!(w, "    FETCH NEXT FROM constraint_cursor INTO @drop_sql;").unwrap();
    writeln!(w, "    WHILE @@FETCH_STATUS = 0").unwrap();
    writeln!(w, "    BEGIN").unwrap();
    writeln!(w, "        EXEC sp_executesql @drop_sql;").unwrap();
    writeln!(w, "        FETCH NEXT FROM constraint_cursor INTO @drop_sql;").unwrap();
    writeln!(w, "    END;").unwrap();
    writeln!(w, "    CLOSE constraint_cursor;").unwrap();
    writeln!(w, "    DEALLOCATE constraint_cursor;").unwrap();
    writeln!(w).unwrap();
    writeln!(w, "    ALTER TABLE {table} DROP COLUMN {};", Ident(column)).unwrap();
    writeln!(
        w,
        "    EXEC sp_rename '{}.{}', '{}', 'COLUMN';",
        escape_string(&object_id),
        escape_string(&shadow),
        escape_string(column)
    )
    .unwrap();

    if !new_column.is_nullable {
        writeln!(
            w,
            "    ALTER TABLE {table} ALTER COLUMN {} {} NOT NULL;",
            Ident(column),
            new_column.type_name
        )
        .unwrap();
    }

    let default_expression = reapply_default
        .map(str::to_owned)
        .or_else(|| new_column.default_value.clone());
    if let Some(expression) = default_expression {
        writeln!(
            w,
            "    ALTER TABLE {table} ADD CONSTRAINT {} DEFAULT {} FOR {};",
            Ident(&format!("DF_{}_{column}", new.name)),
            expression,
            Ident(column)
        )
        .unwrap();
    }

    writeln!(w, "    COMMIT TRANSACTION;").unwrap();
    writeln!(w, "END TRY").unwrap();
    writeln!(w, "BEGIN CATCH").unwrap();
    writeln!(w, "    IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;").unwrap();
    writeln!(w, "    THROW;").unwrap();
    write!(w, "END CATCH;").unwrap();

    batch.push(Statement::other(sql));

    // Bookkeeping: the protocol dropped these; the general change stage
    // must not drop them again.
    for constraint in &old.constraints {
        let on_column = constraint
            .columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column));

        if on_column && matches!(constraint.kind, ConstraintKind::Default | ConstraintKind::Check) {
            ctx.dropped_constraints
                .insert(constraint.name.to_ascii_lowercase());
        }
    }

    // Reinstate checks the protocol dropped that the new model does not
    // replace.
    for check in &old.check_constraints {
        let on_column = check
            .referenced_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column));

        if !on_column {
            continue;
        }

        ctx.dropped_constraints
            .insert(check.name.to_ascii_lowercase());

        let replaced = new
            .check_constraints
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&check.name) || checks_equivalent(c, check));

        if !replaced {
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
}
