//! Primary key retype migration.
//!
//! When the PK column keeps its name but changes type, a dedicated batch
//! clones the column, copies values, re-points every referencing foreign
//! key in the catalog at the clone, and swaps the key. Columns touched here
//! land in the exclusion list so downstream stages do no double work.

use crate::planner::{column_migration, PlanContext};
use crate::script::{Batch, MigrationScript, Statement};
use entity_model::EntityDefinition;
use sql_ddl::{escape_string, Ident, TableName};
use std::fmt::Write as _;

/// Whether the pair needs a PK migration: same single-column key name,
/// different column type.
pub(crate) fn pk_migration_required(old: &EntityDefinition, new: &EntityDefinition) -> bool {
    let (Some(old_pk), Some(new_pk)) = (&old.primary_key, &new.primary_key) else {
        return false;
    };

    if old_pk.columns.len() != 1 || new_pk.columns.len() != 1 {
        return false;
    }

    if !old_pk.columns[0].eq_ignore_ascii_case(&new_pk.columns[0]) {
        return false;
    }

    match (
        old.find_column(&old_pk.columns[0]),
        new.find_column(&new_pk.columns[0]),
    ) {
        (Some(old_column), Some(new_column)) => !old_column
            .base_type()
            .eq_ignore_ascii_case(new_column.base_type()),
        _ => false,
    }
}

pub(crate) fn plan_pk_migration(
    old: &EntityDefinition,
    new: &EntityDefinition,
    copy_expr: Option<&str>,
    ctx: &mut PlanContext,
    script: &mut MigrationScript,
) {
    let old_pk = old.primary_key.as_ref().expect("checked by caller");
    let new_pk = new.primary_key.as_ref().expect("checked by caller");
    let column = new_pk.columns[0].clone();
    let old_column = old.find_column(&column).expect("checked by caller");
    let new_column = new.find_column(&column).expect("checked by caller");

    let table = TableName::new(&new.schema, &new.name);
    let shadow = format!("{column}_New");
    let object_id = format!("{}.{}", new.schema, new.name);

    let copy = copy_expr
        .map(str::to_owned)
        .unwrap_or_else(|| column_migration::copy_expression(old_column, new_column));

    let mut batch = Batch::new("primary key migration");

    batch.push(Statement::comment(format!(
        "Primary key migration for {table}.{}: {} -> {}",
        Ident(&column),
        old_column.type_name,
        new_column.type_name
    )));

    let mut sql = String::new();
    let w = &mut sql;

    writeln!(w, "BEGIN TRY").unwrap();

    // 1-3: clone, copy, harden.
    writeln!(
        w,
        "    ALTER TABLE {table} ADD {} {} NULL;",
        Ident(&shadow),
        new_column.type_name
    )
    .unwrap();
    writeln!(w, "    UPDATE {table} SET {} = {copy};", Ident(&shadow)).unwrap();
    writeln!(
        w,
        "    ALTER TABLE {table} ALTER COLUMN {} {} NOT NULL;",
        Ident(&shadow),
        new_column.type_name
    )
    .unwrap();
    writeln!(w).unwrap();

    // 4: every referencing foreign key in the catalog: drop, re-point the
    // child rows at the cloned values, re-add later against the swapped
    // column.
    writeln!(
        w,
        "    DECLARE @fks TABLE (fk_name sysname, child_schema sysname, child_table sysname, child_column sysname);"
    )
    .unwrap();
    writeln!(
        w,
        "    INSERT INTO @fks (fk_name, child_schema, child_table, child_column)"
    )
    .unwrap();
    writeln!(
        w,
        "    SELECT fk.name, SCHEMA_NAME(ct.schema_id), ct.name, pc.name"
    )
    .unwrap();
    writeln!(w, "    FROM sys.foreign_keys fk").unwrap();
    writeln!(
        w,
        "         JOIN sys.foreign_key_columns fkc ON fk.object_id = fkc.constraint_object_id"
    )
    .unwrap();
    writeln!(
        w,
        "         JOIN sys.tables ct ON fk.parent_object_id = ct.object_id"
    )
    .unwrap();
    writeln!(
        w,
        "         JOIN sys.columns pc ON fkc.parent_object_id = pc.object_id AND fkc.parent_column_id = pc.column_id"
    )
    .unwrap();
    writeln!(
        w,
        "         JOIN sys.columns rc ON fkc.referenced_object_id = rc.object_id AND fkc.referenced_column_id = rc.column_id"
    )
    .unwrap();
    writeln!(
        w,
        "    WHERE fkc.referenced_object_id = OBJECT_ID('{}') AND rc.name = '{}';",
        escape_string(&object_id),
        escape_string(&column)
    )
    .unwrap();
    writeln!(w).unwrap();
    writeln!(
        w,
        "    DECLARE @fk_name sysname, @child_schema sysname, @child_table sysname, @child_column sysname, @sql nvarchar(max);"
    )
    .unwrap();
    writeln!(
        w,
        "    DECLARE fk_cursor CURSOR LOCAL FAST_FORWARD FOR SELECT fk_name, child_schema, child_table, child_column FROM @fks;"
    )
    .unwrap();
    writeln!(w, "    OPEN fk_cursor;").unwrap();
    writeln!(
        w,
        "    FETCH NEXT FROM fk_cursor INTO @fk_name, @child_schema, @child_table, @child_column;"
    )
    .unwrap();
    writeln!(w, "    WHILE @@FETCH_STATUS = 0").unwrap();
    writeln!(w, "    BEGIN").unwrap();
    writeln!(
        w,
        "        SET @sql = N'ALTER TABLE [' + @child_schema + N'].[' + @child_table + N'] DROP CONSTRAINT [' + @fk_name + N']';"
    )
    .unwrap();
    writeln!(w, "        EXEC sp_executesql @sql;").unwrap();
    writeln!(
        w,
        "        SET @sql = N'UPDATE c SET c.[' + @child_column + N'] = p.{} FROM [' + @child_schema + N'].[' + @child_table + N'] c JOIN {table} p ON c.[' + @child_column + N'] = p.{}';",
        Ident(&shadow),
        Ident(&column)
    )
    .unwrap();
    writeln!(w, "        EXEC sp_executesql @sql;").unwrap();
    writeln!(
        w,
        "        FETCH NEXT FROM fk_cursor INTO @fk_name, @child_schema, @child_table, @child_column;"
    )
    .unwrap();
    writeln!(w, "    END;").unwrap();
    writeln!(w, "    CLOSE fk_cursor;").unwrap();
    writeln!(w, "    DEALLOCATE fk_cursor;").unwrap();
    writeln!(w).unwrap();

    // 5: checks referencing the PK column.
    writeln!(w, "    DECLARE @drop_check nvarchar(max);").unwrap();
    writeln!(w, "    DECLARE check_cursor CURSOR LOCAL FAST_FORWARD FOR").unwrap();
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
        escape_string(&column)
    )
    .unwrap();
    writeln!(w, "    OPEN check_cursor;").unwrap();
    writeln!(w, "    FETCH NEXT FROM check_cursor INTO @drop_check;").unwrap();
    writeln!(w, "    WHILE @@FETCH_STATUS = 0").unwrap();
    writeln!(w, "    BEGIN").unwrap();
    writeln!(w, "        EXEC sp_executesql @drop_check;").unwrap();
    writeln!(w, "        FETCH NEXT FROM check_cursor INTO @drop_check;").unwrap();
    writeln!(w, "    END;").unwrap();
    writeln!(w, "    CLOSE check_cursor;").unwrap();
    writeln!(w, "    DEALLOCATE check_cursor;").unwrap();
    writeln!(w).unwrap();

    // 6: swap the key.
    writeln!(
        w,
        "    ALTER TABLE {table} DROP CONSTRAINT {};",
        Ident(&old_pk.name)
    )
    .unwrap();
    writeln!(w, "    ALTER TABLE {table} DROP COLUMN {};", Ident(&column)).unwrap();
    writeln!(
        w,
        "    EXEC sp_rename '{}.{}', '{}', 'COLUMN';",
        escape_string(&object_id),
        escape_string(&shadow),
        escape_string(&column)
    )
    .unwrap();
    writeln!(
        w,
        "    ALTER TABLE {table} ADD CONSTRAINT {} PRIMARY KEY ({});",
        Ident(&new_pk.name),
        Ident(&column)
    )
    .unwrap();
    writeln!(w).unwrap();

    // Re-add the saved foreign keys against the swapped column.
    writeln!(
        w,
        "    DECLARE readd_cursor CURSOR LOCAL FAST_FORWARD FOR SELECT fk_name, child_schema, child_table, child_column FROM @fks;"
    )
    .unwrap();
    writeln!(w, "    OPEN readd_cursor;").unwrap();
    writeln!(
        w,
        "    FETCH NEXT FROM readd_cursor INTO @fk_name, @child_schema, @child_table, @child_column;"
    )
    .unwrap();
    writeln!(w, "    WHILE @@FETCH_STATUS = 0").unwrap();
    writeln!(w, "    BEGIN").unwrap();
    writeln!(
        w,
        "        SET @sql = N'ALTER TABLE [' + @child_schema + N'].[' + @child_table + N'] ADD CONSTRAINT [' + @fk_name + N'] FOREIGN KEY ([' + @child_column + N']) REFERENCES {table} ({})';",
        Ident(&column)
    )
    .unwrap();
    writeln!(w, "        EXEC sp_executesql @sql;").unwrap();
    writeln!(
        w,
        "        FETCH NEXT FROM readd_cursor INTO @fk_name, @child_schema, @child_table, @child_column;"
    )
    .unwrap();
    writeln!(w, "    END;").unwrap();
    writeln!(w, "    CLOSE readd_cursor;").unwrap();
    writeln!(w, "    DEALLOCATE readd_cursor;").unwrap();
    writeln!(w, "END TRY").unwrap();
    writeln!(w, "BEGIN CATCH").unwrap();
    writeln!(w, "    THROW;").unwrap();
    write!(w, "END CATCH;").unwrap();

    batch.push(Statement::other(sql));
    script.push_batch(batch);

    ctx.excluded_columns.insert(column.to_ascii_lowercase());

    // The protocol already replaced the PK constraint and dropped the
    // referencing checks.
    ctx.dropped_constraints
        .insert(old_pk.name.to_ascii_lowercase());
    for check in &old.check_constraints {
        if check
            .referenced_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&column))
        {
            ctx.dropped_constraints
                .insert(check.name.to_ascii_lowercase());
        }
    }
}
