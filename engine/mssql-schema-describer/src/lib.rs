//! Reconstructs an [`EntityDefinition`] from the live SQL Server catalog.
//!
//! A fixed set of `sys.*` queries per table, merged by ordinal position for
//! composite keys. This component performs no writes.

use entity_model::{
    CheckConstraint, Column, Constraint, ConstraintKind, EntityDefinition, Index, PrimaryKey,
    ReferentialAction,
};
use indoc::indoc;
use once_cell::sync::Lazy;
use regex::Regex;
use sql_connection::{Queryable, ResultRow};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, trace};

pub type DescriberResult<T> = Result<T, DescriberError>;

#[derive(Debug, thiserror::Error)]
pub enum DescriberError {
    #[error("catalog read failed: {0}")]
    Connection(#[from] sql_connection::ConnectionError),
}

/// A bracketed identifier inside an expression: `[Price]`.
static BRACKETED_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]").unwrap());

pub struct SchemaDescriber<'a> {
    conn: &'a dyn Queryable,
}

impl<'a> std::fmt::Debug for SchemaDescriber<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaDescriber").finish_non_exhaustive()
    }
}

impl<'a> SchemaDescriber<'a> {
    pub fn new(conn: &'a dyn Queryable) -> Self {
        SchemaDescriber { conn }
    }

    /// Lists the user tables of a schema.
    pub async fn table_names(&self, schema: &str) -> DescriberResult<Vec<String>> {
        let sql = indoc! {r#"
            SELECT t.name AS table_name
            FROM sys.tables t
            WHERE SCHEMA_NAME(t.schema_id) = @P1
              AND t.is_ms_shipped = 0
              AND t.type = 'U'
            ORDER BY t.name;
        "#};

        let rows = self.conn.query_raw(sql, &[schema.into()]).await?;
        let names = rows
            .into_iter()
            .map(|row| row.get_expect_string("table_name"))
            .collect();

        trace!(?names, "found table names");

        Ok(names)
    }

    /// Reconstructs the definition of one table. A missing table returns
    /// the empty shape, which the planner reads as "new table".
    pub async fn describe(&self, schema: &str, table: &str) -> DescriberResult<EntityDefinition> {
        let mut entity = EntityDefinition::new(schema, table);

        if !self.table_exists(schema, table).await? {
            debug!(schema, table, "table does not exist, returning empty shape");
            return Ok(entity);
        }

        self.get_columns(schema, table, &mut entity).await?;
        self.get_indexes(schema, table, &mut entity).await?;
        self.get_key_constraints(schema, table, &mut entity).await?;
        self.get_foreign_keys(schema, table, &mut entity).await?;
        self.get_check_constraints(schema, table, &mut entity).await?;
        self.get_default_constraints(schema, table, &mut entity).await?;
        self.get_descriptions(schema, table, &mut entity).await?;

        Ok(entity)
    }

    async fn table_exists(&self, schema: &str, table: &str) -> DescriberResult<bool> {
        let sql = indoc! {r#"
            SELECT t.name AS table_name
            FROM sys.tables t
            WHERE SCHEMA_NAME(t.schema_id) = @P1 AND t.name = @P2 AND t.is_ms_shipped = 0;
        "#};

        let rows = self
            .conn
            .query_raw(sql, &[schema.into(), table.into()])
            .await?;

        Ok(!rows.is_empty())
    }

    async fn get_columns(
        &self,
        schema: &str,
        table: &str,
        entity: &mut EntityDefinition,
    ) -> DescriberResult<()> {
        let sql = indoc! {r#"
            SELECT c.name                                          AS column_name,
                   TYPE_NAME(c.user_type_id)                       AS data_type,
                   c.max_length                                    AS max_length,
                   c.precision                                     AS numeric_precision,
                   c.scale                                         AS numeric_scale,
                   c.is_nullable                                   AS is_nullable,
                   COLUMNPROPERTY(c.object_id, c.name, 'IsIdentity') AS is_identity,
                   OBJECT_DEFINITION(c.default_object_id)          AS column_default
            FROM sys.columns c
                 INNER JOIN sys.tables t ON c.object_id = t.object_id
            WHERE SCHEMA_NAME(t.schema_id) = @P1 AND t.name = @P2
            ORDER BY c.column_id;
        "#};

        let rows = self
            .conn
            .query_raw(sql, &[schema.into(), table.into()])
            .await?;

        for row in rows {
            trace!(?row, "got column row");

            let name = row.get_expect_string("column_name");
            let data_type = row.get_expect_string("data_type");
            let max_length = row.get_i64("max_length");
            let precision = row.get_i64("numeric_precision");
            let scale = row.get_i64("numeric_scale");

            let type_name = render_type_name(&data_type, max_length, precision, scale);

            let mut column = Column {
                name,
                type_name,
                is_nullable: row.get_expect_bool("is_nullable"),
                is_identity: row.get_bool("is_identity").unwrap_or(false),
                default_value: row.get_string("column_default"),
                ..Default::default()
            };

            if matches!(data_type.as_str(), "decimal" | "numeric") {
                column.precision = precision.and_then(|p| u8::try_from(p).ok());
                column.scale = scale.and_then(|s| u8::try_from(s).ok());
            }

            entity.columns.push(column);
        }

        Ok(())
    }

    /// Plain and unique indexes, excluding the ones backing primary key or
    /// unique constraints, which surface as constraints.
    async fn get_indexes(
        &self,
        schema: &str,
        table: &str,
        entity: &mut EntityDefinition,
    ) -> DescriberResult<()> {
        let sql = indoc! {r#"
            SELECT ind.name               AS index_name,
                   ind.is_unique          AS is_unique,
                   ind.filter_definition  AS filter_definition,
                   col.name               AS column_name,
                   ic.key_ordinal         AS seq_in_index,
                   ic.is_included_column  AS is_included
            FROM sys.indexes ind
                 INNER JOIN sys.index_columns ic
                         ON ind.object_id = ic.object_id AND ind.index_id = ic.index_id
                 INNER JOIN sys.columns col
                         ON ic.object_id = col.object_id AND ic.column_id = col.column_id
                 INNER JOIN sys.tables t ON ind.object_id = t.object_id
            WHERE SCHEMA_NAME(t.schema_id) = @P1
              AND t.name = @P2
              AND ind.is_primary_key = 0
              AND ind.is_unique_constraint = 0
              AND ind.is_hypothetical = 0
              AND ind.name IS NOT NULL
            ORDER BY index_name, is_included, seq_in_index;
        "#};

        let rows = self
            .conn
            .query_raw(sql, &[schema.into(), table.into()])
            .await?;

        // Multi-column indexes return one row per column; merge on name.
        let mut indexes: BTreeMap<String, Index> = BTreeMap::new();

        for row in rows {
            let index_name = row.get_expect_string("index_name");
            let column_name = row.get_expect_string("column_name");
            let is_included = row.get_bool("is_included").unwrap_or(false);

            let index = indexes.entry(index_name.clone()).or_insert_with(|| Index {
                name: index_name,
                is_unique: row.get_expect_bool("is_unique"),
                filter_expression: row.get_string("filter_definition"),
                ..Default::default()
            });

            if is_included {
                index.include_columns.push(column_name);
            } else {
                index.columns.push(column_name);
            }
        }

        entity.indexes.extend(indexes.into_values());

        Ok(())
    }

    /// Primary key and unique constraints with their ordered column lists.
    async fn get_key_constraints(
        &self,
        schema: &str,
        table: &str,
        entity: &mut EntityDefinition,
    ) -> DescriberResult<()> {
        let sql = indoc! {r#"
            SELECT kc.name          AS constraint_name,
                   kc.type          AS constraint_type,
                   col.name         AS column_name,
                   ic.key_ordinal   AS seq_in_index
            FROM sys.key_constraints kc
                 INNER JOIN sys.indexes ind
                         ON kc.parent_object_id = ind.object_id AND kc.unique_index_id = ind.index_id
                 INNER JOIN sys.index_columns ic
                         ON ind.object_id = ic.object_id AND ind.index_id = ic.index_id
                 INNER JOIN sys.columns col
                         ON ic.object_id = col.object_id AND ic.column_id = col.column_id
                 INNER JOIN sys.tables t ON kc.parent_object_id = t.object_id
            WHERE SCHEMA_NAME(t.schema_id) = @P1 AND t.name = @P2
            ORDER BY constraint_name, seq_in_index;
        "#};

        let rows = self
            .conn
            .query_raw(sql, &[schema.into(), table.into()])
            .await?;

        let mut primary_key: Option<PrimaryKey> = None;
        let mut uniques: BTreeMap<String, Constraint> = BTreeMap::new();

        for row in rows {
            let constraint_name = row.get_expect_string("constraint_name");
            let constraint_type = row.get_expect_string("constraint_type");
            let column_name = row.get_expect_string("column_name");

            if constraint_type.trim() == "PK" {
                match &mut primary_key {
                    Some(pk) => pk.columns.push(column_name),
                    None => {
                        primary_key = Some(PrimaryKey {
                            name: constraint_name,
                            columns: vec![column_name],
                            is_auto_generated: false,
                        })
                    }
                }
            } else {
                uniques
                    .entry(constraint_name.clone())
                    .or_insert_with(|| Constraint::unique(constraint_name, Vec::new()))
                    .columns
                    .push(column_name);
            }
        }

        if let Some(pk) = &primary_key {
            entity
                .constraints
                .push(Constraint::primary_key(pk.name.clone(), pk.columns.clone()));
        }
        entity.primary_key = primary_key;
        entity.constraints.extend(uniques.into_values());

        Ok(())
    }

    async fn get_foreign_keys(
        &self,
        schema: &str,
        table: &str,
        entity: &mut EntityDefinition,
    ) -> DescriberResult<()> {
        let sql = indoc! {r#"
            SELECT OBJECT_NAME(fkc.constraint_object_id)        AS constraint_name,
                   referenced_table.name                        AS referenced_table_name,
                   SCHEMA_NAME(referenced_table.schema_id)      AS referenced_schema_name,
                   parent_column.name                           AS column_name,
                   referenced_column.name                       AS referenced_column_name,
                   fk.delete_referential_action                 AS delete_referential_action,
                   fk.update_referential_action                 AS update_referential_action,
                   fkc.constraint_column_id                     AS ordinal_position
            FROM sys.foreign_key_columns AS fkc
                 INNER JOIN sys.tables AS parent_table
                         ON fkc.parent_object_id = parent_table.object_id
                 INNER JOIN sys.tables AS referenced_table
                         ON fkc.referenced_object_id = referenced_table.object_id
                 INNER JOIN sys.columns AS parent_column
                         ON fkc.parent_object_id = parent_column.object_id
                            AND fkc.parent_column_id = parent_column.column_id
                 INNER JOIN sys.columns AS referenced_column
                         ON fkc.referenced_object_id = referenced_column.object_id
                            AND fkc.referenced_column_id = referenced_column.column_id
                 INNER JOIN sys.foreign_keys AS fk
                         ON fkc.constraint_object_id = fk.object_id
                            AND fkc.parent_object_id = fk.parent_object_id
            WHERE SCHEMA_NAME(parent_table.schema_id) = @P1
              AND parent_table.name = @P2
            ORDER BY constraint_name, ordinal_position;
        "#};

        let rows = self
            .conn
            .query_raw(sql, &[schema.into(), table.into()])
            .await?;

        // Foreign keys covering multiple columns return multiple rows;
        // merge on the constraint name.
        let mut merged: BTreeMap<String, Constraint> = BTreeMap::new();

        for row in rows {
            trace!(?row, "got foreign key row");

            let constraint_name = row.get_expect_string("constraint_name");
            let column = row.get_expect_string("column_name");
            let referenced_column = row.get_expect_string("referenced_column_name");

            let entry = merged.entry(constraint_name.clone()).or_insert_with(|| Constraint {
                name: constraint_name,
                kind: ConstraintKind::ForeignKey,
                columns: Vec::new(),
                referenced_schema: row.get_string("referenced_schema_name"),
                referenced_table: Some(row.get_expect_string("referenced_table_name")),
                referenced_columns: Vec::new(),
                on_delete: Some(referential_action(&row, "delete_referential_action")),
                on_update: Some(referential_action(&row, "update_referential_action")),
                expression: None,
                description: None,
            });

            entry.columns.push(column);
            entry.referenced_columns.push(referenced_column);
        }

        entity.constraints.extend(merged.into_values());

        Ok(())
    }

    async fn get_check_constraints(
        &self,
        schema: &str,
        table: &str,
        entity: &mut EntityDefinition,
    ) -> DescriberResult<()> {
        let sql = indoc! {r#"
            SELECT cc.name        AS constraint_name,
                   cc.definition  AS definition,
                   col.name       AS column_name
            FROM sys.check_constraints cc
                 INNER JOIN sys.tables t ON cc.parent_object_id = t.object_id
                 LEFT JOIN sys.columns col
                        ON cc.parent_object_id = col.object_id
                           AND cc.parent_column_id = col.column_id
            WHERE SCHEMA_NAME(t.schema_id) = @P1 AND t.name = @P2
            ORDER BY constraint_name;
        "#};

        let rows = self
            .conn
            .query_raw(sql, &[schema.into(), table.into()])
            .await?;

        for row in rows {
            let expression = row.get_expect_string("definition");

            // Table-level checks carry no parent column; recover the
            // referenced columns from the expression text instead.
            let referenced_columns = match row.get_string("column_name") {
                Some(column) => vec![column],
                None => columns_in_expression(&expression, &entity.columns),
            };

            entity.check_constraints.push(CheckConstraint {
                name: row.get_expect_string("constraint_name"),
                expression,
                referenced_columns,
                description: None,
            });
        }

        Ok(())
    }

    async fn get_default_constraints(
        &self,
        schema: &str,
        table: &str,
        entity: &mut EntityDefinition,
    ) -> DescriberResult<()> {
        let sql = indoc! {r#"
            SELECT dc.name        AS constraint_name,
                   dc.definition  AS definition,
                   col.name       AS column_name
            FROM sys.default_constraints dc
                 INNER JOIN sys.tables t ON dc.parent_object_id = t.object_id
                 INNER JOIN sys.columns col
                         ON dc.parent_object_id = col.object_id
                            AND dc.parent_column_id = col.column_id
            WHERE SCHEMA_NAME(t.schema_id) = @P1 AND t.name = @P2
            ORDER BY constraint_name;
        "#};

        let rows = self
            .conn
            .query_raw(sql, &[schema.into(), table.into()])
            .await?;

        for row in rows {
            entity.constraints.push(Constraint::default(
                row.get_expect_string("constraint_name"),
                row.get_expect_string("column_name"),
                row.get_expect_string("definition"),
            ));
        }

        Ok(())
    }

    /// Extended `MS_Description` properties on the table, its columns and
    /// its constraints.
    async fn get_descriptions(
        &self,
        schema: &str,
        table: &str,
        entity: &mut EntityDefinition,
    ) -> DescriberResult<()> {
        let sql = indoc! {r#"
            SELECT CAST(ep.value AS nvarchar(max)) AS description,
                   col.name                        AS column_name,
                   obj.name                        AS object_name,
                   obj.type                        AS object_type
            FROM sys.extended_properties ep
                 INNER JOIN sys.objects obj ON ep.major_id = obj.object_id
                 LEFT JOIN sys.columns col
                        ON ep.major_id = col.object_id AND ep.minor_id = col.column_id
            WHERE ep.name = 'MS_Description'
              AND ep.class = 1
              AND (obj.object_id = OBJECT_ID(@P1) OR obj.parent_object_id = OBJECT_ID(@P1));
        "#};

        let qualified = format!("{schema}.{table}");
        let rows = self.conn.query_raw(sql, &[qualified.as_str().into()]).await?;

        for row in rows {
            let Some(description) = row.get_string("description") else {
                continue;
            };
            let object_type = row.get_string("object_type").unwrap_or_default();
            let object_name = row.get_string("object_name").unwrap_or_default();

            match row.get_string("column_name") {
                Some(column_name) => {
                    if let Some(column) = entity
                        .columns
                        .iter_mut()
                        .find(|c| c.name.eq_ignore_ascii_case(&column_name))
                    {
                        column.description = Some(description);
                    }
                }
                None if object_type.trim() == "U" => {
                    entity.description = Some(description);
                }
                None => {
                    if let Some(constraint) = entity
                        .constraints
                        .iter_mut()
                        .find(|c| c.name.eq_ignore_ascii_case(&object_name))
                    {
                        constraint.description = Some(description);
                    }
                }
            }
        }

        Ok(())
    }

    /// Number of rows in the table. Feeds the planner's safety guards.
    pub async fn row_count(&self, schema: &str, table: &str) -> DescriberResult<u64> {
        let sql = format!(
            "SELECT COUNT_BIG(*) AS row_count FROM {};",
            sql_ddl_table(schema, table)
        );

        let rows = self.conn.query_raw(&sql, &[]).await?;
        let count = rows
            .into_single()
            .and_then(|row| row.get_i64("row_count"))
            .unwrap_or(0);

        Ok(count.max(0) as u64)
    }

    /// Which of the given columns currently hold at least one NULL.
    pub async fn columns_with_nulls(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> DescriberResult<HashSet<String>> {
        let mut with_nulls = HashSet::new();

        for column in columns {
            let sql = format!(
                "SELECT COUNT_BIG(*) AS null_count FROM {} WHERE [{}] IS NULL;",
                sql_ddl_table(schema, table),
                column.replace(']', "]]")
            );

            let rows = self.conn.query_raw(&sql, &[]).await?;
            let nulls = rows
                .into_single()
                .and_then(|row| row.get_i64("null_count"))
                .unwrap_or(0);

            if nulls > 0 {
                with_nulls.insert(column.clone());
            }
        }

        Ok(with_nulls)
    }
}

fn sql_ddl_table(schema: &str, table: &str) -> String {
    format!(
        "[{}].[{}]",
        schema.replace(']', "]]"),
        table.replace(']', "]]")
    )
}

fn referential_action(row: &ResultRow, column: &str) -> ReferentialAction {
    match row.get_i64(column).unwrap_or(0) {
        1 => ReferentialAction::Cascade,
        2 => ReferentialAction::SetNull,
        3 => ReferentialAction::SetDefault,
        _ => ReferentialAction::NoAction,
    }
}

/// Reconstructs the canonical type string: `nvarchar(200)`, `nvarchar(max)`,
/// `decimal(18,2)`, plain name otherwise. `max_length` is in bytes; the
/// national character types count two bytes per character.
fn render_type_name(
    data_type: &str,
    max_length: Option<i64>,
    precision: Option<i64>,
    scale: Option<i64>,
) -> String {
    match data_type {
        "nchar" | "nvarchar" => match max_length {
            Some(-1) => format!("{data_type}(max)"),
            Some(bytes) => format!("{data_type}({})", bytes / 2),
            None => data_type.to_owned(),
        },
        "char" | "varchar" | "binary" | "varbinary" => match max_length {
            Some(-1) => format!("{data_type}(max)"),
            Some(bytes) => format!("{data_type}({bytes})"),
            None => data_type.to_owned(),
        },
        "decimal" | "numeric" => match (precision, scale) {
            (Some(p), Some(s)) => format!("{data_type}({p},{s})"),
            _ => data_type.to_owned(),
        },
        _ => data_type.to_owned(),
    }
}

/// The table columns actually mentioned in an expression, in column order.
fn columns_in_expression(expression: &str, columns: &[Column]) -> Vec<String> {
    let mentioned: HashSet<String> = BRACKETED_IDENT
        .captures_iter(expression)
        .map(|cap| cap[1].to_ascii_lowercase())
        .collect();

    columns
        .iter()
        .filter(|c| mentioned.contains(&c.name.to_ascii_lowercase()))
        .map(|c| c.name.clone())
        .collect()
}
