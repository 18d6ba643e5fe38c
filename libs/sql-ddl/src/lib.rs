//! T-SQL statement rendering.
//!
//! Typed statement builders rendered through `Display`. The planner decides
//! *what* to emit and in which order; this crate only knows how each
//! statement looks.

use std::fmt::{self, Display, Write as _};

/// A bracket-quoted identifier: `[Name]`. Closing brackets are doubled.
#[derive(Debug, Clone, Copy)]
pub struct Ident<'a>(pub &'a str);

impl Display for Ident<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for c in self.0.chars() {
            if c == ']' {
                f.write_str("]]")?;
            } else {
                f.write_char(c)?;
            }
        }
        f.write_str("]")
    }
}

/// A schema-qualified table name: `[dbo].[User]`.
#[derive(Debug, Clone, Copy)]
pub struct TableName<'a> {
    pub schema: &'a str,
    pub name: &'a str,
}

impl<'a> TableName<'a> {
    pub fn new(schema: &'a str, name: &'a str) -> Self {
        TableName { schema, name }
    }
}

impl Display for TableName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", Ident(self.schema), Ident(self.name))
    }
}

/// Escapes a string for a single-quoted T-SQL literal.
pub fn escape_string(s: &str) -> String {
    s.replace('\'', "''")
}

#[derive(Debug, Clone)]
pub struct ColumnDef<'a> {
    pub name: &'a str,
    pub sql_type: &'a str,
    pub nullable: bool,
    pub identity: bool,
    pub default: Option<DefaultClause<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub struct DefaultClause<'a> {
    pub constraint_name: Option<&'a str>,
    pub expression: &'a str,
}

impl Display for ColumnDef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Ident(self.name), self.sql_type)?;

        if self.identity {
            f.write_str(" IDENTITY(1,1)")?;
        }

        f.write_str(if self.nullable { " NULL" } else { " NOT NULL" })?;

        if let Some(default) = &self.default {
            if let Some(name) = default.constraint_name {
                write!(f, " CONSTRAINT {}", Ident(name))?;
            }
            write!(f, " DEFAULT {}", default.expression)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PrimaryKeyClause<'a> {
    pub constraint_name: &'a str,
    pub columns: &'a [String],
}

#[derive(Debug)]
pub struct CreateTable<'a> {
    pub table: TableName<'a>,
    pub columns: Vec<ColumnDef<'a>>,
    pub primary_key: Option<PrimaryKeyClause<'a>>,
}

impl Display for CreateTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CREATE TABLE {} (", self.table)?;

        let mut first = true;
        for column in &self.columns {
            if !first {
                f.write_str(",\n")?;
            }
            first = false;
            write!(f, "    {column}")?;
        }

        if let Some(pk) = &self.primary_key {
            write!(
                f,
                ",\n    CONSTRAINT {} PRIMARY KEY ({})",
                Ident(pk.constraint_name),
                join_idents(pk.columns)
            )?;
        }

        f.write_str("\n);")
    }
}

#[derive(Debug)]
pub struct AddColumn<'a> {
    pub table: TableName<'a>,
    pub column: ColumnDef<'a>,
}

impl Display for AddColumn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALTER TABLE {} ADD {};", self.table, self.column)
    }
}

#[derive(Debug)]
pub struct AlterColumn<'a> {
    pub table: TableName<'a>,
    pub name: &'a str,
    pub sql_type: &'a str,
    pub nullable: bool,
}

impl Display for AlterColumn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALTER TABLE {} ALTER COLUMN {} {} {};",
            self.table,
            Ident(self.name),
            self.sql_type,
            if self.nullable { "NULL" } else { "NOT NULL" }
        )
    }
}

#[derive(Debug)]
pub struct DropColumn<'a> {
    pub table: TableName<'a>,
    pub name: &'a str,
}

impl Display for DropColumn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALTER TABLE {} DROP COLUMN {};", self.table, Ident(self.name))
    }
}

#[derive(Debug)]
pub struct DropConstraint<'a> {
    pub table: TableName<'a>,
    pub name: &'a str,
}

impl Display for DropConstraint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALTER TABLE {} DROP CONSTRAINT {};",
            self.table,
            Ident(self.name)
        )
    }
}

#[derive(Debug)]
pub struct AddPrimaryKey<'a> {
    pub table: TableName<'a>,
    pub constraint_name: &'a str,
    pub columns: &'a [String],
}

impl Display for AddPrimaryKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({});",
            self.table,
            Ident(self.constraint_name),
            join_idents(self.columns)
        )
    }
}

#[derive(Debug)]
pub struct AddUnique<'a> {
    pub table: TableName<'a>,
    pub constraint_name: &'a str,
    pub columns: &'a [String],
}

impl Display for AddUnique<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({});",
            self.table,
            Ident(self.constraint_name),
            join_idents(self.columns)
        )
    }
}

#[derive(Debug)]
pub struct AddDefault<'a> {
    pub table: TableName<'a>,
    pub constraint_name: &'a str,
    pub column: &'a str,
    pub expression: &'a str,
}

impl Display for AddDefault<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALTER TABLE {} ADD CONSTRAINT {} DEFAULT {} FOR {};",
            self.table,
            Ident(self.constraint_name),
            self.expression,
            Ident(self.column)
        )
    }
}

#[derive(Debug)]
pub struct AddCheck<'a> {
    pub table: TableName<'a>,
    pub constraint_name: &'a str,
    pub expression: &'a str,
}

impl Display for AddCheck<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({});",
            self.table,
            Ident(self.constraint_name),
            self.expression
        )
    }
}

#[derive(Debug)]
pub struct AddForeignKey<'a> {
    pub table: TableName<'a>,
    pub constraint_name: &'a str,
    pub columns: &'a [String],
    pub referenced_table: TableName<'a>,
    pub referenced_columns: &'a [String],
    /// `CASCADE`, `NO ACTION`, `SET NULL`, `SET DEFAULT`.
    pub on_delete: &'a str,
    pub on_update: &'a str,
}

impl Display for AddForeignKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {};",
            self.table,
            Ident(self.constraint_name),
            join_idents(self.columns),
            self.referenced_table,
            join_idents(self.referenced_columns),
            self.on_delete,
            self.on_update
        )
    }
}

#[derive(Debug)]
pub struct CreateIndex<'a> {
    pub table: TableName<'a>,
    pub name: &'a str,
    pub columns: &'a [String],
    pub unique: bool,
    pub include_columns: &'a [String],
    pub filter: Option<&'a str>,
}

impl Display for CreateIndex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CREATE {}INDEX {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            Ident(self.name),
            self.table,
            join_idents(self.columns)
        )?;

        if !self.include_columns.is_empty() {
            write!(f, " INCLUDE ({})", join_idents(self.include_columns))?;
        }

        if let Some(filter) = self.filter {
            write!(f, " WHERE {filter}")?;
        }

        f.write_str(";")
    }
}

#[derive(Debug)]
pub struct DropIndex<'a> {
    pub table: TableName<'a>,
    pub name: &'a str,
}

impl Display for DropIndex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DROP INDEX {} ON {};", Ident(self.name), self.table)
    }
}

/// `EXEC sp_rename` for a column.
#[derive(Debug)]
pub struct RenameColumn<'a> {
    pub table: TableName<'a>,
    pub from: &'a str,
    pub to: &'a str,
}

impl Display for RenameColumn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EXEC sp_rename '{}.{}.{}', '{}', 'COLUMN';",
            escape_string(self.table.schema),
            escape_string(self.table.name),
            escape_string(self.from),
            escape_string(self.to)
        )
    }
}

/// Where an extended-property description lands.
#[derive(Debug, Clone, Copy)]
pub enum DescriptionTarget<'a> {
    Table,
    Column(&'a str),
    Constraint(&'a str),
}

/// Idempotent upsert of an `MS_Description` extended property: add when
/// absent, update otherwise.
#[derive(Debug)]
pub struct DescriptionUpsert<'a> {
    pub table: TableName<'a>,
    pub target: DescriptionTarget<'a>,
    pub description: &'a str,
}

impl Display for DescriptionUpsert<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (level2_probe, level2_args) = match self.target {
            DescriptionTarget::Table => (String::from("NULL, NULL"), String::new()),
            DescriptionTarget::Column(column) => (
                format!("'COLUMN', '{}'", escape_string(column)),
                format!(", @level2type = 'COLUMN', @level2name = '{}'", escape_string(column)),
            ),
            DescriptionTarget::Constraint(constraint) => (
                format!("'CONSTRAINT', '{}'", escape_string(constraint)),
                format!(
                    ", @level2type = 'CONSTRAINT', @level2name = '{}'",
                    escape_string(constraint)
                ),
            ),
        };

        let schema = escape_string(self.table.schema);
        let table = escape_string(self.table.name);
        let description = escape_string(self.description);

        write!(
            f,
            "IF NOT EXISTS (SELECT 1 FROM fn_listextendedproperty('MS_Description', 'SCHEMA', '{schema}', 'TABLE', '{table}', {level2_probe}))\n\
                 EXEC sp_addextendedproperty @name = 'MS_Description', @value = '{description}', @level0type = 'SCHEMA', @level0name = '{schema}', @level1type = 'TABLE', @level1name = '{table}'{level2_args};\n\
             ELSE\n\
                 EXEC sp_updateextendedproperty @name = 'MS_Description', @value = '{description}', @level0type = 'SCHEMA', @level0name = '{schema}', @level1type = 'TABLE', @level1name = '{table}'{level2_args};"
        )
    }
}

/// Idempotent schema creation.
#[derive(Debug)]
pub struct EnsureSchema<'a> {
    pub schema: &'a str,
}

impl Display for EnsureSchema<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IF NOT EXISTS (SELECT 1 FROM sys.schemas WHERE name = '{0}')\n    EXEC('CREATE SCHEMA {1}');",
            escape_string(self.schema),
            Ident(self.schema)
        )
    }
}

fn join_idents(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| Ident(c).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn idents_double_closing_brackets() {
        assert_eq!(Ident("we]ird").to_string(), "[we]]ird]");
    }

    #[test]
    fn create_table_renders_inline_primary_key() {
        let columns = vec![
            ColumnDef {
                name: "Id",
                sql_type: "uniqueidentifier",
                nullable: false,
                identity: false,
                default: None,
            },
            ColumnDef {
                name: "Name",
                sql_type: "nvarchar(100)",
                nullable: false,
                identity: false,
                default: None,
            },
        ];
        let pk_columns = vec!["Id".to_owned()];

        let create = CreateTable {
            table: TableName::new("dbo", "User"),
            columns,
            primary_key: Some(PrimaryKeyClause {
                constraint_name: "PK_User",
                columns: &pk_columns,
            }),
        };

        assert_eq!(
            create.to_string(),
            indoc! {r#"
                CREATE TABLE [dbo].[User] (
                    [Id] uniqueidentifier NOT NULL,
                    [Name] nvarchar(100) NOT NULL,
                    CONSTRAINT [PK_User] PRIMARY KEY ([Id])
                );"#}
        );
    }

    #[test]
    fn identity_and_default_render_in_declaration_order() {
        let column = ColumnDef {
            name: "Count",
            sql_type: "int",
            nullable: false,
            identity: true,
            default: Some(DefaultClause {
                constraint_name: Some("DF_T_Count"),
                expression: "((0))",
            }),
        };

        assert_eq!(
            column.to_string(),
            "[Count] int IDENTITY(1,1) NOT NULL CONSTRAINT [DF_T_Count] DEFAULT ((0))"
        );
    }

    #[test]
    fn create_index_with_includes_and_filter() {
        let columns = vec!["Email".to_owned()];
        let includes = vec!["Name".to_owned()];

        let index = CreateIndex {
            table: TableName::new("dbo", "User"),
            name: "IX_User_Email",
            columns: &columns,
            unique: true,
            include_columns: &includes,
            filter: Some("[Email] IS NOT NULL"),
        };

        assert_eq!(
            index.to_string(),
            "CREATE UNIQUE INDEX [IX_User_Email] ON [dbo].[User] ([Email]) INCLUDE ([Name]) WHERE [Email] IS NOT NULL;"
        );
    }

    #[test]
    fn foreign_key_renders_actions() {
        let columns = vec!["TeamId".to_owned()];
        let referenced = vec!["Id".to_owned()];

        let fk = AddForeignKey {
            table: TableName::new("dbo", "User"),
            constraint_name: "FK_User_TeamId",
            columns: &columns,
            referenced_table: TableName::new("dbo", "Team"),
            referenced_columns: &referenced,
            on_delete: "CASCADE",
            on_update: "NO ACTION",
        };

        assert_eq!(
            fk.to_string(),
            "ALTER TABLE [dbo].[User] ADD CONSTRAINT [FK_User_TeamId] FOREIGN KEY ([TeamId]) REFERENCES [dbo].[Team] ([Id]) ON DELETE CASCADE ON UPDATE NO ACTION;"
        );
    }

    #[test]
    fn rename_column_goes_through_sp_rename() {
        let rename = RenameColumn {
            table: TableName::new("dbo", "Order"),
            from: "Id_New",
            to: "Id",
        };

        assert_eq!(
            rename.to_string(),
            "EXEC sp_rename 'dbo.Order.Id_New', 'Id', 'COLUMN';"
        );
    }

    #[test]
    fn description_upsert_is_conditional() {
        let upsert = DescriptionUpsert {
            table: TableName::new("dbo", "User"),
            target: DescriptionTarget::Column("Name"),
            description: "Display name",
        };

        let rendered = upsert.to_string();
        assert!(rendered.contains("IF NOT EXISTS"));
        assert!(rendered.contains("sp_addextendedproperty"));
        assert!(rendered.contains("sp_updateextendedproperty"));
        assert!(rendered.contains("'COLUMN', 'Name'"));
    }
}
