//! The in-memory representation of a table's schema.
//!
//! Two producers build these values: the model builder (from entity
//! descriptors) and the schema describer (from the live catalog). The differ
//! and planner only ever compare and consume them, so the comparison
//! semantics live here too ([`equivalence`], [`normalize`]).

mod equivalence;
mod normalize;
mod tenant;

pub use equivalence::{
    checks_equivalent, columns_equivalent, constraints_equivalent, indexes_equivalent,
};
pub use normalize::normalize_expression;
pub use tenant::Tenant;

use serde::{Deserialize, Serialize};

/// Case-insensitive name comparison, the identifier semantics of the target
/// database.
pub fn names_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// A single table: columns, constraints, indexes and the logical
/// relationships that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Option<PrimaryKey>,
    pub constraints: Vec<Constraint>,
    pub check_constraints: Vec<CheckConstraint>,
    pub indexes: Vec<Index>,
    /// Denormalized view of FK-typed constraints. Either form may be
    /// populated by a producer; [`EntityDefinition::merge_foreign_keys`]
    /// folds this list into `constraints` before planning.
    pub foreign_keys: Vec<ForeignKey>,
    pub relationships: Vec<Relationship>,
    /// Name of the descriptor type this entity was derived from. Only
    /// meaningful on desired models.
    pub source_type: Option<String>,
    /// Auto-generated many-to-many join table.
    pub is_shadow: bool,
    pub description: Option<String>,
}

fn default_schema() -> String {
    "dbo".to_owned()
}

impl EntityDefinition {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        EntityDefinition {
            schema: schema.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// An auto-generated join table for a many-to-many relationship.
    pub fn shadow(schema: impl Into<String>, name: impl Into<String>) -> Self {
        EntityDefinition {
            is_shadow: true,
            ..EntityDefinition::new(schema, name)
        }
    }

    /// `true` when the entity carries no objects at all, the shape the
    /// describer returns for a missing table.
    pub fn is_empty_shape(&self) -> bool {
        self.columns.is_empty()
            && self.primary_key.is_none()
            && self.constraints.is_empty()
            && self.check_constraints.is_empty()
            && self.indexes.is_empty()
            && self.foreign_keys.is_empty()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| names_match(&c.name, name))
    }

    pub fn find_constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| names_match(&c.name, name))
    }

    pub fn find_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| names_match(&i.name, name))
    }

    pub fn find_check(&self, name: &str) -> Option<&CheckConstraint> {
        self.check_constraints.iter().find(|c| names_match(&c.name, name))
    }

    /// Columns that take part in DDL. Navigation columns are logical only.
    pub fn persisted_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_navigation)
    }

    /// Mirrors the `primary_key` field into the unified constraint list,
    /// the canonical form the introspector produces. Idempotent.
    pub fn merge_primary_key(&mut self) {
        let Some(pk) = &self.primary_key else {
            return;
        };

        let already_present = self
            .constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::PrimaryKey);

        if !already_present {
            self.constraints
                .push(Constraint::primary_key(pk.name.clone(), pk.columns.clone()));
        }
    }

    /// Folds the denormalized `foreign_keys` list into the unified
    /// constraint list. An FK present in both forms is kept once; neither
    /// form is lost. Idempotent.
    pub fn merge_foreign_keys(&mut self) {
        let foreign_keys = std::mem::take(&mut self.foreign_keys);

        for fk in foreign_keys {
            let already_present = self.constraints.iter().any(|c| {
                c.kind == ConstraintKind::ForeignKey
                    && same_column_multiset(&c.columns, &fk.columns)
                    && c.referenced_table
                        .as_deref()
                        .is_some_and(|t| names_match(t, &fk.referenced_table))
                    && same_column_multiset(&c.referenced_columns, &fk.referenced_columns)
            });

            if !already_present {
                self.constraints.push(Constraint::from_foreign_key(&fk));
            }
        }
    }
}

pub(crate) fn same_column_multiset(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut a: Vec<String> = a.iter().map(|s| s.to_ascii_lowercase()).collect();
    let mut b: Vec<String> = b.iter().map(|s| s.to_ascii_lowercase()).collect();
    a.sort();
    b.sort();

    a == b
}

/// Declared length of a text column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextLength {
    Max,
    Chars(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// Canonical SQL type string, including length or precision:
    /// `nvarchar(200)`, `decimal(18,2)`, `int`.
    pub type_name: String,
    pub is_nullable: bool,
    pub is_identity: bool,
    pub default_value: Option<String>,
    pub description: Option<String>,
    /// Logical column that must never reach DDL.
    pub is_navigation: bool,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl Column {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// The type text before the opening parenthesis: `nvarchar(max)` →
    /// `nvarchar`.
    pub fn base_type(&self) -> &str {
        match self.type_name.find('(') {
            Some(idx) => self.type_name[..idx].trim(),
            None => self.type_name.trim(),
        }
    }

    pub fn is_text_type(&self) -> bool {
        matches!(
            self.base_type().to_ascii_lowercase().as_str(),
            "char" | "nchar" | "varchar" | "nvarchar" | "text" | "ntext"
        )
    }

    /// Declared length for sized types. `max` is distinct from any finite
    /// size.
    pub fn declared_length(&self) -> Option<TextLength> {
        let open = self.type_name.find('(')?;
        let close = self.type_name.rfind(')')?;
        let inner = self.type_name[open + 1..close].trim();

        if inner.eq_ignore_ascii_case("max") {
            return Some(TextLength::Max);
        }

        inner.parse::<u32>().ok().map(TextLength::Chars)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryKey {
    pub name: String,
    pub columns: Vec<String>,
    pub is_auto_generated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    #[serde(rename = "PRIMARY KEY")]
    PrimaryKey,
    #[serde(rename = "FOREIGN KEY")]
    ForeignKey,
    #[serde(rename = "UNIQUE")]
    Unique,
    #[serde(rename = "DEFAULT")]
    Default,
    #[serde(rename = "CHECK")]
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Unified constraint form. The `kind` decides which optional fields are
/// meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub referenced_schema: Option<String>,
    pub referenced_table: Option<String>,
    pub referenced_columns: Vec<String>,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
    pub expression: Option<String>,
    pub description: Option<String>,
}

impl Constraint {
    fn bare(name: impl Into<String>, kind: ConstraintKind, columns: Vec<String>) -> Self {
        Constraint {
            name: name.into(),
            kind,
            columns,
            referenced_schema: None,
            referenced_table: None,
            referenced_columns: Vec::new(),
            on_delete: None,
            on_update: None,
            expression: None,
            description: None,
        }
    }

    pub fn primary_key(name: impl Into<String>, columns: Vec<String>) -> Self {
        Constraint::bare(name, ConstraintKind::PrimaryKey, columns)
    }

    pub fn unique(name: impl Into<String>, columns: Vec<String>) -> Self {
        Constraint::bare(name, ConstraintKind::Unique, columns)
    }

    pub fn default(name: impl Into<String>, column: impl Into<String>, expression: impl Into<String>) -> Self {
        Constraint {
            expression: Some(expression.into()),
            ..Constraint::bare(name, ConstraintKind::Default, vec![column.into()])
        }
    }

    pub fn check(name: impl Into<String>, expression: impl Into<String>, columns: Vec<String>) -> Self {
        Constraint {
            expression: Some(expression.into()),
            ..Constraint::bare(name, ConstraintKind::Check, columns)
        }
    }

    pub fn from_foreign_key(fk: &ForeignKey) -> Self {
        Constraint {
            referenced_schema: fk.referenced_schema.clone(),
            referenced_table: Some(fk.referenced_table.clone()),
            referenced_columns: fk.referenced_columns.clone(),
            on_delete: Some(fk.on_delete),
            on_update: Some(fk.on_update),
            ..Constraint::bare(fk.name.clone(), ConstraintKind::ForeignKey, fk.columns.clone())
        }
    }
}

/// Denormalized foreign key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

/// A structured CHECK constraint: the expression plus the columns it
/// references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConstraint {
    pub name: String,
    pub expression: String,
    pub referenced_columns: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub filter_expression: Option<String>,
    pub include_columns: Vec<String>,
    pub description: Option<String>,
}

impl Index {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Index {
            name: name.into(),
            columns,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// A logical relationship between two entities. Never emitted as DDL by
/// itself; the columns and constraints it implies are materialized on the
/// entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub source_entity: String,
    pub target_entity: String,
    pub source_navigation: Option<String>,
    pub target_navigation: Option<String>,
    pub kind: RelationshipKind,
    /// Only for ManyToMany: the shadow join entity.
    pub join_entity_name: Option<String>,
    /// Only for OneToOne / OneToMany: the FK column on the dependent side.
    pub source_to_target_column: Option<String>,
}

/// Canonical JSON snapshot of a desired model, stored in the migration
/// history table. Field order is fixed by the struct definitions, so the
/// snapshot is deterministic for a given model.
pub fn snapshot_json(entities: &[EntityDefinition]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(entities)
}

pub fn entities_from_snapshot(json: &str) -> serde_json::Result<Vec<EntityDefinition>> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn user_entity() -> EntityDefinition {
        let mut entity = EntityDefinition::new("dbo", "User");
        entity.columns.push(Column {
            is_identity: false,
            ..Column::new("Id", "uniqueidentifier")
        });
        entity.columns.push(Column {
            is_nullable: false,
            ..Column::new("Name", "nvarchar(100)")
        });
        entity.primary_key = Some(PrimaryKey {
            name: "PK_User".into(),
            columns: vec!["Id".into()],
            is_auto_generated: true,
        });
        entity
    }

    #[test]
    fn base_type_strips_length() {
        let column = Column::new("Name", "nvarchar(100)");
        assert_eq!(column.base_type(), "nvarchar");
        assert_eq!(column.declared_length(), Some(TextLength::Chars(100)));

        let column = Column::new("Bio", "nvarchar(max)");
        assert_eq!(column.declared_length(), Some(TextLength::Max));

        let column = Column::new("Id", "int");
        assert_eq!(column.base_type(), "int");
        assert_eq!(column.declared_length(), None);
    }

    #[test]
    fn merge_foreign_keys_folds_the_denormalized_form() {
        let mut entity = user_entity();
        entity.foreign_keys.push(ForeignKey {
            name: "FK_User_TeamId".into(),
            columns: vec!["TeamId".into()],
            referenced_schema: None,
            referenced_table: "Team".into(),
            referenced_columns: vec!["Id".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        });

        entity.merge_foreign_keys();

        assert!(entity.foreign_keys.is_empty());
        assert_eq!(entity.constraints.len(), 1);
        assert_eq!(entity.constraints[0].kind, ConstraintKind::ForeignKey);
        assert_eq!(entity.constraints[0].referenced_table.as_deref(), Some("Team"));
    }

    #[test]
    fn merge_foreign_keys_keeps_one_copy_when_both_forms_exist() {
        let mut entity = user_entity();
        let fk = ForeignKey {
            name: "FK_User_TeamId".into(),
            columns: vec!["TeamId".into()],
            referenced_schema: None,
            referenced_table: "Team".into(),
            referenced_columns: vec!["Id".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        };
        entity.constraints.push(Constraint::from_foreign_key(&fk));
        entity.foreign_keys.push(ForeignKey {
            // The duplicate detection is structural, not by name.
            name: "FK_User_Team".into(),
            ..fk
        });

        entity.merge_foreign_keys();

        assert_eq!(entity.constraints.len(), 1);
    }

    #[test]
    fn snapshot_round_trips() {
        let entities = vec![user_entity()];
        let json = snapshot_json(&entities).unwrap();
        let back = entities_from_snapshot(&json).unwrap();
        assert_eq!(entities, back);
    }

    #[test]
    fn snapshot_is_deterministic() {
        let entities = vec![user_entity()];
        assert_eq!(
            snapshot_json(&entities).unwrap(),
            snapshot_json(&entities).unwrap()
        );
    }
}
