//! Compares two entity definitions into a typed change list.

use entity_model::{
    checks_equivalent, columns_equivalent, constraints_equivalent, indexes_equivalent,
    ConstraintKind, EntityDefinition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Added,
    Modified,
    Dropped,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeAction::Added => "Added",
            ChangeAction::Modified => "Modified",
            ChangeAction::Dropped => "Dropped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Column,
    Constraint,
    Check,
    Default,
    Index,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectKind::Column => "Column",
            ObjectKind::Constraint => "Constraint",
            ObjectKind::Check => "Check",
            ObjectKind::Default => "Default",
            ObjectKind::Index => "Index",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImpactItem {
    pub object_kind: ObjectKind,
    pub action: ChangeAction,
    pub table: String,
    pub name: String,
    pub original_type: Option<String>,
    pub new_type: Option<String>,
    pub severity: Severity,
    pub reason: String,
}

/// Diffs `old` against `new`. Objects are keyed by case-insensitive name;
/// present-in-both but non-equivalent objects come back `Modified`.
///
/// Both sides have their denormalized FK lists merged first so neither
/// form is lost.
pub fn diff_entities(old: &EntityDefinition, new: &EntityDefinition) -> Vec<ImpactItem> {
    let mut old = old.clone();
    let mut new = new.clone();
    old.merge_foreign_keys();
    new.merge_foreign_keys();
    old.merge_primary_key();
    new.merge_primary_key();

    let table = new.name.clone();
    let mut impacts = Vec::new();

    diff_columns(&old, &new, &table, &mut impacts);
    diff_constraints(&old, &new, &table, &mut impacts);
    diff_checks(&old, &new, &table, &mut impacts);
    diff_indexes(&old, &new, &table, &mut impacts);

    impacts
}

fn diff_columns(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: &str,
    impacts: &mut Vec<ImpactItem>,
) {
    for column in new.persisted_columns() {
        match old.find_column(&column.name) {
            None => impacts.push(ImpactItem {
                object_kind: ObjectKind::Column,
                action: ChangeAction::Added,
                table: table.to_owned(),
                name: column.name.clone(),
                original_type: None,
                new_type: Some(column.type_name.clone()),
                severity: Severity::Low,
                reason: format!("column `{}` is new", column.name),
            }),
            Some(previous) if !columns_equivalent(previous, column) => {
                let tightened = previous.is_nullable && !column.is_nullable;
                let severity = if tightened {
                    Severity::High
                } else {
                    Severity::Medium
                };
                let reason = if tightened {
                    format!("column `{}` becomes NOT NULL", column.name)
                } else {
                    format!(
                        "column `{}` changes from `{}` to `{}`",
                        column.name, previous.type_name, column.type_name
                    )
                };

                impacts.push(ImpactItem {
                    object_kind: ObjectKind::Column,
                    action: ChangeAction::Modified,
                    table: table.to_owned(),
                    name: column.name.clone(),
                    original_type: Some(previous.type_name.clone()),
                    new_type: Some(column.type_name.clone()),
                    severity,
                    reason,
                });
            }
            Some(_) => {}
        }
    }

    for column in old.persisted_columns() {
        if new.find_column(&column.name).is_none() {
            impacts.push(ImpactItem {
                object_kind: ObjectKind::Column,
                action: ChangeAction::Dropped,
                table: table.to_owned(),
                name: column.name.clone(),
                original_type: Some(column.type_name.clone()),
                new_type: None,
                severity: Severity::High,
                reason: format!("column `{}` no longer exists in the model", column.name),
            });
        }
    }
}

fn constraint_object_kind(kind: ConstraintKind) -> ObjectKind {
    match kind {
        ConstraintKind::Default => ObjectKind::Default,
        ConstraintKind::Check => ObjectKind::Check,
        _ => ObjectKind::Constraint,
    }
}

/// Whether a named default constraint is expressed on the other side as a
/// plain column default. The two producers disagree on where defaults
/// live; an equivalent pair is not a change.
fn default_expressed_on_column(
    constraint: &entity_model::Constraint,
    entity: &EntityDefinition,
) -> bool {
    if constraint.kind != ConstraintKind::Default {
        return false;
    }

    let column_default = constraint
        .columns
        .first()
        .and_then(|c| entity.find_column(c))
        .and_then(|col| col.default_value.as_deref());

    match (column_default, constraint.expression.as_deref()) {
        (Some(a), Some(b)) => {
            entity_model::normalize_expression(a) == entity_model::normalize_expression(b)
        }
        _ => false,
    }
}

fn diff_constraints(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: &str,
    impacts: &mut Vec<ImpactItem>,
) {
    for constraint in &new.constraints {
        match old.find_constraint(&constraint.name) {
            None if default_expressed_on_column(constraint, old) => {}
            None => {
                let severity = if constraint.kind == ConstraintKind::ForeignKey {
                    Severity::Medium
                } else {
                    Severity::Low
                };

                impacts.push(ImpactItem {
                    object_kind: constraint_object_kind(constraint.kind),
                    action: ChangeAction::Added,
                    table: table.to_owned(),
                    name: constraint.name.clone(),
                    original_type: None,
                    new_type: constraint.expression.clone(),
                    severity,
                    reason: format!("constraint `{}` is new", constraint.name),
                });
            }
            Some(previous) if !constraints_equivalent(previous, constraint) => {
                impacts.push(ImpactItem {
                    object_kind: constraint_object_kind(constraint.kind),
                    action: ChangeAction::Modified,
                    table: table.to_owned(),
                    name: constraint.name.clone(),
                    original_type: previous.expression.clone(),
                    new_type: constraint.expression.clone(),
                    severity: Severity::Medium,
                    reason: format!("constraint `{}` changed definition", constraint.name),
                });
            }
            Some(_) => {}
        }
    }

    for constraint in &old.constraints {
        if new.find_constraint(&constraint.name).is_none() {
            if default_expressed_on_column(constraint, new) {
                continue;
            }

            let severity = if constraint.kind == ConstraintKind::ForeignKey {
                Severity::High
            } else {
                Severity::Medium
            };

            impacts.push(ImpactItem {
                object_kind: constraint_object_kind(constraint.kind),
                action: ChangeAction::Dropped,
                table: table.to_owned(),
                name: constraint.name.clone(),
                original_type: constraint.expression.clone(),
                new_type: None,
                severity,
                reason: format!("constraint `{}` no longer exists in the model", constraint.name),
            });
        }
    }
}

fn diff_checks(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: &str,
    impacts: &mut Vec<ImpactItem>,
) {
    for check in &new.check_constraints {
        match old.find_check(&check.name) {
            None => impacts.push(ImpactItem {
                object_kind: ObjectKind::Check,
                action: ChangeAction::Added,
                table: table.to_owned(),
                name: check.name.clone(),
                original_type: None,
                new_type: Some(check.expression.clone()),
                severity: Severity::Low,
                reason: format!("check constraint `{}` is new", check.name),
            }),
            Some(previous) if !checks_equivalent(previous, check) => impacts.push(ImpactItem {
                object_kind: ObjectKind::Check,
                action: ChangeAction::Modified,
                table: table.to_owned(),
                name: check.name.clone(),
                original_type: Some(previous.expression.clone()),
                new_type: Some(check.expression.clone()),
                severity: Severity::Medium,
                reason: format!("check constraint `{}` changed expression", check.name),
            }),
            Some(_) => {}
        }
    }

    for check in &old.check_constraints {
        if new.find_check(&check.name).is_none() {
            impacts.push(ImpactItem {
                object_kind: ObjectKind::Check,
                action: ChangeAction::Dropped,
                table: table.to_owned(),
                name: check.name.clone(),
                original_type: Some(check.expression.clone()),
                new_type: None,
                severity: Severity::Medium,
                reason: format!("check constraint `{}` no longer exists in the model", check.name),
            });
        }
    }
}

fn index_signature_text(index: &entity_model::Index) -> String {
    format!(
        "({}) unique={} filter={:?} include=({})",
        index.columns.join(","),
        index.is_unique,
        index.filter_expression,
        index.include_columns.join(",")
    )
}

fn diff_indexes(
    old: &EntityDefinition,
    new: &EntityDefinition,
    table: &str,
    impacts: &mut Vec<ImpactItem>,
) {
    for index in &new.indexes {
        match old.find_index(&index.name) {
            None => impacts.push(ImpactItem {
                object_kind: ObjectKind::Index,
                action: ChangeAction::Added,
                table: table.to_owned(),
                name: index.name.clone(),
                original_type: None,
                new_type: Some(index_signature_text(index)),
                severity: Severity::Low,
                reason: format!("index `{}` is new", index.name),
            }),
            Some(previous) if !indexes_equivalent(previous, index) => impacts.push(ImpactItem {
                object_kind: ObjectKind::Index,
                action: ChangeAction::Modified,
                table: table.to_owned(),
                name: index.name.clone(),
                original_type: Some(index_signature_text(previous)),
                new_type: Some(index_signature_text(index)),
                severity: Severity::Medium,
                reason: format!("index `{}` changed shape", index.name),
            }),
            Some(_) => {}
        }
    }

    for index in &old.indexes {
        if new.find_index(&index.name).is_none() {
            impacts.push(ImpactItem {
                object_kind: ObjectKind::Index,
                action: ChangeAction::Dropped,
                table: table.to_owned(),
                name: index.name.clone(),
                original_type: Some(index_signature_text(index)),
                new_type: None,
                severity: Severity::Medium,
                reason: format!("index `{}` no longer exists in the model", index.name),
            });
        }
    }
}

/// `true` when every impact is an addition, the precondition for
/// auto-merge.
pub fn all_additive(impacts: &[ImpactItem]) -> bool {
    impacts.iter().all(|i| i.action == ChangeAction::Added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_model::{CheckConstraint, Column, Constraint, EntityDefinition, Index};
    use pretty_assertions::assert_eq;

    fn base_entity() -> EntityDefinition {
        let mut entity = EntityDefinition::new("dbo", "User");
        entity.columns.push(Column::new("Id", "uniqueidentifier"));
        entity.columns.push(Column {
            is_nullable: true,
            ..Column::new("Email", "nvarchar(200)")
        });
        entity
    }

    #[test]
    fn identical_entities_produce_no_impacts() {
        let entity = base_entity();
        assert_eq!(diff_entities(&entity, &entity), vec![]);
    }

    #[test]
    fn added_column_is_low_severity() {
        let old = base_entity();
        let mut new = base_entity();
        new.columns.push(Column::new("CreatedAt", "datetime2"));

        let impacts = diff_entities(&old, &new);

        assert_eq!(impacts.len(), 1);
        assert_eq!(impacts[0].action, ChangeAction::Added);
        assert_eq!(impacts[0].severity, Severity::Low);
        assert_eq!(impacts[0].object_kind, ObjectKind::Column);
    }

    #[test]
    fn dropped_column_is_high_severity() {
        let old = base_entity();
        let mut new = base_entity();
        new.columns.pop();

        let impacts = diff_entities(&old, &new);

        assert_eq!(impacts.len(), 1);
        assert_eq!(impacts[0].action, ChangeAction::Dropped);
        assert_eq!(impacts[0].severity, Severity::High);
    }

    #[test]
    fn not_null_tightening_is_high_severity() {
        let old = base_entity();
        let mut new = base_entity();
        new.columns[1].is_nullable = false;

        let impacts = diff_entities(&old, &new);

        assert_eq!(impacts[0].action, ChangeAction::Modified);
        assert_eq!(impacts[0].severity, Severity::High);
        assert!(impacts[0].reason.contains("NOT NULL"));
    }

    #[test]
    fn type_change_is_medium_severity() {
        let old = base_entity();
        let mut new = base_entity();
        new.columns[1].type_name = "nvarchar(400)".into();

        let impacts = diff_entities(&old, &new);

        assert_eq!(impacts[0].severity, Severity::Medium);
        assert_eq!(impacts[0].original_type.as_deref(), Some("nvarchar(200)"));
        assert_eq!(impacts[0].new_type.as_deref(), Some("nvarchar(400)"));
    }

    #[test]
    fn equivalent_checks_with_different_decoration_do_not_diff() {
        let mut old = base_entity();
        old.check_constraints.push(CheckConstraint {
            name: "CK_User_Age".into(),
            expression: "([Age]>=(0) AND [Age]<=(150))".into(),
            referenced_columns: vec!["Age".into()],
            description: None,
        });
        let mut new = base_entity();
        new.check_constraints.push(CheckConstraint {
            name: "CK_User_Age".into(),
            expression: "[Age] BETWEEN 0 AND 150".into(),
            referenced_columns: vec!["Age".into()],
            description: None,
        });

        assert_eq!(diff_entities(&old, &new), vec![]);
    }

    #[test]
    fn dropped_fk_is_high_added_fk_is_medium() {
        use entity_model::{ForeignKey, ReferentialAction};

        let fk = Constraint::from_foreign_key(&ForeignKey {
            name: "FK_User_TeamId".into(),
            columns: vec!["TeamId".into()],
            referenced_schema: None,
            referenced_table: "Team".into(),
            referenced_columns: vec!["Id".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        });

        let mut with_fk = base_entity();
        with_fk.constraints.push(fk);

        let added = diff_entities(&base_entity(), &with_fk);
        assert_eq!(added[0].severity, Severity::Medium);

        let dropped = diff_entities(&with_fk, &base_entity());
        assert_eq!(dropped[0].severity, Severity::High);
    }

    #[test]
    fn fk_in_denormalized_form_matches_constraint_form() {
        use entity_model::{ForeignKey, ReferentialAction};

        let mut old = base_entity();
        old.constraints.push(Constraint::from_foreign_key(&ForeignKey {
            name: "FK_User_TeamId".into(),
            columns: vec!["TeamId".into()],
            referenced_schema: None,
            referenced_table: "Team".into(),
            referenced_columns: vec!["Id".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        }));

        let mut new = base_entity();
        new.foreign_keys.push(ForeignKey {
            name: "FK_User_TeamId".into(),
            columns: vec!["TeamId".into()],
            referenced_schema: None,
            referenced_table: "Team".into(),
            referenced_columns: vec!["Id".into()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        });

        assert_eq!(diff_entities(&old, &new), vec![]);
    }

    #[test]
    fn modified_index_is_medium() {
        let mut old = base_entity();
        old.indexes.push(Index::new("IX_User_Email", vec!["Email".into()]));
        let mut new = base_entity();
        new.indexes.push(Index {
            is_unique: true,
            ..Index::new("IX_User_Email", vec!["Email".into()])
        });

        let impacts = diff_entities(&old, &new);
        assert_eq!(impacts[0].action, ChangeAction::Modified);
        assert_eq!(impacts[0].severity, Severity::Medium);
    }
}
