//! Relationship inference over the whole descriptor set.
//!
//! Collection navigations become ManyToMany (with an auto-generated shadow
//! join entity) or OneToMany; mutual single-reference navigations become
//! OneToOne. Everything the relationships imply (columns, foreign keys,
//! unique constraints) is materialized directly on the entities here, so
//! the planner never looks at `Relationship` values.

use crate::descriptor::EntityDescriptor;
use crate::foreign_keys::push_deduplicated;
use entity_model::{
    Column, EntityDefinition, ForeignKey, PrimaryKey, Constraint, ConstraintKind,
    ReferentialAction, Relationship, RelationshipKind, names_match,
};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::debug;

pub(crate) fn infer_relationships(
    descriptors: &IndexMap<String, EntityDescriptor>,
    entities: &mut IndexMap<String, EntityDefinition>,
    default_schema: &str,
) -> Vec<EntityDefinition> {
    let shadows = infer_many_to_many(descriptors, entities, default_schema);
    infer_one_to_many(descriptors, entities);
    infer_one_to_one(descriptors, entities);
    shadows
}

/// Reciprocal collection navigations: emit a ManyToMany relationship and a
/// shadow join entity. The lexicographically smaller type is the canonical
/// owner, which keeps the join table name and column order deterministic.
fn infer_many_to_many(
    descriptors: &IndexMap<String, EntityDescriptor>,
    entities: &mut IndexMap<String, EntityDefinition>,
    default_schema: &str,
) -> Vec<EntityDefinition> {
    let mut shadows = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for (type_name, descriptor) in descriptors {
        for member in descriptor.collection_members() {
            let target = member.navigation_target().unwrap();

            if target == type_name {
                continue;
            }

            let Some(target_descriptor) = descriptors.get(target) else {
                continue;
            };

            let reciprocal = target_descriptor
                .collection_members()
                .any(|m| m.navigation_target() == Some(type_name.as_str()));

            if !reciprocal {
                continue;
            }

            let (first, second) = if type_name.as_str() < target {
                (type_name.clone(), target.to_owned())
            } else {
                (target.to_owned(), type_name.clone())
            };

            if !seen.insert((first.clone(), second.clone())) {
                continue;
            }

            let first_descriptor = &descriptors[&first];
            let second_descriptor = &descriptors[&second];
            let first_table = first_descriptor.effective_table_name().to_owned();
            let second_table = second_descriptor.effective_table_name().to_owned();
            let join_name = format!("{first_table}{second_table}");

            debug!(join = %join_name, "generating shadow join entity");

            shadows.push(build_shadow_entity(
                default_schema,
                &join_name,
                (&first_table, &pk_column(entities, &first)),
                (&second_table, &pk_column(entities, &second)),
            ));

            let source_navigation = first_descriptor
                .collection_members()
                .find(|m| m.navigation_target() == Some(second.as_str()))
                .map(|m| m.name.clone());
            let target_navigation = second_descriptor
                .collection_members()
                .find(|m| m.navigation_target() == Some(first.as_str()))
                .map(|m| m.name.clone());

            if let Some(owner) = entities.get_mut(&first) {
                owner.relationships.push(Relationship {
                    source_entity: first_table,
                    target_entity: second_table,
                    source_navigation,
                    target_navigation,
                    kind: RelationshipKind::ManyToMany,
                    join_entity_name: Some(join_name),
                    source_to_target_column: None,
                });
            }
        }
    }

    shadows
}

fn build_shadow_entity(
    schema: &str,
    join_name: &str,
    (first_table, first_pk): (&str, &(String, String)),
    (second_table, second_pk): (&str, &(String, String)),
) -> EntityDefinition {
    let first_column = format!("{first_table}Id");
    let second_column = format!("{second_table}Id");

    let mut shadow = EntityDefinition::shadow(schema, join_name);

    for (column, (_, pk_type)) in [(&first_column, first_pk), (&second_column, second_pk)] {
        shadow.columns.push(Column {
            is_nullable: false,
            ..Column::new(column.clone(), pk_type.clone())
        });
    }

    shadow.primary_key = Some(PrimaryKey {
        name: format!("PK_{join_name}"),
        columns: vec![first_column.clone(), second_column.clone()],
        is_auto_generated: false,
    });

    for (column, table, (pk_name, _)) in [
        (&first_column, first_table, first_pk),
        (&second_column, second_table, second_pk),
    ] {
        shadow.foreign_keys.push(ForeignKey {
            name: format!("FK_{join_name}_{column}"),
            columns: vec![column.clone()],
            referenced_schema: None,
            referenced_table: table.to_owned(),
            referenced_columns: vec![pk_name.clone()],
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        });
    }

    shadow
}

/// One-sided collection navigations: emit a OneToMany, adding the
/// `<Owner>Id` column and FK on the target when absent.
fn infer_one_to_many(
    descriptors: &IndexMap<String, EntityDescriptor>,
    entities: &mut IndexMap<String, EntityDefinition>,
) {
    for (type_name, descriptor) in descriptors {
        for member in descriptor.collection_members() {
            let target = member.navigation_target().unwrap();

            let Some(target_descriptor) = descriptors.get(target) else {
                continue;
            };

            let reciprocal = target != type_name
                && target_descriptor
                    .collection_members()
                    .any(|m| m.navigation_target() == Some(type_name.as_str()));

            if reciprocal {
                // Handled as ManyToMany.
                continue;
            }

            let owner_table = descriptor.effective_table_name().to_owned();
            let target_table = target_descriptor.effective_table_name().to_owned();
            let fk_column = format!("{owner_table}Id");
            let (owner_pk_name, owner_pk_type) = pk_column(entities, type_name);

            let Some(target_entity) = entities.get_mut(target) else {
                continue;
            };

            if target_entity.find_column(&fk_column).is_none() {
                target_entity.columns.push(Column {
                    is_nullable: true,
                    ..Column::new(fk_column.clone(), owner_pk_type)
                });
            }

            push_deduplicated(
                &mut target_entity.foreign_keys,
                ForeignKey {
                    name: format!("FK_{target_table}_{fk_column}"),
                    columns: vec![fk_column.clone()],
                    referenced_schema: None,
                    referenced_table: owner_table.clone(),
                    referenced_columns: vec![owner_pk_name],
                    on_delete: ReferentialAction::Cascade,
                    on_update: ReferentialAction::NoAction,
                },
            );

            let target_navigation = target_descriptor
                .reference_members()
                .find(|m| m.navigation_target() == Some(type_name.as_str()))
                .map(|m| m.name.clone());

            if let Some(owner) = entities.get_mut(type_name) {
                owner.relationships.push(Relationship {
                    source_entity: owner_table,
                    target_entity: target_table,
                    source_navigation: Some(member.name.clone()),
                    target_navigation,
                    kind: RelationshipKind::OneToMany,
                    join_entity_name: None,
                    source_to_target_column: Some(fk_column),
                });
            }
        }
    }
}

/// Mutual single-reference navigations over an FK whose column is the
/// dependent's PK or uniquely constrained: OneToOne. When uniqueness is
/// only implied by the navigations, a UNIQUE constraint is synthesized on
/// the FK column.
fn infer_one_to_one(
    descriptors: &IndexMap<String, EntityDescriptor>,
    entities: &mut IndexMap<String, EntityDefinition>,
) {
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for (type_name, descriptor) in descriptors {
        for member in descriptor.reference_members() {
            let target = member.navigation_target().unwrap();

            if target == type_name {
                continue;
            }

            let Some(target_descriptor) = descriptors.get(target) else {
                continue;
            };

            let mutual = target_descriptor
                .reference_members()
                .any(|m| m.navigation_target() == Some(type_name.as_str()));

            if !mutual {
                continue;
            }

            let mut pair = [type_name.clone(), target.to_owned()];
            pair.sort();
            if !seen.insert((pair[0].clone(), pair[1].clone())) {
                continue;
            }

            // Locate the FK: the side holding it is the dependent.
            let candidates = [(type_name.as_str(), target), (target, type_name.as_str())];
            let located = candidates.iter().find_map(|(dependent, principal)| {
                let principal_table = descriptors[*principal].effective_table_name();
                entities
                    .get(*dependent)?
                    .foreign_keys
                    .iter()
                    .find(|fk| {
                        fk.columns.len() == 1 && names_match(&fk.referenced_table, principal_table)
                    })
                    .map(|fk| {
                        (
                            (*dependent).to_owned(),
                            (*principal).to_owned(),
                            fk.columns[0].clone(),
                        )
                    })
            });

            let Some((dependent, principal, fk_column)) = located else {
                continue;
            };

            let dependent_table = descriptors[&dependent].effective_table_name().to_owned();
            let principal_table = descriptors[&principal].effective_table_name().to_owned();

            let dependent_entity = entities.get_mut(&dependent).unwrap();

            let explicitly_unique = dependent_entity.constraints.iter().any(|c| {
                c.kind == ConstraintKind::Unique
                    && c.columns.len() == 1
                    && names_match(&c.columns[0], &fk_column)
            });

            if !explicitly_unique {
                dependent_entity.constraints.push(Constraint::unique(
                    format!("UQ_{dependent_table}_{fk_column}"),
                    vec![fk_column.clone()],
                ));
            }

            let source_navigation = descriptors[&principal]
                .reference_members()
                .find(|m| m.navigation_target() == Some(dependent.as_str()))
                .map(|m| m.name.clone());
            let target_navigation = descriptors[&dependent]
                .reference_members()
                .find(|m| m.navigation_target() == Some(principal.as_str()))
                .map(|m| m.name.clone());

            if let Some(principal_entity) = entities.get_mut(&principal) {
                principal_entity.relationships.push(Relationship {
                    source_entity: principal_table,
                    target_entity: dependent_table,
                    source_navigation,
                    target_navigation,
                    kind: RelationshipKind::OneToOne,
                    join_entity_name: None,
                    source_to_target_column: Some(fk_column),
                });
            }
        }
    }
}

/// Name and type of an entity's single-column PK, with the conventional
/// fallback for entities whose key is declared elsewhere.
fn pk_column(entities: &IndexMap<String, EntityDefinition>, type_name: &str) -> (String, String) {
    entities
        .get(type_name)
        .and_then(|entity| {
            let pk = entity.primary_key.as_ref()?;
            let name = pk.columns.first()?;
            let column = entity.find_column(name)?;
            Some((name.clone(), column.type_name.clone()))
        })
        .unwrap_or_else(|| ("Id".to_owned(), "int".to_owned()))
}
