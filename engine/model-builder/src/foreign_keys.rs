//! Foreign key discovery: explicit annotations first, then the naming
//! convention, with structural deduplication between the two passes.

use crate::descriptor::{Annotation, EntityDescriptor, MemberShape};
use crate::{BuilderError, BuilderResult};
use entity_model::{EntityDefinition, ForeignKey, ReferentialAction};
use indexmap::IndexMap;
use tracing::debug;

pub(crate) fn discover_foreign_keys(
    descriptor: &EntityDescriptor,
    entities: &IndexMap<String, EntityDefinition>,
    descriptors: &IndexMap<String, EntityDescriptor>,
) -> BuilderResult<Vec<ForeignKey>> {
    let mut foreign_keys: Vec<ForeignKey> = Vec::new();

    // Pass 1: members explicitly marked as the FK behind a navigation.
    for member in &descriptor.members {
        let navigation = member.annotations.iter().find_map(|a| match a {
            Annotation::ForeignKey(nav) => Some(nav.as_str()),
            _ => None,
        });

        let Some(navigation) = navigation else { continue };

        let target_type = descriptor
            .find_member(navigation)
            .and_then(|nav| nav.navigation_target())
            .ok_or_else(|| BuilderError::UnknownNavigation {
                entity: descriptor.type_name.clone(),
                member: member.name.clone(),
                navigation: navigation.to_owned(),
            })?;

        if let Some(fk) = foreign_key_to(descriptor, &member.name, target_type, entities, descriptors) {
            push_deduplicated(&mut foreign_keys, fk);
        }
    }

    // Pass 2: the `<Navigation>Id` naming convention.
    for member in &descriptor.members {
        if !matches!(member.shape, MemberShape::Scalar(_)) {
            continue;
        }

        let Some(prefix) = member.name.strip_suffix("Id").filter(|p| !p.is_empty()) else {
            continue;
        };

        let Some(target_type) = descriptor
            .find_member(prefix)
            .and_then(|nav| nav.navigation_target())
        else {
            continue;
        };

        if let Some(fk) = foreign_key_to(descriptor, &member.name, target_type, entities, descriptors) {
            push_deduplicated(&mut foreign_keys, fk);
        }
    }

    Ok(foreign_keys)
}

/// Builds one FK from `descriptor.<column>` to the primary key of the
/// entity behind `target_type`. An unknown target type is not an error;
/// the navigation may point outside the migrated set.
fn foreign_key_to(
    descriptor: &EntityDescriptor,
    column: &str,
    target_type: &str,
    entities: &IndexMap<String, EntityDefinition>,
    descriptors: &IndexMap<String, EntityDescriptor>,
) -> Option<ForeignKey> {
    let target_descriptor = descriptors.get(target_type)?;
    let referenced_table = target_descriptor.effective_table_name().to_owned();

    let referenced_column = entities
        .get(target_type)
        .and_then(|e| e.primary_key.as_ref())
        .and_then(|pk| pk.columns.first().cloned())
        .unwrap_or_else(|| "Id".to_owned());

    Some(ForeignKey {
        name: format!("FK_{}_{}", descriptor.effective_table_name(), column),
        columns: vec![column.to_owned()],
        referenced_schema: None,
        referenced_table,
        referenced_columns: vec![referenced_column],
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::NoAction,
    })
}

/// Two FKs are duplicates when they share column, referenced table and
/// referenced column, case-insensitively. The first discovery wins.
pub(crate) fn push_deduplicated(foreign_keys: &mut Vec<ForeignKey>, fk: ForeignKey) {
    let duplicate = foreign_keys.iter().any(|existing| {
        columns_match(&existing.columns, &fk.columns)
            && existing
                .referenced_table
                .eq_ignore_ascii_case(&fk.referenced_table)
            && columns_match(&existing.referenced_columns, &fk.referenced_columns)
    });

    if duplicate {
        debug!(fk = %fk.name, "skipping duplicate foreign key");
        return;
    }

    foreign_keys.push(fk);
}

fn columns_match(a: &[String], b: &[String]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.eq_ignore_ascii_case(y))
}
