//! Column extraction and primary key identification.

use crate::descriptor::{Annotation, EntityDescriptor, MemberDescriptor, MemberShape, ScalarKind};
use entity_model::{Column, Constraint, EntityDefinition, PrimaryKey};

/// Builds the entity skeleton from one descriptor: persisted columns, the
/// primary key, and UNIQUE constraints from explicit annotations. Foreign
/// keys, relationships and checks are separate passes over the whole
/// descriptor set.
pub(crate) fn build_entity(descriptor: &EntityDescriptor, default_schema: &str) -> EntityDefinition {
    let table = descriptor.effective_table_name();
    let mut entity = EntityDefinition::new(
        descriptor.schema.as_deref().unwrap_or(default_schema),
        table,
    );
    entity.source_type = Some(descriptor.type_name.clone());
    entity.description = descriptor.description.clone();

    let key_members: Vec<&MemberDescriptor> = descriptor
        .members
        .iter()
        .filter(|m| m.has(|a| matches!(a, Annotation::Key)))
        .collect();
    let composite_key = key_members.len() > 1;

    for member in &descriptor.members {
        if member.is_navigation() || member.has(|a| matches!(a, Annotation::NotMapped)) {
            continue;
        }

        let is_key = member.has(|a| matches!(a, Annotation::Key));
        entity.columns.push(extract_column(member, is_key, composite_key));

        if member.has(|a| matches!(a, Annotation::Unique)) {
            entity.constraints.push(Constraint::unique(
                format!("UQ_{}_{}", table, member.name),
                vec![member.name.clone()],
            ));
        }
    }

    if !key_members.is_empty() {
        entity.primary_key = Some(PrimaryKey {
            name: format!("PK_{table}"),
            columns: key_members.iter().map(|m| m.name.clone()).collect(),
            is_auto_generated: !composite_key,
        });
    }

    entity
}

fn extract_column(member: &MemberDescriptor, is_key: bool, composite_key: bool) -> Column {
    let kind = match member.shape {
        MemberShape::Scalar(kind) => kind,
        _ => unreachable!("navigation members never reach column extraction"),
    };

    let required = member.has(|a| matches!(a, Annotation::Required));

    let mut column = Column {
        name: member.name.clone(),
        type_name: resolve_sql_type(member, kind),
        is_nullable: member.optional && !required && !is_key,
        is_identity: resolve_identity(member, kind, is_key, composite_key),
        ..Default::default()
    };

    if kind == ScalarKind::Decimal && !member.has(|a| matches!(a, Annotation::ColumnType(_))) {
        column.precision = Some(18);
        column.scale = Some(2);
    }

    for annotation in &member.annotations {
        match annotation {
            Annotation::DefaultValue(expr) => column.default_value = Some(expr.clone()),
            Annotation::Description(text) => column.description = Some(text.clone()),
            _ => {}
        }
    }

    column
}

fn resolve_sql_type(member: &MemberDescriptor, kind: ScalarKind) -> String {
    if let Some(Annotation::ColumnType(sql_type)) = member
        .annotations
        .iter()
        .find(|a| matches!(a, Annotation::ColumnType(_)))
    {
        return sql_type.clone();
    }

    if kind == ScalarKind::String {
        if let Some(Annotation::MaxLength(max)) = member
            .annotations
            .iter()
            .find(|a| matches!(a, Annotation::MaxLength(_)))
        {
            return format!("nvarchar({max})");
        }
    }

    kind.default_sql_type().to_owned()
}

/// Integer single-column keys are identity columns unless declared
/// otherwise; composite keys never are.
fn resolve_identity(member: &MemberDescriptor, kind: ScalarKind, is_key: bool, composite_key: bool) -> bool {
    if composite_key {
        return false;
    }

    if member.has(|a| matches!(a, Annotation::Identity)) {
        return true;
    }

    is_key && kind.is_integer()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MemberDescriptor as M;
    use pretty_assertions::assert_eq;

    #[test]
    fn integer_key_becomes_identity() {
        let descriptor = EntityDescriptor::new("Order").member(M::scalar("Id", ScalarKind::I32).key());
        let entity = build_entity(&descriptor, "dbo");

        let id = entity.find_column("Id").unwrap();
        assert!(id.is_identity);
        assert!(!id.is_nullable);
        assert_eq!(entity.primary_key.as_ref().unwrap().name, "PK_Order");
        assert!(entity.primary_key.as_ref().unwrap().is_auto_generated);
    }

    #[test]
    fn guid_key_is_not_identity() {
        let descriptor = EntityDescriptor::new("User").member(M::scalar("Id", ScalarKind::Guid).key());
        let entity = build_entity(&descriptor, "dbo");

        assert!(!entity.find_column("Id").unwrap().is_identity);
    }

    #[test]
    fn composite_key_disables_identity_and_auto_generation() {
        let descriptor = EntityDescriptor::new("OrderLine")
            .member(M::scalar("OrderId", ScalarKind::I32).key())
            .member(M::scalar("LineNo", ScalarKind::I32).key());
        let entity = build_entity(&descriptor, "dbo");

        assert!(entity.columns.iter().all(|c| !c.is_identity));
        let pk = entity.primary_key.as_ref().unwrap();
        assert_eq!(pk.columns, vec!["OrderId".to_owned(), "LineNo".to_owned()]);
        assert!(!pk.is_auto_generated);
    }

    #[test]
    fn max_length_refines_the_string_type() {
        let descriptor = EntityDescriptor::new("User")
            .member(M::scalar("Id", ScalarKind::Guid).key())
            .member(M::scalar("Name", ScalarKind::String).required().max_length(100))
            .member(M::scalar("Bio", ScalarKind::String).optional(true));
        let entity = build_entity(&descriptor, "dbo");

        assert_eq!(entity.find_column("Name").unwrap().type_name, "nvarchar(100)");
        assert!(!entity.find_column("Name").unwrap().is_nullable);
        assert_eq!(entity.find_column("Bio").unwrap().type_name, "nvarchar(max)");
        assert!(entity.find_column("Bio").unwrap().is_nullable);
    }

    #[test]
    fn navigations_and_unmapped_members_produce_no_columns() {
        let descriptor = EntityDescriptor::new("User")
            .member(M::scalar("Id", ScalarKind::Guid).key())
            .member(M::reference("Profile", "Profile"))
            .member(M::collection("Posts", "Post"))
            .member(M::scalar("Transient", ScalarKind::I32).not_mapped());
        let entity = build_entity(&descriptor, "dbo");

        assert_eq!(entity.columns.len(), 1);
    }

    #[test]
    fn unique_annotation_synthesizes_a_constraint() {
        let descriptor = EntityDescriptor::new("User")
            .member(M::scalar("Id", ScalarKind::Guid).key())
            .member(M::scalar("Email", ScalarKind::String).max_length(200).unique());
        let entity = build_entity(&descriptor, "dbo");

        assert_eq!(entity.constraints.len(), 1);
        assert_eq!(entity.constraints[0].name, "UQ_User_Email");
    }
}
