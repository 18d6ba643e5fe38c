//! Derives the desired entity model from declarative metadata descriptors.
//!
//! The pipeline runs in fixed passes over the whole descriptor set: column
//! and key extraction, foreign key discovery, relationship inference
//! (shadow join entities included), CHECK inference, then a topological
//! sort so referenced tables precede their dependents.

mod checks;
mod columns;
mod descriptor;
mod foreign_keys;
mod relationships;
mod sort;

pub use descriptor::{
    Annotation, DescriptorSource, EntityDescriptor, MemberDescriptor, MemberShape, ScalarKind,
};

use entity_model::EntityDefinition;
use indexmap::IndexMap;
use tracing::debug;

pub type BuilderResult<T> = Result<T, BuilderError>;

#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("cyclic foreign key dependencies between entities: {}", entities.join(", "))]
    SchemaCycle { entities: Vec<String> },

    #[error("duplicate entity descriptor `{0}`")]
    DuplicateEntity(String),

    #[error(
        "member `{entity}.{member}` declares a foreign key for unknown navigation `{navigation}`"
    )]
    UnknownNavigation {
        entity: String,
        member: String,
        navigation: String,
    },
}

#[derive(Debug, Clone)]
pub struct ModelBuilder {
    default_schema: String,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        ModelBuilder::new("dbo")
    }
}

impl ModelBuilder {
    pub fn new(default_schema: impl Into<String>) -> Self {
        ModelBuilder {
            default_schema: default_schema.into(),
        }
    }

    /// Builds the desired model, dependency-ordered. Shadow join entities
    /// appear alongside the declared ones.
    pub fn build(&self, source: &dyn DescriptorSource) -> BuilderResult<Vec<EntityDefinition>> {
        let descriptor_list = source.entity_descriptors();

        let mut descriptors: IndexMap<String, EntityDescriptor> = IndexMap::new();
        for descriptor in descriptor_list {
            let name = descriptor.type_name.clone();
            if descriptors.insert(name.clone(), descriptor).is_some() {
                return Err(BuilderError::DuplicateEntity(name));
            }
        }

        let mut entities: IndexMap<String, EntityDefinition> = descriptors
            .iter()
            .map(|(name, d)| (name.clone(), columns::build_entity(d, &self.default_schema)))
            .collect();

        for (type_name, descriptor) in &descriptors {
            let fks = foreign_keys::discover_foreign_keys(descriptor, &entities, &descriptors)?;
            entities[type_name].foreign_keys.extend(fks);
        }

        let shadows =
            relationships::infer_relationships(&descriptors, &mut entities, &self.default_schema);

        for (type_name, descriptor) in &descriptors {
            checks::infer_check_constraints(descriptor, &mut entities[type_name]);
        }

        let mut all: Vec<EntityDefinition> = entities.into_values().collect();
        all.extend(shadows);

        debug!(entities = all.len(), "built desired model");

        sort::sort_by_dependencies(all)
    }
}
