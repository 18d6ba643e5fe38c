//! Dependency ordering: referenced tables precede dependents.

use crate::{BuilderError, BuilderResult};
use entity_model::{ConstraintKind, EntityDefinition};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Sorts entities so that every referenced table comes before its
/// dependents. Cycles in the foreign key graph are fatal: no valid
/// creation order exists.
pub(crate) fn sort_by_dependencies(
    entities: Vec<EntityDefinition>,
) -> BuilderResult<Vec<EntityDefinition>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut node_of: HashMap<String, NodeIndex> = HashMap::new();

    for (position, entity) in entities.iter().enumerate() {
        let node = graph.add_node(position);
        node_of.insert(entity.name.to_ascii_lowercase(), node);
    }

    for entity in &entities {
        let dependent = node_of[&entity.name.to_ascii_lowercase()];

        let referenced_tables = entity
            .foreign_keys
            .iter()
            .map(|fk| fk.referenced_table.as_str())
            .chain(entity.constraints.iter().filter_map(|c| {
                (c.kind == ConstraintKind::ForeignKey)
                    .then(|| c.referenced_table.as_deref())
                    .flatten()
            }));

        for referenced in referenced_tables {
            // Self-references and tables outside the set impose no ordering.
            if let Some(&principal) = node_of.get(&referenced.to_ascii_lowercase()) {
                if principal != dependent {
                    graph.update_edge(principal, dependent, ());
                }
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => {
            let mut slots: Vec<Option<EntityDefinition>> = entities.into_iter().map(Some).collect();
            Ok(order
                .into_iter()
                .map(|node| slots[graph[node]].take().expect("every node visited once"))
                .collect())
        }
        Err(_) => {
            let mut cycle_members: Vec<String> = Vec::new();
            let mut slots: Vec<Option<EntityDefinition>> = entities.into_iter().map(Some).collect();

            for component in tarjan_scc(&graph) {
                if component.len() > 1 {
                    for node in component {
                        if let Some(entity) = slots[graph[node]].take() {
                            cycle_members.push(entity.name);
                        }
                    }
                }
            }

            cycle_members.sort();
            Err(BuilderError::SchemaCycle {
                entities: cycle_members,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_model::{ForeignKey, ReferentialAction};

    fn entity(name: &str, references: &[&str]) -> EntityDefinition {
        let mut entity = EntityDefinition::new("dbo", name);
        for referenced in references {
            entity.foreign_keys.push(ForeignKey {
                name: format!("FK_{name}_{referenced}Id"),
                columns: vec![format!("{referenced}Id")],
                referenced_schema: None,
                referenced_table: (*referenced).to_owned(),
                referenced_columns: vec!["Id".into()],
                on_delete: ReferentialAction::Cascade,
                on_update: ReferentialAction::NoAction,
            });
        }
        entity
    }

    #[test]
    fn referenced_tables_come_first() {
        let sorted = sort_by_dependencies(vec![
            entity("Comment", &["Post"]),
            entity("Post", &["Blog"]),
            entity("Blog", &[]),
        ])
        .unwrap();

        let names: Vec<&str> = sorted.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Blog", "Post", "Comment"]);
    }

    #[test]
    fn self_references_do_not_cycle() {
        let sorted = sort_by_dependencies(vec![entity("Employee", &["Employee"])]).unwrap();
        assert_eq!(sorted.len(), 1);
    }

    #[test]
    fn cycles_are_fatal() {
        let err = sort_by_dependencies(vec![
            entity("A", &["B"]),
            entity("B", &["A"]),
            entity("C", &[]),
        ])
        .unwrap_err();

        match err {
            BuilderError::SchemaCycle { entities } => {
                assert_eq!(entities, vec!["A".to_owned(), "B".to_owned()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
