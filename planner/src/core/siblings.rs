//! Attaching a batch of sibling tasks and resolving their declared
//! dependencies by title.
//!
//! Title resolution is best-effort: a dependency that does not match one of
//! the new siblings (typo, cross-group reference) is dropped, and so is an
//! edge that would close a cycle. Neither fails the batch.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::core::error::GraphError;
use crate::core::graph::{NewNode, TaskGraph};
use crate::core::parse::TaskDescriptor;
use crate::core::types::NodeId;

/// Outcome of [`attach_children`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachedChildren {
    /// Created children, in descriptor order.
    pub ids: Vec<NodeId>,
    /// Dependency edges added between the new siblings.
    pub edges: usize,
    /// Declared dependency titles that were dropped.
    pub unresolved: Vec<String>,
}

/// Case-insensitive, whitespace-trimmed title key.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Create one child of `parent` per descriptor (all inheriting `area`), then
/// resolve dependencies among them.
///
/// All nodes are created before any dependency is resolved, so a dependency
/// may name a sibling declared later in the list.
pub fn attach_children(
    graph: &mut TaskGraph,
    parent: NodeId,
    area: Option<&str>,
    descriptors: &[TaskDescriptor],
) -> Result<AttachedChildren, GraphError> {
    let mut ids = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let id = graph.create(
            NewNode::new(
                descriptor.title.trim(),
                descriptor.description.as_str(),
                descriptor.expected_output.as_str(),
            )
            .with_parent(parent)
            .with_area(area.map(str::to_string))
            .with_execution_type(descriptor.execution_type),
        )?;
        ids.push(id);
    }

    let declared: Vec<(NodeId, &[String])> = ids
        .iter()
        .zip(descriptors)
        .map(|(&id, descriptor)| (id, descriptor.dependencies.as_slice()))
        .collect();
    let (edges, unresolved) = resolve_dependencies(graph, &declared);

    Ok(AttachedChildren {
        ids,
        edges,
        unresolved,
    })
}

/// Resolve declared dependency titles among `siblings` and add the edges.
///
/// Returns the number of edges added and the titles that were dropped. When two
/// siblings share a normalized title, the later one wins.
pub fn resolve_dependencies(
    graph: &mut TaskGraph,
    siblings: &[(NodeId, &[String])],
) -> (usize, Vec<String>) {
    let by_title: HashMap<String, NodeId> = siblings
        .iter()
        .filter_map(|&(id, _)| graph.get(id).map(|node| (normalize_title(&node.title), id)))
        .collect();

    let mut edges = 0;
    let mut unresolved = Vec::new();
    for &(id, titles) in siblings {
        for title in titles {
            let Some(&dep) = by_title.get(&normalize_title(title)) else {
                debug!(node = %id, dependency = %title, "dropping unresolved dependency title");
                unresolved.push(title.clone());
                continue;
            };
            match graph.add_dependency(id, dep) {
                Ok(()) => edges += 1,
                Err(err) => {
                    warn!(node = %id, dependency = %title, %err, "dropping dependency edge");
                    unresolved.push(title.clone());
                }
            }
        }
    }
    (edges, unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecutionType;

    fn descriptor(title: &str, deps: &[&str]) -> TaskDescriptor {
        TaskDescriptor {
            title: title.to_string(),
            description: format!("{title} description"),
            expected_output: format!("{title} output"),
            execution_type: ExecutionType::Generate,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn group() -> (TaskGraph, NodeId) {
        let mut graph = TaskGraph::new();
        let root = graph.create(NewNode::new("Root", "", "")).expect("root");
        let group = graph
            .create(
                NewNode::new("Logistics", "", "")
                    .with_parent(root)
                    .with_area(Some("Logistics".to_string())),
            )
            .expect("group");
        (graph, group)
    }

    #[test]
    fn resolves_sibling_titles_case_insensitively() {
        let (mut graph, group) = group();
        let attached = attach_children(
            &mut graph,
            group,
            Some("Logistics"),
            &[descriptor("A", &[]), descriptor("B", &["  a "])],
        )
        .expect("attach");

        assert_eq!(attached.edges, 1);
        assert!(attached.unresolved.is_empty());
        let (a, b) = (attached.ids[0], attached.ids[1]);
        assert_eq!(graph.dependencies(b), &[a]);
        assert!(graph.dependencies(a).is_empty());
        assert_eq!(graph.children(group), &[a, b]);
        assert_eq!(graph.node(b).expect("b").area.as_deref(), Some("Logistics"));
    }

    #[test]
    fn forward_references_resolve() {
        let (mut graph, group) = group();
        let attached = attach_children(
            &mut graph,
            group,
            None,
            &[descriptor("Pack", &["Buy bag"]), descriptor("Buy bag", &[])],
        )
        .expect("attach");
        assert_eq!(graph.dependencies(attached.ids[0]), &[attached.ids[1]]);
    }

    /// Known-lossy path: unknown titles are dropped, not raised.
    #[test]
    fn unresolved_titles_are_dropped_without_error() {
        let (mut graph, group) = group();
        let attached = attach_children(
            &mut graph,
            group,
            None,
            &[descriptor("A", &[]), descriptor("B", &["A"])],
        )
        .expect("attach");
        let b = attached.ids[1];

        let extra = vec!["Z".to_string()];
        let (edges, unresolved) = resolve_dependencies(&mut graph, &[(b, extra.as_slice())]);
        assert_eq!(edges, 0);
        assert_eq!(unresolved, vec!["Z".to_string()]);
        assert_eq!(graph.dependencies(b).len(), 1);
    }

    #[test]
    fn cyclic_and_self_declarations_are_dropped() {
        let (mut graph, group) = group();
        let attached = attach_children(
            &mut graph,
            group,
            None,
            &[
                descriptor("A", &["B"]),
                descriptor("B", &["A"]),
                descriptor("C", &["C"]),
            ],
        )
        .expect("attach");

        assert_eq!(attached.edges, 1);
        assert_eq!(attached.unresolved, vec!["A".to_string(), "C".to_string()]);
        assert!(graph.topological_order().is_ok());
    }
}
