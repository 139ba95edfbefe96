//! Recursive refiner: splits planned subtasks until the generator says they
//! are fine-grained enough or the depth bound is reached.
//!
//! Depth is counted from the node refinement starts at (0). A node at
//! `max_depth` is never sent to the generator, so the deepest children added
//! sit exactly `max_depth` levels below the starting node.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::graph::TaskGraph;
use crate::core::parse::{Refinement, parse_refinement};
use crate::core::siblings::attach_children;
use crate::core::types::NodeId;
use crate::io::generator::{GenerationRequest, Generator, Purpose};
use crate::io::prompt::{PromptBuilder, RefinerInputs};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefineOutcome {
    /// Generator calls made.
    pub evaluated: usize,
    /// Nodes added by splits.
    pub created: usize,
    /// Calls that failed or returned text that did not parse.
    pub failures: usize,
    /// Deepest relative depth at which children were added.
    pub deepest: usize,
}

#[derive(Debug, Clone)]
pub struct RecursiveRefiner {
    prompts: PromptBuilder,
    max_depth: usize,
}

impl RecursiveRefiner {
    pub fn new(prompt_budget_bytes: usize, max_depth: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
            max_depth,
        }
    }

    /// Refine every depth-2 subtask that exists when the call starts.
    #[instrument(skip_all, fields(max_depth = self.max_depth))]
    pub fn refine_all<G: Generator>(&self, generator: &G, graph: &mut TaskGraph) -> Result<RefineOutcome> {
        let root = graph
            .root()
            .ok_or_else(|| anyhow!("task graph has no root to refine"))?;
        let subtasks: Vec<NodeId> = graph
            .children(root)
            .iter()
            .flat_map(|&group| graph.children(group).to_vec())
            .collect();

        let mut outcome = RefineOutcome::default();
        for subtask in subtasks {
            self.refine_at(generator, graph, subtask, 0, &mut outcome)?;
        }
        info!(
            evaluated = outcome.evaluated,
            created = outcome.created,
            failures = outcome.failures,
            "refinement complete"
        );
        Ok(outcome)
    }

    /// Refine the subtree rooted at `node`, counting depth from `node`.
    pub fn refine_node<G: Generator>(
        &self,
        generator: &G,
        graph: &mut TaskGraph,
        node: NodeId,
    ) -> Result<RefineOutcome> {
        graph.node(node)?;
        let mut outcome = RefineOutcome::default();
        self.refine_at(generator, graph, node, 0, &mut outcome)?;
        Ok(outcome)
    }

    fn refine_at<G: Generator>(
        &self,
        generator: &G,
        graph: &mut TaskGraph,
        node: NodeId,
        depth: usize,
        outcome: &mut RefineOutcome,
    ) -> Result<()> {
        if depth >= self.max_depth {
            debug!(node = %node, depth, "depth bound reached");
            return Ok(());
        }

        let inputs = self.inputs(graph, node, depth)?;
        let area = inputs.area_name.clone();
        let prompt = self.prompts.build_refiner(&inputs)?;

        outcome.evaluated += 1;
        let response = match generator.generate(&GenerationRequest {
            purpose: Purpose::Refine,
            system: prompt.system,
            user: prompt.user,
        }) {
            Ok(response) => response,
            Err(err) => {
                warn!(node = %node, err = %format!("{err:#}"), "refinement call failed");
                outcome.failures += 1;
                return Ok(());
            }
        };

        let children = match parse_refinement(&response) {
            Ok(Refinement::Keep) => {
                debug!(node = %node, depth, "kept as is");
                return Ok(());
            }
            Ok(Refinement::Split(children)) => children,
            Err(err) => {
                warn!(node = %node, %err, "refinement response did not parse");
                outcome.failures += 1;
                return Ok(());
            }
        };

        let attached = attach_children(graph, node, area.as_deref(), &children)?;
        debug!(
            node = %node,
            depth,
            children = attached.ids.len(),
            edges = attached.edges,
            "split"
        );
        outcome.created += attached.ids.len();
        outcome.deepest = outcome.deepest.max(depth + 1);

        for child in attached.ids {
            self.refine_at(generator, graph, child, depth + 1, outcome)?;
        }
        Ok(())
    }

    fn inputs(&self, graph: &TaskGraph, id: NodeId, depth: usize) -> Result<RefinerInputs> {
        let node = graph.node(id)?;
        let objective = graph
            .root()
            .and_then(|root| graph.get(root))
            .map(|root| {
                if root.description.trim().is_empty() {
                    root.title.clone()
                } else {
                    root.description.clone()
                }
            })
            .unwrap_or_default();
        let area_description = graph
            .functional_group(id)
            .and_then(|group| graph.get(group))
            .map(|group| group.description.clone());
        let parent = node.parent.and_then(|parent| graph.get(parent));

        Ok(RefinerInputs {
            objective,
            area_name: node.area.clone(),
            area_description,
            title: node.title.clone(),
            description: node.description.clone(),
            expected_output: node.expected_output.clone(),
            dependencies: node
                .dependencies
                .iter()
                .filter_map(|&dep| graph.get(dep))
                .map(|dep| dep.title.clone())
                .collect(),
            parent_title: parent.map(|p| p.title.clone()),
            parent_description: parent.map(|p| p.description.clone()).unwrap_or_default(),
            parent_expected_output: parent
                .map(|p| p.expected_output.clone())
                .unwrap_or_default(),
            parent_dependencies: parent
                .map(|p| {
                    p.dependencies
                        .iter()
                        .filter_map(|&dep| graph.get(dep))
                        .map(|dep| dep.title.clone())
                        .collect()
                })
                .unwrap_or_default(),
            depth,
            max_depth: self.max_depth,
        })
    }
}
