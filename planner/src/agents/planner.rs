//! Subtask planner: proposes the depth-2 subtasks of every functional group.
//!
//! Groups are planned one after another so each prompt can list what the
//! earlier groups already cover. Nothing the generator returns fails the
//! phase: a failed call or an unparseable answer leaves that group without
//! children and planning moves on.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::graph::TaskGraph;
use crate::core::parse::parse_subtask_plan;
use crate::core::siblings::attach_children;
use crate::core::types::NodeId;
use crate::io::generator::{GenerationRequest, Generator, Purpose};
use crate::io::prompt::{PlannerInputs, PromptBuilder};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOutcome {
    /// Subtasks created across all groups.
    pub created: usize,
    /// Records dropped for missing fields.
    pub skipped_records: usize,
    /// Groups left without children because the call or the parse failed.
    pub failed_groups: Vec<NodeId>,
    /// Dependency titles that matched no sibling.
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SubtaskPlanner {
    prompts: PromptBuilder,
}

impl SubtaskPlanner {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    #[instrument(skip_all)]
    pub fn run<G: Generator>(&self, generator: &G, graph: &mut TaskGraph) -> Result<PlanOutcome> {
        let root_id = graph
            .root()
            .ok_or_else(|| anyhow!("task graph has no root to plan"))?;
        let root = graph.node(root_id)?;
        let objective = if root.description.trim().is_empty() {
            root.title.clone()
        } else {
            root.description.clone()
        };
        let groups = graph.children(root_id).to_vec();
        let all_areas: Vec<String> = groups
            .iter()
            .filter_map(|&id| graph.get(id))
            .map(|group| group.title.clone())
            .collect();

        let mut outcome = PlanOutcome::default();
        for (index, &group_id) in groups.iter().enumerate() {
            let group = graph.node(group_id)?;
            let area = group.area.clone();
            let inputs = PlannerInputs {
                objective: objective.clone(),
                area_name: group.title.clone(),
                area_description: group.description.clone(),
                area_expected_output: group.expected_output.clone(),
                responsibilities: group.responsibilities.clone(),
                all_areas: all_areas.clone(),
                other_areas: planned_elsewhere(graph, &groups[..index]),
            };
            let prompt = self.prompts.build_planner(&inputs)?;

            let response = match generator.generate(&GenerationRequest {
                purpose: Purpose::Plan,
                system: prompt.system,
                user: prompt.user,
            }) {
                Ok(response) => response,
                Err(err) => {
                    warn!(group = %group_id, err = %format!("{err:#}"), "planning call failed");
                    outcome.failed_groups.push(group_id);
                    continue;
                }
            };

            let plan = match parse_subtask_plan(&response) {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(group = %group_id, %err, "subtask plan did not parse");
                    outcome.failed_groups.push(group_id);
                    continue;
                }
            };
            if plan.skipped > 0 {
                debug!(group = %group_id, skipped = plan.skipped, "skipped malformed subtask records");
            }

            let attached = attach_children(graph, group_id, area.as_deref(), &plan.subtasks)?;
            debug!(
                group = %group_id,
                subtasks = attached.ids.len(),
                edges = attached.edges,
                "planned group"
            );
            outcome.created += attached.ids.len();
            outcome.skipped_records += plan.skipped;
            outcome.unresolved.extend(attached.unresolved);
        }

        info!(
            created = outcome.created,
            failed_groups = outcome.failed_groups.len(),
            "planning complete"
        );
        Ok(outcome)
    }
}

/// `- Group: a, b` per earlier group that has subtasks, or `None`.
fn planned_elsewhere(graph: &TaskGraph, earlier: &[NodeId]) -> String {
    let lines: Vec<String> = earlier
        .iter()
        .filter_map(|&id| graph.get(id))
        .filter(|group| !group.children.is_empty())
        .map(|group| {
            let titles: Vec<&str> = group
                .children
                .iter()
                .filter_map(|&child| graph.get(child))
                .map(|child| child.title.as_str())
                .collect();
            format!("- {}: {}", group.title, titles.join(", "))
        })
        .collect();
    if lines.is_empty() {
        "None".to_string()
    } else {
        lines.join("\n")
    }
}
