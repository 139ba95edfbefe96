//! Area decomposer: splits the root objective into functional groups.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::graph::{NewNode, TaskGraph};
use crate::core::parse::{AreaDescriptor, Decomposition, parse_decomposition};
use crate::core::types::NodeId;
use crate::io::generator::{GenerationRequest, Generator, Purpose};
use crate::io::prompt::{DecomposerInputs, PromptBuilder};

/// Title of the single group created when the response could not be parsed.
pub const UNPARSED_GROUP_TITLE: &str = "Unparsed decomposition";

/// Group count the prompt asks for. Responses outside it are kept but logged.
const EXPECTED_GROUPS: std::ops::RangeInclusive<usize> = 3..=9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecomposeOutcome {
    /// Depth-1 nodes, in response order.
    pub groups: Vec<NodeId>,
    /// The response did not parse and the fallback group was created.
    pub degenerate: bool,
}

#[derive(Debug, Clone)]
pub struct AreaDecomposer {
    prompts: PromptBuilder,
}

impl AreaDecomposer {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    /// One generator call; the rationale goes to the root's intro and each
    /// group becomes a child of the root.
    ///
    /// A generator failure is returned as an error since no node exists yet to
    /// carry it.
    #[instrument(skip_all)]
    pub fn run<G: Generator>(&self, generator: &G, graph: &mut TaskGraph) -> Result<DecomposeOutcome> {
        let root_id = graph
            .root()
            .ok_or_else(|| anyhow!("task graph has no root to decompose"))?;
        let root = graph.node(root_id)?;
        let objective = if root.description.trim().is_empty() {
            root.title.clone()
        } else {
            root.description.clone()
        };
        let prompt = self.prompts.build_decomposer(&DecomposerInputs {
            objective,
            expected_output: root.expected_output.clone(),
        })?;

        let response = generator
            .generate(&GenerationRequest {
                purpose: Purpose::Decompose,
                system: prompt.system,
                user: prompt.user,
            })
            .context("decompose objective")?;

        let decomposition = parse_decomposition(&response).unwrap_or_else(|err| {
            warn!(%err, "decomposition response did not parse; keeping raw text");
            Decomposition::degenerate(&response)
        });
        let degenerate = decomposition.is_degenerate();
        if !degenerate && !EXPECTED_GROUPS.contains(&decomposition.areas.len()) {
            warn!(
                groups = decomposition.areas.len(),
                "decomposition group count outside 3-9"
            );
        }

        if !decomposition.intro.is_empty() {
            graph.set_intro(root_id, decomposition.intro.clone())?;
        }

        let mut groups = Vec::with_capacity(decomposition.areas.len());
        for area in &decomposition.areas {
            let id = graph.create(group_node(area).with_parent(root_id))?;
            debug!(group = %id, area = %area.area, "created functional group");
            groups.push(id);
        }

        info!(groups = groups.len(), degenerate, "decomposition complete");
        Ok(DecomposeOutcome { groups, degenerate })
    }
}

fn group_node(area: &AreaDescriptor) -> NewNode {
    match &area.raw {
        Some(raw) => NewNode::new(UNPARSED_GROUP_TITLE, raw.as_str(), "")
            .with_area(Some(UNPARSED_GROUP_TITLE.to_string())),
        None => NewNode::new(
            area.area.as_str(),
            area.description.as_str(),
            area.expected_output.as_str(),
        )
        .with_area(Some(area.area.clone()))
        .with_execution_type(area.execution_type)
        .with_responsibilities(area.responsibilities.clone()),
    }
}
