//! Post-order executor: turns the finished tree into results.
//!
//! Children always run before their parent. Siblings run in dependency
//! order, where a dependency anywhere in a sibling's subtree counts against
//! that sibling, so a declared dependency has its result before the
//! dependent's prompt is built. The root and the functional groups only
//! aggregate their children's results. Every node from depth 2 down produces its own result, either
//! from the generator or, for external work, from a placeholder.

use anyhow::{Result, anyhow};
use indexmap::IndexMap;
use tracing::{debug, info, instrument, warn};

use crate::core::graph::TaskGraph;
use crate::core::ordering::dependency_order;
use crate::core::types::{ExecutionType, GenerationRecord, NodeId, NodeResult, Prompt, Status};
use crate::io::config::PlannerConfig;
use crate::io::generator::{GenerationRequest, Generator, Purpose};
use crate::io::prompt::{ExecutorInputs, GroupContext, PromptBuilder, ResultContext};

/// Appended to results cut for prompt context.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]...";

/// Prefix of the result stored when generation keeps failing.
pub const GENERATION_ERROR_PREFIX: &str = "[GENERATION ERROR]: ";

#[derive(Debug, Clone)]
pub struct PostOrderExecutor {
    prompts: PromptBuilder,
    max_dependency_chars: usize,
    max_child_previews: usize,
    generation_retries: u32,
}

impl PostOrderExecutor {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            prompts: PromptBuilder::new(config.prompt_budget_bytes),
            max_dependency_chars: config.max_dependency_chars,
            max_child_previews: config.max_child_previews,
            generation_retries: config.generation_retries,
        }
    }

    /// Execute the whole tree. Returns one record per depth >= 2 node, in
    /// traversal order.
    #[instrument(skip_all)]
    pub fn run<G: Generator>(&self, generator: &G, graph: &mut TaskGraph) -> Result<Vec<GenerationRecord>> {
        let root = graph
            .root()
            .ok_or_else(|| anyhow!("task graph has no root to execute"))?;
        let mut records = Vec::new();
        self.execute_node(generator, graph, root, 0, &mut records)?;
        info!(generated = records.len(), "execution complete");
        Ok(records)
    }

    fn execute_node<G: Generator>(
        &self,
        generator: &G,
        graph: &mut TaskGraph,
        id: NodeId,
        depth: usize,
        records: &mut Vec<GenerationRecord>,
    ) -> Result<()> {
        for child in sibling_order(graph, id) {
            self.execute_node(generator, graph, child, depth + 1, records)?;
        }

        if depth < 2 {
            if let Some(result) = aggregate(graph, id) {
                graph.set_result(id, result)?;
            } else {
                debug!(node = %id, "no children to aggregate");
            }
        } else {
            let prompt = self.prompts.build_executor(&self.inputs(graph, id)?)?;
            let node = graph.node(id)?;
            let response = match node.execution_type {
                ExecutionType::External => external_placeholder(&node.title, &node.expected_output),
                ExecutionType::Generate => self.generate_with_retries(generator, id, &prompt),
            };
            graph.set_prompt(id, prompt.clone())?;
            graph.set_result(id, NodeResult::Text(response.clone()))?;
            records.push(GenerationRecord {
                node_id: id,
                prompt,
                response,
            });
        }

        graph.set_status(id, Status::Done)?;
        Ok(())
    }

    fn generate_with_retries<G: Generator>(&self, generator: &G, id: NodeId, prompt: &Prompt) -> String {
        let request = GenerationRequest {
            purpose: Purpose::Execute,
            system: prompt.system.clone(),
            user: prompt.user.clone(),
        };
        let attempts = self.generation_retries + 1;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match generator.generate(&request) {
                Ok(response) => return response,
                Err(err) => {
                    warn!(node = %id, attempt, attempts, err = %format!("{err:#}"), "generation failed");
                    last_error = Some(err);
                }
            }
        }
        let message = last_error.map_or_else(|| "no attempt made".to_string(), |err| format!("{err:#}"));
        format!("{GENERATION_ERROR_PREFIX}{message}")
    }

    fn inputs(&self, graph: &TaskGraph, id: NodeId) -> Result<ExecutorInputs> {
        let node = graph.node(id)?;
        let root = graph.root();
        let project_title = root
            .and_then(|root| graph.get(root))
            .map(|root| root.title.clone())
            .unwrap_or_default();
        let group = match node.parent {
            Some(parent) if Some(parent) != root => graph
                .functional_group(id)
                .and_then(|group| graph.get(group))
                .map(|group| GroupContext {
                    title: group.title.clone(),
                    description: group.description.clone(),
                }),
            _ => None,
        };

        let dependencies = node
            .dependencies
            .iter()
            .filter_map(|&dep| graph.get(dep))
            .filter_map(|dep| {
                let Some(result) = dep.result.as_ref() else {
                    debug!(node = %id, dependency = %dep.id, "dependency has no result yet");
                    return None;
                };
                Some(ResultContext {
                    title: dep.title.clone(),
                    result: self.preview(result),
                })
            })
            .collect();

        let children = node
            .children
            .iter()
            .filter_map(|&child| graph.get(child))
            .filter_map(|child| {
                child.result.as_ref().map(|result| ResultContext {
                    title: child.title.clone(),
                    result: self.preview(result),
                })
            })
            .take(self.max_child_previews)
            .collect();

        Ok(ExecutorInputs {
            project_title,
            group,
            title: node.title.clone(),
            description: node.description.clone(),
            expected_output: node.expected_output.clone(),
            dependencies,
            children,
        })
    }

    fn preview(&self, result: &NodeResult) -> String {
        match result {
            NodeResult::Text(text) => truncate_chars(text, self.max_dependency_chars),
            NodeResult::Aggregate(map) => format!(
                "[Has {} subtasks. See details in their own context.]",
                map.len()
            ),
        }
    }
}

/// Children of `id` ordered so that every dependency declared inside a
/// child's subtree runs first when it lives under another child; creation
/// order otherwise.
fn sibling_order(graph: &TaskGraph, id: NodeId) -> Vec<NodeId> {
    let children = graph.children(id).to_vec();
    dependency_order(&children, |child| {
        let mut deps = Vec::new();
        for node in subtree(graph, child) {
            for &dep in graph.dependencies(node) {
                if let Some(sibling) = ancestor_under(graph, dep, id)
                    && sibling != child
                    && !deps.contains(&sibling)
                {
                    deps.push(sibling);
                }
            }
        }
        deps
    })
    .unwrap_or_else(|(from, to)| {
        warn!(%from, %to, "sibling dependency cycle; using creation order");
        children.clone()
    })
}

/// `id` and all of its descendants.
fn subtree(graph: &TaskGraph, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(next) = stack.pop() {
        out.push(next);
        stack.extend(graph.children(next).iter().rev());
    }
    out
}

/// The ancestor of `node` (or `node` itself) whose parent is `parent`.
fn ancestor_under(graph: &TaskGraph, node: NodeId, parent: NodeId) -> Option<NodeId> {
    let mut current = node;
    loop {
        let up = graph.parent(current)?;
        if up == parent {
            return Some(current);
        }
        current = up;
    }
}

/// `{child title -> child result}` over every child, in child order. A child
/// that produced nothing maps to `None`. A node without children gets no
/// result at all.
fn aggregate(graph: &TaskGraph, id: NodeId) -> Option<NodeResult> {
    let mut map = IndexMap::new();
    for child in graph.children(id).iter().filter_map(|&child| graph.get(child)) {
        if child.result.is_none() {
            debug!(node = %child.id, "child has no result");
        }
        map.insert(child.title.clone(), child.result.clone());
    }
    (!map.is_empty()).then_some(NodeResult::Aggregate(map))
}

/// Result used for external work: the expected output, or a marker naming
/// the task when none was given.
pub fn external_placeholder(title: &str, expected_output: &str) -> String {
    if expected_output.trim().is_empty() {
        format!("[Simulated result for: {title}]")
    } else {
        expected_output.to_string()
    }
}

/// Cut `text` to `max_chars` characters, appending [`TRUNCATION_MARKER`] when
/// anything was removed.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::NewNode;
    use crate::test_support::{ScriptedGenerator, line_value};

    struct Tree {
        graph: TaskGraph,
        root: NodeId,
        group: NodeId,
        flight: NodeId,
        hotel: NodeId,
    }

    /// root -> Logistics -> {Book hotel (depends on Book flight), Book flight (external)}
    fn tree() -> Tree {
        let mut graph = TaskGraph::new();
        let root = graph
            .create(NewNode::new("Plan a trip", "Plan a trip to Japan", "Itinerary"))
            .expect("root");
        let area = Some("Logistics".to_string());
        let group = graph
            .create(
                NewNode::new("Logistics", "Bookings", "")
                    .with_parent(root)
                    .with_area(area.clone()),
            )
            .expect("group");
        let hotel = graph
            .create(
                NewNode::new("Book hotel", "Near the station", "Reservation")
                    .with_parent(group)
                    .with_area(area.clone()),
            )
            .expect("hotel");
        let flight = graph
            .create(
                NewNode::new("Book flight", "", "")
                    .with_parent(group)
                    .with_area(area)
                    .with_execution_type(ExecutionType::External),
            )
            .expect("flight");
        graph.add_dependency(hotel, flight).expect("dep");
        Tree {
            graph,
            root,
            group,
            flight,
            hotel,
        }
    }

    fn echo_title(request: &GenerationRequest) -> Result<String> {
        let title = line_value(&request.user, "Task title:").unwrap_or("?");
        Ok(format!("done: {title}"))
    }

    #[test]
    fn aggregates_structure_and_generates_below_depth_two() {
        let mut t = tree();
        let generator = ScriptedGenerator::new(echo_title);

        let records = PostOrderExecutor::new(&PlannerConfig::default())
            .run(&generator, &mut t.graph)
            .expect("run");

        // External nodes never reach the generator.
        assert_eq!(generator.count(Purpose::Execute), 1);
        // Dependency first, even though it was created second.
        let order: Vec<NodeId> = records.iter().map(|r| r.node_id).collect();
        assert_eq!(order, vec![t.flight, t.hotel]);

        let flight = t.graph.node(t.flight).expect("flight");
        assert_eq!(
            flight.result,
            Some(NodeResult::Text("[Simulated result for: Book flight]".to_string()))
        );
        assert!(flight.prompt.is_some());

        let hotel = t.graph.node(t.hotel).expect("hotel");
        assert_eq!(hotel.result, Some(NodeResult::Text("done: Book hotel".to_string())));
        let user = &hotel.prompt.as_ref().expect("prompt").user;
        assert!(user.contains("Group: Logistics"));
        assert!(user.contains("[Simulated result for: Book flight]"));

        let group = t.graph.node(t.group).expect("group");
        assert!(group.prompt.is_none());
        let Some(NodeResult::Aggregate(map)) = &group.result else {
            panic!("group should aggregate");
        };
        assert_eq!(map.len(), 2);
        assert_eq!(map.keys().collect::<Vec<_>>(), ["Book hotel", "Book flight"]);
        assert_eq!(map["Book hotel"], Some(NodeResult::Text("done: Book hotel".to_string())));

        let Some(NodeResult::Aggregate(root_map)) = &t.graph.node(t.root).expect("root").result
        else {
            panic!("root should aggregate");
        };
        assert_eq!(root_map["Logistics"], group.result);
        assert!(t.graph.iter().all(|node| node.status == Status::Done));
    }

    #[test]
    fn failures_become_error_sentinel_after_retries() {
        let mut t = tree();
        let generator =
            ScriptedGenerator::new(|_: &GenerationRequest| -> Result<String> { Err(anyhow!("backend down")) });
        let config = PlannerConfig {
            generation_retries: 2,
            ..PlannerConfig::default()
        };

        PostOrderExecutor::new(&config)
            .run(&generator, &mut t.graph)
            .expect("run");

        assert_eq!(generator.count(Purpose::Execute), 3);
        let hotel = t.graph.node(t.hotel).expect("hotel");
        let text = hotel.result.as_ref().and_then(NodeResult::as_text).expect("text");
        assert!(text.starts_with(GENERATION_ERROR_PREFIX));
        assert!(text.contains("backend down"));
    }

    #[test]
    fn deeper_nodes_see_truncated_child_previews() {
        let mut t = tree();
        let area = Some("Logistics".to_string());
        let mut kids = Vec::new();
        for i in 0..4 {
            kids.push(
                t.graph
                    .create(
                        NewNode::new(format!("Step {i}"), "", "")
                            .with_parent(t.hotel)
                            .with_area(area.clone()),
                    )
                    .expect("kid"),
            );
        }
        let generator = ScriptedGenerator::new(|request: &GenerationRequest| {
            match line_value(&request.user, "Task title:") {
                Some(title) if title.starts_with("Step") => Ok("x".repeat(50)),
                _ => Ok("ok".to_string()),
            }
        });
        let config = PlannerConfig {
            max_dependency_chars: 10,
            max_child_previews: 3,
            ..PlannerConfig::default()
        };

        PostOrderExecutor::new(&config)
            .run(&generator, &mut t.graph)
            .expect("run");

        let user = &t.graph.node(t.hotel).expect("hotel").prompt.as_ref().expect("prompt").user;
        assert_eq!(user.matches("<subtask title=").count(), 3);
        assert!(user.contains(&format!("{}{TRUNCATION_MARKER}", "x".repeat(10))));
        assert!(!user.contains("Step 3"));
        assert_eq!(
            t.graph.node(kids[3]).expect("kid").result,
            Some(NodeResult::Text("x".repeat(50)))
        );
    }

    #[test]
    fn childless_structural_node_has_no_result() {
        let mut graph = TaskGraph::new();
        let root = graph.create(NewNode::new("Solo", "", "")).expect("root");
        let generator = ScriptedGenerator::new(echo_title);

        let records = PostOrderExecutor::new(&PlannerConfig::default())
            .run(&generator, &mut graph)
            .expect("run");

        assert!(records.is_empty());
        assert!(generator.calls().is_empty());
        assert!(graph.node(root).expect("root").result.is_none());
    }

    #[test]
    fn childless_group_appears_in_parent_aggregate_as_none() {
        let mut t = tree();
        t.graph
            .create(
                NewNode::new("Activities", "Things to do", "")
                    .with_parent(t.root)
                    .with_area(Some("Activities".to_string())),
            )
            .expect("activities");
        let generator = ScriptedGenerator::new(echo_title);

        PostOrderExecutor::new(&PlannerConfig::default())
            .run(&generator, &mut t.graph)
            .expect("run");

        let Some(NodeResult::Aggregate(root_map)) = &t.graph.node(t.root).expect("root").result
        else {
            panic!("root should aggregate");
        };
        assert_eq!(root_map.keys().collect::<Vec<_>>(), ["Logistics", "Activities"]);
        assert_eq!(root_map["Activities"], None);
    }

    #[test]
    fn dependency_in_a_later_group_runs_first() {
        let mut t = tree();
        let area = Some("Schedule".to_string());
        let schedule = t
            .graph
            .create(
                NewNode::new("Schedule", "Dates", "")
                    .with_parent(t.root)
                    .with_area(area.clone()),
            )
            .expect("schedule");
        let dates = t
            .graph
            .create(
                NewNode::new("Pick dates", "", "Dates")
                    .with_parent(schedule)
                    .with_area(area),
            )
            .expect("dates");
        // Logistics was created first, yet its hotel step needs the dates.
        t.graph.add_dependency(t.hotel, dates).expect("dep");
        let generator = ScriptedGenerator::new(echo_title);

        let records = PostOrderExecutor::new(&PlannerConfig::default())
            .run(&generator, &mut t.graph)
            .expect("run");

        let order: Vec<NodeId> = records.iter().map(|r| r.node_id).collect();
        assert_eq!(order, vec![dates, t.flight, t.hotel]);
        let user = &t.graph.node(t.hotel).expect("hotel").prompt.as_ref().expect("prompt").user;
        assert!(user.contains("<dependency title=\"Pick dates\">"));
        assert!(user.contains("done: Pick dates"));

        let Some(NodeResult::Aggregate(root_map)) = &t.graph.node(t.root).expect("root").result
        else {
            panic!("root should aggregate");
        };
        assert_eq!(root_map.keys().collect::<Vec<_>>(), ["Logistics", "Schedule"]);
    }

    #[test]
    fn status_is_done_after_execution() {
        let mut t = tree();
        let generator = ScriptedGenerator::new(|request: &GenerationRequest| {
            assert_eq!(request.purpose, Purpose::Execute);
            Ok("ok".to_string())
        });
        assert!(t.graph.iter().all(|node| node.status == Status::Pending));

        PostOrderExecutor::new(&PlannerConfig::default())
            .run(&generator, &mut t.graph)
            .expect("run");
        assert!(t.graph.iter().all(|node| node.status == Status::Done));
    }

    #[test]
    fn aggregate_children_are_summarized_in_previews() {
        let executor = PostOrderExecutor::new(&PlannerConfig::default());
        let nested = NodeResult::Aggregate(IndexMap::from([
            ("a".to_string(), Some(NodeResult::Text("1".to_string()))),
            ("b".to_string(), None),
        ]));
        assert_eq!(
            executor.preview(&nested),
            "[Has 2 subtasks. See details in their own context.]"
        );
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo", 5), "héllo");
        assert_eq!(truncate_chars("héllo", 2), format!("hé{TRUNCATION_MARKER}"));
        assert_eq!(external_placeholder("Pack", "Packed bag"), "Packed bag");
    }
}
