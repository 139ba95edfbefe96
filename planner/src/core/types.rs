//! Shared value types for the task graph.
//!
//! These types define stable contracts between the graph store, the agents and
//! the export layer. They hold no references into the store and serialize to
//! the exported tree record unchanged.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, immutable node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Allocate a fresh random id.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a node's own result is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
    /// The generator produces the result.
    #[default]
    Generate,
    /// A deterministic placeholder stands in for work done elsewhere.
    External,
}

impl ExecutionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionType::Generate => "generate",
            ExecutionType::External => "external",
        }
    }

    /// Lenient label parsing for generator output. Unknown labels fall back to
    /// [`ExecutionType::Generate`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "external" | "simulated" | "simulation" | "manual" => ExecutionType::External,
            _ => ExecutionType::Generate,
        }
    }
}

/// Informational progress marker. Nothing in the engine branches on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Pending,
    InProgress,
    Done,
}

/// System/user prompt pair sent to the generator for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Result attached to a node by the executor.
///
/// Generated nodes carry text; structural levels carry a mapping from each
/// child's title to its result, in child order, with `None` for a child that
/// produced nothing. Children sharing a title collapse into one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeResult {
    Text(String),
    Aggregate(IndexMap<String, Option<NodeResult>>),
}

impl NodeResult {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            NodeResult::Text(text) => Some(text),
            NodeResult::Aggregate(_) => None,
        }
    }
}

/// Audit record for one generated node, in executor traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub node_id: NodeId,
    pub prompt: Prompt,
    pub response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_type_labels_are_lenient() {
        assert_eq!(ExecutionType::from_label(" External "), ExecutionType::External);
        assert_eq!(ExecutionType::from_label("simulated"), ExecutionType::External);
        assert_eq!(ExecutionType::from_label("llm"), ExecutionType::Generate);
        assert_eq!(ExecutionType::from_label("???"), ExecutionType::Generate);
    }

    #[test]
    fn node_result_serializes_untagged() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Some(NodeResult::Text("R1".to_string())));
        map.insert("b".to_string(), None);
        let value = serde_json::to_value(NodeResult::Aggregate(map)).expect("serialize");
        assert_eq!(value, serde_json::json!({ "a": "R1", "b": null }));

        let back: NodeResult = serde_json::from_value(value).expect("deserialize");
        assert!(matches!(back, NodeResult::Aggregate(ref m) if m.len() == 2 && m["b"].is_none()));
    }

    #[test]
    fn aggregate_keeps_child_order() {
        let map = IndexMap::from([
            ("Zeta".to_string(), Some(NodeResult::Text("z".to_string()))),
            ("Alpha".to_string(), Some(NodeResult::Text("a".to_string()))),
        ]);
        let text = serde_json::to_string(&NodeResult::Aggregate(map)).expect("serialize");
        assert_eq!(text, r#"{"Zeta":"z","Alpha":"a"}"#);

        let back: NodeResult = serde_json::from_str(&text).expect("deserialize");
        let NodeResult::Aggregate(back) = back else {
            panic!("expected aggregate");
        };
        assert_eq!(back.keys().collect::<Vec<_>>(), ["Zeta", "Alpha"]);
    }

    #[test]
    fn status_uses_kebab_case() {
        let value = serde_json::to_value(Status::InProgress).expect("serialize");
        assert_eq!(value, serde_json::json!("in-progress"));
    }
}
