//! Tree-shaped JSON export of a finished task graph, with schema + invariant
//! validation on load and a plain-text outline for humans.
//!
//! An export is a snapshot. Nothing reloads it into a [`TaskGraph`].

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::graph::{Node, TaskGraph};
use crate::core::ordering::dependency_order;
use crate::core::types::{ExecutionType, NodeId, NodeResult, Prompt, Status};
use crate::io::config::write_atomic;

/// JSON Schema every exported tree must satisfy.
pub const TASK_RECORD_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/task_record/v1.schema.json"
));

/// One exported node with its subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: NodeId,
    pub title: String,
    pub description: String,
    pub expected_output: String,
    #[serde(default)]
    pub intro: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responsibilities: Vec<String>,
    pub execution_type: ExecutionType,
    pub status: Status,
    pub dependencies: Vec<NodeId>,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub prompt: Option<Prompt>,
    #[serde(default)]
    pub result: Option<NodeResult>,
    pub subtasks: Vec<TaskRecord>,
}

impl TaskRecord {
    fn from_node(graph: &TaskGraph, node: &Node) -> Self {
        Self {
            id: node.id,
            title: node.title.clone(),
            description: node.description.clone(),
            expected_output: node.expected_output.clone(),
            intro: node.intro.clone(),
            area: node.area.clone(),
            responsibilities: node.responsibilities.clone(),
            execution_type: node.execution_type,
            status: node.status,
            dependencies: node.dependencies.clone(),
            parent: node.parent,
            prompt: node.prompt.clone(),
            result: node.result.clone(),
            subtasks: node
                .children
                .iter()
                .filter_map(|&child| graph.get(child))
                .map(|child| TaskRecord::from_node(graph, child))
                .collect(),
        }
    }

    /// Pre-order walk: the record itself, then each subtree in order.
    pub fn walk(&self) -> Vec<&TaskRecord> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(record) = stack.pop() {
            out.push(record);
            stack.extend(record.subtasks.iter().rev());
        }
        out
    }
}

/// Structural problems in a loaded record tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("dependency cycle: {from} -> {to}")]
    Cycle { from: NodeId, to: NodeId },

    #[error("tree invariants failed: {0}")]
    Invariants(String),
}

/// Snapshot the graph as a nested record rooted at the graph's root.
pub fn export_tree(graph: &TaskGraph) -> Result<TaskRecord> {
    let root = graph
        .root()
        .and_then(|id| graph.get(id))
        .ok_or_else(|| anyhow!("task graph has no root"))?;
    Ok(TaskRecord::from_node(graph, root))
}

/// Write a record tree as pretty JSON (temp file + rename).
pub fn write_tree(path: &Path, record: &TaskRecord) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize task record")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Load and validate an exported tree (schema + invariants).
pub fn load_tree(path: &Path) -> Result<TaskRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read tree {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse tree {}", path.display()))?;
    validate_schema(&value)?;
    let record: TaskRecord = serde_json::from_value(value)
        .with_context(|| format!("deserialize tree {}", path.display()))?;
    validate_record(&record)?;
    Ok(record)
}

fn validate_schema(tree: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(TASK_RECORD_SCHEMA).context("parse embedded schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(tree) {
        let messages = compiled
            .iter_errors(tree)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "tree schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Check the invariants a schema cannot express.
///
/// Ids must be unique, parent links must match nesting, dependencies must
/// point inside the tree and be acyclic, and nodes below a functional group
/// must carry the group's area.
pub fn validate_record(root: &TaskRecord) -> Result<(), RecordError> {
    let mut errors = Vec::new();

    if root.parent.is_some() {
        errors.push(format!("{}: root must not have a parent", root.id));
    }

    let records = root.walk();
    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        if !seen.insert(record.id) {
            errors.push(format!("{}: duplicate id", record.id));
        }
        for child in &record.subtasks {
            if child.parent != Some(record.id) {
                errors.push(format!(
                    "{}: parent {:?} does not match enclosing node {}",
                    child.id, child.parent, record.id
                ));
            }
        }
    }
    for record in &records {
        for dep in &record.dependencies {
            if !seen.contains(dep) {
                errors.push(format!("{}: unknown dependency {dep}", record.id));
            }
        }
    }
    for group in &root.subtasks {
        for record in group.walk().into_iter().skip(1) {
            if record.area != group.area {
                errors.push(format!(
                    "{}: area {:?} differs from functional group area {:?}",
                    record.id, record.area, group.area
                ));
            }
        }
    }

    if !errors.is_empty() {
        return Err(RecordError::Invariants(errors.join("; ")));
    }

    let by_id: HashMap<NodeId, &TaskRecord> =
        records.iter().map(|record| (record.id, *record)).collect();
    let ids: Vec<NodeId> = records.iter().map(|record| record.id).collect();
    dependency_order(&ids, |id| {
        by_id
            .get(&id)
            .map(|record| record.dependencies.clone())
            .unwrap_or_default()
    })
    .map_err(|(from, to)| RecordError::Cycle { from, to })?;
    Ok(())
}

/// Indented outline: one line per node, dependencies by title, and a short
/// preview of each result.
pub fn render_outline(root: &TaskRecord) -> String {
    let titles: HashMap<NodeId, &str> = root
        .walk()
        .into_iter()
        .map(|record| (record.id, record.title.as_str()))
        .collect();
    let mut out = String::new();
    outline_into(&mut out, root, 0, &titles);
    out
}

fn outline_into(out: &mut String, record: &TaskRecord, depth: usize, titles: &HashMap<NodeId, &str>) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(
        out,
        "{indent}- {} [{}, {}]",
        record.title,
        record.execution_type.as_str(),
        status_label(record.status)
    );
    if let Some(intro) = record.intro.as_deref().filter(|s| !s.trim().is_empty()) {
        let _ = writeln!(out, "{indent}  intro: {}", first_line(intro, 100));
    }
    if !record.dependencies.is_empty() {
        let names: Vec<&str> = record
            .dependencies
            .iter()
            .map(|id| titles.get(id).copied().unwrap_or("?"))
            .collect();
        let _ = writeln!(out, "{indent}  depends on: {}", names.join(", "));
    }
    match &record.result {
        Some(NodeResult::Text(text)) => {
            let _ = writeln!(out, "{indent}  => {}", first_line(text, 100));
        }
        Some(NodeResult::Aggregate(map)) => {
            let filled = map.values().filter(|result| result.is_some()).count();
            let _ = writeln!(out, "{indent}  => {filled} of {} subtask results", map.len());
        }
        None => {}
    }
    for child in &record.subtasks {
        outline_into(out, child, depth + 1, titles);
    }
}

fn status_label(status: Status) -> &'static str {
    match status {
        Status::Pending => "pending",
        Status::InProgress => "in-progress",
        Status::Done => "done",
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.trim().lines().next().unwrap_or_default();
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
