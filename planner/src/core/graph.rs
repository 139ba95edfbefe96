//! In-memory task graph: node identity, parent/child adjacency and dependency
//! edges for one planning session.
//!
//! The store owns every node. Parents reference children by id and children
//! reference their parent by id, so there is exactly one owner per node and no
//! reference cycle between the two directions.

use std::collections::{HashMap, HashSet};

use crate::core::error::GraphError;
use crate::core::ordering::dependency_order;
use crate::core::types::{ExecutionType, NodeId, NodeResult, Prompt, Status};

/// One unit of work in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    pub description: String,
    pub expected_output: String,
    /// Functional group label, copied to every descendant of the group.
    pub area: Option<String>,
    pub responsibilities: Vec<String>,
    /// Decomposition rationale (root only).
    pub intro: Option<String>,
    pub execution_type: ExecutionType,
    pub status: Status,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Insertion-ordered, duplicate-free.
    pub dependencies: Vec<NodeId>,
    pub prompt: Option<Prompt>,
    pub result: Option<NodeResult>,
}

/// Creation parameters for [`TaskGraph::create`].
///
/// Nothing is inherited from the parent implicitly; callers pass `area` and
/// `execution_type` explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewNode {
    pub title: String,
    pub description: String,
    pub expected_output: String,
    pub area: Option<String>,
    pub parent: Option<NodeId>,
    pub execution_type: ExecutionType,
    pub responsibilities: Vec<String>,
}

impl NewNode {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_area(mut self, area: Option<String>) -> Self {
        self.area = area;
        self
    }

    pub fn with_execution_type(mut self, execution_type: ExecutionType) -> Self {
        self.execution_type = execution_type;
        self
    }

    pub fn with_responsibilities(mut self, responsibilities: Vec<String>) -> Self {
        self.responsibilities = responsibilities;
        self
    }
}

/// Id-keyed node store with O(1) lookup and O(children) child queries.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: HashMap<NodeId, Node>,
    /// Creation order, for deterministic iteration.
    order: Vec<NodeId>,
    root: Option<NodeId>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a node. Without a parent it becomes the root; with a parent it
    /// is appended to the parent's children.
    pub fn create(&mut self, spec: NewNode) -> Result<NodeId, GraphError> {
        if spec.title.trim().is_empty() {
            return Err(GraphError::EmptyTitle);
        }
        match spec.parent {
            None if self.root.is_some() => return Err(GraphError::RootExists),
            Some(parent) if !self.nodes.contains_key(&parent) => {
                return Err(GraphError::UnknownNode(parent));
            }
            _ => {}
        }

        let id = NodeId::fresh();
        let node = Node {
            id,
            title: spec.title,
            description: spec.description,
            expected_output: spec.expected_output,
            area: spec.area,
            responsibilities: spec.responsibilities,
            intro: None,
            execution_type: spec.execution_type,
            status: Status::Pending,
            parent: spec.parent,
            children: Vec::new(),
            dependencies: Vec::new(),
            prompt: None,
            result: None,
        };
        match spec.parent {
            Some(parent) => self.node_mut(parent)?.children.push(id),
            None => self.root = Some(id),
        }
        self.nodes.insert(id, node);
        self.order.push(id);
        Ok(id)
    }

    /// Record that `from` depends on `to`.
    ///
    /// Rejected with [`GraphError::Cycle`] when `to` already depends on `from`
    /// (directly or transitively) or when `from == to`. Re-adding an existing
    /// edge is a no-op.
    pub fn add_dependency(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.node(to)?;
        if from == to || self.depends_on(to, from) {
            return Err(GraphError::Cycle { from, to });
        }
        let node = self.node_mut(from)?;
        if !node.dependencies.contains(&to) {
            node.dependencies.push(to);
        }
        Ok(())
    }

    /// True if `node` transitively depends on `target`.
    pub fn depends_on(&self, node: NodeId, target: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(entry) = self.nodes.get(&current) else {
                continue;
            };
            for &dep in &entry.dependencies {
                if dep == target {
                    return true;
                }
                stack.push(dep);
            }
        }
        false
    }

    /// All nodes, each after its dependencies.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        dependency_order(&self.order, |id| self.dependencies(id).to_vec())
            .map_err(|(from, to)| GraphError::Cycle { from, to })
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Like [`TaskGraph::get`] but reports unknown ids as [`GraphError::UnknownNode`].
    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Direct children in creation order; empty for unknown ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    /// Declared dependencies; empty for unknown ids.
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|node| node.dependencies.as_slice())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|node| node.parent)
    }

    /// Number of ancestors: root is 0, functional groups are 1.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(parent) = current {
            depth += 1;
            current = self.parent(parent);
        }
        depth
    }

    /// The depth-1 ancestor of `id` (or `id` itself at depth 1).
    pub fn functional_group(&self, id: NodeId) -> Option<NodeId> {
        let root = self.root?;
        let mut current = id;
        loop {
            let parent = self.parent(current)?;
            if parent == root {
                return Some(current);
            }
            current = parent;
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Node ids in creation order.
    pub fn ids(&self) -> &[NodeId] {
        &self.order
    }

    /// Nodes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub(crate) fn set_intro(&mut self, id: NodeId, intro: String) -> Result<(), GraphError> {
        self.node_mut(id)?.intro = Some(intro);
        Ok(())
    }

    pub(crate) fn set_prompt(&mut self, id: NodeId, prompt: Prompt) -> Result<(), GraphError> {
        self.node_mut(id)?.prompt = Some(prompt);
        Ok(())
    }

    pub(crate) fn set_result(&mut self, id: NodeId, result: NodeResult) -> Result<(), GraphError> {
        self.node_mut(id)?.result = Some(result);
        Ok(())
    }

    pub(crate) fn set_status(&mut self, id: NodeId, status: Status) -> Result<(), GraphError> {
        self.node_mut(id)?.status = status;
        Ok(())
    }

    /// Check structural invariants:
    /// - exactly one parentless node, and it is the recorded root
    /// - every child lists its parent, and appears in exactly one children list
    /// - no node is its own ancestor
    /// - descendants of a functional group carry the group's `area`
    /// - dependencies reference existing nodes
    pub fn check_invariants(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let parentless: Vec<NodeId> = self
            .iter()
            .filter(|node| node.parent.is_none())
            .map(|node| node.id)
            .collect();
        match parentless.as_slice() {
            [only] if Some(*only) == self.root => {}
            [] if self.is_empty() => {}
            _ => errors.push(format!(
                "expected exactly one root, found {} parentless nodes",
                parentless.len()
            )),
        }

        let mut owners: HashMap<NodeId, usize> = HashMap::new();
        for node in self.iter() {
            for &child in &node.children {
                *owners.entry(child).or_default() += 1;
                match self.nodes.get(&child) {
                    Some(entry) if entry.parent == Some(node.id) => {}
                    Some(_) => errors.push(format!("{child}: parent does not list it as a child")),
                    None => errors.push(format!("{}: unknown child {child}", node.id)),
                }
            }
            for &dep in &node.dependencies {
                if !self.nodes.contains_key(&dep) {
                    errors.push(format!("{}: unknown dependency {dep}", node.id));
                }
            }
        }

        for node in self.iter() {
            if node.parent.is_some() && owners.get(&node.id).copied().unwrap_or(0) != 1 {
                errors.push(format!("{}: must appear in exactly one children list", node.id));
            }
            if self.has_ancestor_cycle(node.id) {
                errors.push(format!("{}: node is its own ancestor", node.id));
                continue;
            }
            if self.depth(node.id) >= 2
                && let Some(group) = self.functional_group(node.id).and_then(|g| self.get(g))
                && group.area != node.area
            {
                errors.push(format!(
                    "{}: area {:?} differs from functional group area {:?}",
                    node.id, node.area, group.area
                ));
            }
        }

        errors
    }

    fn has_ancestor_cycle(&self, id: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if !seen.insert(node) {
                return true;
            }
            current = self.parent(node);
        }
        false
    }
}
