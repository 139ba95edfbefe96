//! Prompt rendering for every generator call.
//!
//! Each purpose has a fixed system template and a user template split into
//! sections with `<!-- section:KEY required|droppable -->` markers. When the
//! rendered user prompt exceeds the byte budget, droppable sections go first
//! in a per-purpose order; after that the last section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::Prompt;

const TEMPLATES: [(&str, &str); 8] = [
    (
        "decomposer.system.md",
        include_str!("prompts/decomposer.system.md"),
    ),
    (
        "decomposer.user.md",
        include_str!("prompts/decomposer.user.md"),
    ),
    ("planner.system.md", include_str!("prompts/planner.system.md")),
    ("planner.user.md", include_str!("prompts/planner.user.md")),
    ("refiner.system.md", include_str!("prompts/refiner.system.md")),
    ("refiner.user.md", include_str!("prompts/refiner.user.md")),
    (
        "executor.system.md",
        include_str!("prompts/executor.system.md"),
    ),
    ("executor.user.md", include_str!("prompts/executor.user.md")),
];

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        env.add_template(name, source)
            .expect("prompt template should be valid");
    }
    env
});

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

const TRUNCATED_MARKER: &str = "\n[truncated]";

/// Inputs for the area decomposition prompt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DecomposerInputs {
    pub objective: String,
    pub expected_output: String,
}

/// Inputs for planning the subtasks of one functional area.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlannerInputs {
    pub objective: String,
    pub area_name: String,
    pub area_description: String,
    pub area_expected_output: String,
    pub responsibilities: Vec<String>,
    pub all_areas: Vec<String>,
    /// `- Group: a, b` lines for areas planned earlier, or `None`.
    pub other_areas: String,
}

/// Inputs for evaluating one task for refinement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefinerInputs {
    pub objective: String,
    pub area_name: Option<String>,
    pub area_description: Option<String>,
    pub title: String,
    pub description: String,
    pub expected_output: String,
    /// Titles of the task's own declared dependencies.
    pub dependencies: Vec<String>,
    pub parent_title: Option<String>,
    pub parent_description: String,
    pub parent_expected_output: String,
    pub parent_dependencies: Vec<String>,
    /// Zero-based depth relative to where refinement started.
    pub depth: usize,
    pub max_depth: usize,
}

/// Title and (already truncated) result of a related node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultContext {
    pub title: String,
    pub result: String,
}

/// Functional group shown to nodes below depth 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupContext {
    pub title: String,
    pub description: String,
}

/// Inputs for generating one node's result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorInputs {
    pub project_title: String,
    pub group: Option<GroupContext>,
    pub title: String,
    pub description: String,
    pub expected_output: String,
    pub dependencies: Vec<ResultContext>,
    pub children: Vec<ResultContext>,
}

/// Renders system/user prompt pairs within a byte budget for the user part.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_decomposer(&self, input: &DecomposerInputs) -> Result<Prompt> {
        self.build("decomposer", input, &[])
    }

    pub fn build_planner(&self, input: &PlannerInputs) -> Result<Prompt> {
        self.build("planner", input, &["areas", "other_areas"])
    }

    pub fn build_refiner(&self, input: &RefinerInputs) -> Result<Prompt> {
        self.build("refiner", input, &["parent"])
    }

    pub fn build_executor(&self, input: &ExecutorInputs) -> Result<Prompt> {
        self.build("executor", input, &["children", "group", "dependencies"])
    }

    fn build<S: Serialize>(&self, kind: &str, input: &S, drop_order: &[&str]) -> Result<Prompt> {
        let system = render(&format!("{kind}.system.md"), input)?;
        let user = render(&format!("{kind}.user.md"), input)?;

        let mut sections = parse_sections(&user);
        apply_budget_to_sections(&mut sections, self.budget_bytes, drop_order);

        Ok(Prompt {
            system: system.trim().to_string(),
            user: render_sections(&sections),
        })
    }
}

fn render<S: Serialize>(name: &str, input: &S) -> Result<String> {
    let template = ENGINE
        .get_template(name)
        .with_context(|| format!("load template {name}"))?;
    template
        .render(input)
        .with_context(|| format!("render template {name}"))
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section content without the marker.
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(matches.len());

    for (i, caps) in matches.iter().enumerate() {
        let (Some(marker), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let required = kind.as_str() == "required";
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());

        let content = rendered[marker.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize, drop_order: &[&str]) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in drop_order {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            let dropped = sections.remove(idx);
            debug!(
                section = key,
                bytes_dropped = dropped.content.len(),
                "dropped section for budget"
            );
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut() {
        let before_len = last.content.len();
        if allowed > TRUNCATED_MARKER.len() {
            truncate_at_boundary(&mut last.content, allowed - TRUNCATED_MARKER.len());
            last.content.push_str(TRUNCATED_MARKER);
        } else {
            truncate_at_boundary(&mut last.content, allowed);
        }
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

/// Truncate to at most `max` bytes without splitting a character.
fn truncate_at_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
