//! Pure parsers for structured generator responses.
//!
//! Each parser maps response text to `Result<T, ParseError>`. Callers pick the
//! degenerate fallback on error; nothing here panics or logs.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::ExecutionType;

pub mod decomposition;
pub mod refinement;
pub mod subtasks;

pub use decomposition::{AreaDescriptor, Decomposition, parse_decomposition};
pub use refinement::{Refinement, parse_refinement};
pub use subtasks::{SubtaskPlan, parse_subtask_plan};

/// One child task proposed by the planner or the refiner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub title: String,
    pub description: String,
    pub expected_output: String,
    pub execution_type: ExecutionType,
    /// Sibling titles, exactly as written by the generator.
    pub dependencies: Vec<String>,
}

/// Known `Key: value` fields inside a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Area,
    Title,
    Description,
    ExpectedOutput,
    ExecutionType,
    Dependencies,
}

/// Split a `Key: value` line into a known field and its trimmed value.
///
/// Keys are matched case-insensitively, with spaces and underscores treated
/// alike (`Expected output:` == `Expected_output:`). Leading list markers are
/// ignored.
fn split_field(line: &str) -> Option<(Field, &str)> {
    let line = line.trim().trim_start_matches(['-', '*']).trim_start();
    let (key, value) = line.split_once(':')?;
    let key = key.trim().to_ascii_lowercase().replace(' ', "_");
    let field = match key.as_str() {
        "area" => Field::Area,
        "title" => Field::Title,
        "description" => Field::Description,
        "expected_output" => Field::ExpectedOutput,
        "execution_type" => Field::ExecutionType,
        "dependencies" => Field::Dependencies,
        _ => return None,
    };
    Some((field, value.trim()))
}

/// Parse a `Dependencies:` value. `none` (any case) or an empty value means no
/// dependencies.
fn parse_dependency_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|title| !title.is_empty() && !title.eq_ignore_ascii_case("none"))
        .map(str::to_string)
        .collect()
}

/// Split `block` into the bodies that follow each `Subtask:` marker.
fn subtask_blocks(block: &str) -> Vec<&str> {
    static SUBTASK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?im)^[ \t]*(?:\d+\.[ \t]*)?subtask[ \t]*\d*[ \t]*:").unwrap());
    split_on_markers(&SUBTASK_RE, block)
}

/// Bodies between successive matches of `marker`. Text before the first marker
/// is dropped.
fn split_on_markers<'a>(marker: &Regex, text: &'a str) -> Vec<&'a str> {
    let starts: Vec<(usize, usize)> = marker
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &(_, body_start))| {
            let body_end = starts.get(i + 1).map_or(text.len(), |&(next, _)| next);
            &text[body_start..body_end]
        })
        .collect()
}

/// Fields collected from one `Subtask:` block. `None` marks a missing field.
#[derive(Debug, Default)]
struct RawDescriptor {
    title: Option<String>,
    description: Option<String>,
    expected_output: Option<String>,
    execution_type: Option<String>,
    dependencies: Option<String>,
}

impl RawDescriptor {
    fn from_block(block: &str) -> Self {
        let mut raw = Self::default();
        let mut lines = block.lines();
        // `Subtask: Title text` puts the title on the marker line itself.
        if let Some(first) = lines.next() {
            let first = first.trim();
            match split_field(first) {
                Some((field, value)) => raw.set(field, value),
                None if !first.is_empty() => raw.title = Some(first.to_string()),
                None => {}
            }
        }
        for line in lines {
            if let Some((field, value)) = split_field(line) {
                raw.set(field, value);
            }
        }
        raw
    }

    /// First occurrence wins, so a stray repeated key in free text cannot
    /// overwrite a real field.
    fn set(&mut self, field: Field, value: &str) {
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Description => &mut self.description,
            Field::ExpectedOutput => &mut self.expected_output,
            Field::ExecutionType => &mut self.execution_type,
            Field::Dependencies => &mut self.dependencies,
            Field::Area => return,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }

    fn into_descriptor(self) -> Option<TaskDescriptor> {
        let title = self.title.filter(|t| !t.is_empty())?;
        Some(TaskDescriptor {
            title,
            description: self.description.unwrap_or_default(),
            expected_output: self.expected_output.unwrap_or_default(),
            execution_type: self
                .execution_type
                .as_deref()
                .map(ExecutionType::from_label)
                .unwrap_or_default(),
            dependencies: self
                .dependencies
                .as_deref()
                .map(parse_dependency_list)
                .unwrap_or_default(),
        })
    }

    fn is_complete(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.is_empty())
            && self.description.is_some()
            && self.expected_output.is_some()
            && self.dependencies.is_some()
    }
}
