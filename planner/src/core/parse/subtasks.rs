//! Parser for the per-group subtask plan.
//!
//! Expected shape:
//!
//! ```text
//! ### AREA ###
//! <area name>
//! ### SUBTASKS ###
//! Subtask:
//! Title: <text>
//! Description: <text>
//! Expected_output: <text>
//! Execution_type: generate|external
//! Dependencies: <title>, <title> | none
//! ```

use std::sync::LazyLock;

use regex::Regex;

use super::{RawDescriptor, TaskDescriptor, subtask_blocks};
use crate::core::error::ParseError;

/// Subtasks proposed for one functional group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtaskPlan {
    /// Area name echoed by the generator; informational only.
    pub area: String,
    pub subtasks: Vec<TaskDescriptor>,
    /// Blocks dropped because a required field was missing.
    pub skipped: usize,
}

static SUBTASKS_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)###\s*SUBTASKS\s*###").unwrap());

/// Parse a subtask plan.
///
/// A block missing any of `Title`, `Description`, `Expected_output` or
/// `Dependencies` is skipped and counted in [`SubtaskPlan::skipped`].
pub fn parse_subtask_plan(text: &str) -> Result<SubtaskPlan, ParseError> {
    let (header, body) = SUBTASKS_MARKER
        .find(text)
        .map(|m| (&text[..m.start()], &text[m.end()..]))
        .ok_or(ParseError::MissingSection("SUBTASKS"))?;

    let area = header
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("###"))
        .unwrap_or_default()
        .to_string();

    let mut plan = SubtaskPlan {
        area,
        ..SubtaskPlan::default()
    };
    for block in subtask_blocks(body) {
        if block.trim().is_empty() {
            continue;
        }
        let raw = RawDescriptor::from_block(block);
        if !raw.is_complete() {
            plan.skipped += 1;
            continue;
        }
        if let Some(descriptor) = raw.into_descriptor() {
            plan.subtasks.push(descriptor);
        }
    }

    if plan.subtasks.is_empty() {
        return Err(ParseError::NoRecords);
    }
    Ok(plan)
}
