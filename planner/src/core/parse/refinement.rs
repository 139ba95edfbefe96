//! Parser for the refinement decision.
//!
//! Expected shape:
//!
//! ```text
//! ### ORIGINAL ###
//! <title of the evaluated task>
//! ### REFINED ###
//! NO_REFINEMENT
//! ```
//!
//! or a `### REFINED ###` section holding `Subtask:` blocks.

use std::sync::LazyLock;

use regex::Regex;

use super::{RawDescriptor, TaskDescriptor, subtask_blocks};
use crate::core::error::ParseError;

/// Sentinel meaning the evaluated task is fine-grained enough.
pub const NO_REFINEMENT: &str = "NO_REFINEMENT";

/// Decision returned by the refiner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refinement {
    /// Keep the task as a leaf of the refinement process.
    Keep,
    /// Expand the task into these children.
    Split(Vec<TaskDescriptor>),
}

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"###\s*([A-Za-z_ ]+?)\s*###").unwrap());

/// Parse a refinement decision.
///
/// An empty `REFINED` section, `none`, or [`NO_REFINEMENT`] is
/// [`Refinement::Keep`]. A bare [`NO_REFINEMENT`] response without headers is
/// accepted too. `Subtask:` blocks without a title are skipped; if none
/// remain the response is [`ParseError::NoRecords`].
pub fn parse_refinement(text: &str) -> Result<Refinement, ParseError> {
    let trimmed = text.trim();
    if is_keep_sentinel(trimmed) {
        return Ok(Refinement::Keep);
    }

    let refined = section(trimmed, "REFINED").ok_or(ParseError::MissingSection("REFINED"))?;
    if is_keep_sentinel(refined) {
        return Ok(Refinement::Keep);
    }

    let children: Vec<TaskDescriptor> = subtask_blocks(refined)
        .into_iter()
        .filter_map(|block| RawDescriptor::from_block(block).into_descriptor())
        .collect();
    if children.is_empty() {
        return Err(ParseError::NoRecords);
    }
    Ok(Refinement::Split(children))
}

fn is_keep_sentinel(body: &str) -> bool {
    let body = body.trim();
    body.is_empty() || body.eq_ignore_ascii_case(NO_REFINEMENT) || body.eq_ignore_ascii_case("none")
}

/// Body of the `### NAME ###` section, up to the next header.
fn section<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let headers: Vec<_> = HEADER_RE.captures_iter(text).collect();
    headers.iter().enumerate().find_map(|(i, caps)| {
        let title = caps.get(1)?.as_str();
        if !title.trim().eq_ignore_ascii_case(name) {
            return None;
        }
        let start = caps.get(0)?.end();
        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        Some(text[start..end].trim())
    })
}
