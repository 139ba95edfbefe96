//! Parser for the area decomposition response.
//!
//! Expected shape:
//!
//! ```text
//! ### INTRODUCTION ###
//! <rationale>
//! ### SUBTASKS ###
//! 1. Area: <name>
//! Description: <text>
//! Expected_output: <text>
//! - <responsibility>
//! ```

use std::sync::LazyLock;

use regex::Regex;

use super::{Field, split_field, split_on_markers};
use crate::core::error::ParseError;
use crate::core::types::ExecutionType;

/// One functional group proposed for the root objective.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AreaDescriptor {
    pub area: String,
    pub description: String,
    pub expected_output: String,
    pub execution_type: ExecutionType,
    pub responsibilities: Vec<String>,
    /// Unparsed response text; only set on the degenerate fallback group.
    pub raw: Option<String>,
}

/// Rationale plus ordered functional groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decomposition {
    pub intro: String,
    pub areas: Vec<AreaDescriptor>,
}

impl Decomposition {
    /// Fallback for unparseable text: empty rationale and a single group that
    /// carries the raw response.
    pub fn degenerate(text: &str) -> Self {
        Self {
            intro: String::new(),
            areas: vec![AreaDescriptor {
                raw: Some(text.trim().to_string()),
                ..AreaDescriptor::default()
            }],
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.areas.iter().any(|area| area.raw.is_some())
    }
}

static SUBTASKS_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)###\s*SUBTASKS\s*###").unwrap());
static INTRO_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)###\s*INTRODUCTION\s*###").unwrap());
static AREA_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*(?:\d+\.[ \t]*)?(?:\*\*)?area(?:\*\*)?[ \t]*:").unwrap());

/// Parse a decomposition. Groups missing a name or description are dropped;
/// zero remaining groups is [`ParseError::NoRecords`].
pub fn parse_decomposition(text: &str) -> Result<Decomposition, ParseError> {
    let (intro_block, groups_block) = SUBTASKS_MARKER
        .find(text)
        .map(|m| (&text[..m.start()], &text[m.end()..]))
        .ok_or(ParseError::MissingSection("SUBTASKS"))?;

    let intro = INTRO_MARKER.replace(intro_block, "").trim().to_string();

    let areas: Vec<AreaDescriptor> = split_on_markers(&AREA_MARKER, groups_block)
        .into_iter()
        .filter_map(parse_area_block)
        .collect();
    if areas.is_empty() {
        return Err(ParseError::NoRecords);
    }

    Ok(Decomposition { intro, areas })
}

fn parse_area_block(block: &str) -> Option<AreaDescriptor> {
    let mut lines = block.lines();
    let mut area = AreaDescriptor {
        area: lines.next().unwrap_or_default().trim().to_string(),
        ..AreaDescriptor::default()
    };

    for line in lines {
        let line = line.trim();
        if let Some(bullet) = line.strip_prefix(['-', '*', '•']) {
            let bullet = bullet.trim();
            if !bullet.is_empty() {
                area.responsibilities.push(bullet.to_string());
            }
            continue;
        }
        match split_field(line) {
            Some((Field::Description, value)) => area.description = value.to_string(),
            Some((Field::ExpectedOutput, value)) => area.expected_output = value.to_string(),
            Some((Field::ExecutionType, value)) => {
                area.execution_type = ExecutionType::from_label(value);
            }
            _ => {}
        }
    }

    (!area.area.is_empty() && !area.description.is_empty()).then_some(area)
}
