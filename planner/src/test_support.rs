//! Test-only generators and canned response builders.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, anyhow};

use crate::io::generator::{GenerationRequest, Generator, Purpose};

/// Generator that answers with a closure and records every request.
pub struct ScriptedGenerator<F> {
    responder: F,
    calls: RefCell<Vec<GenerationRequest>>,
}

impl<F> ScriptedGenerator<F>
where
    F: Fn(&GenerationRequest) -> Result<String>,
{
    pub fn new(responder: F) -> Self {
        Self {
            responder,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// All requests seen so far, in call order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, purpose: Purpose) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|request| request.purpose == purpose)
            .count()
    }
}

impl<F> Generator for ScriptedGenerator<F>
where
    F: Fn(&GenerationRequest) -> Result<String>,
{
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.borrow_mut().push(request.clone());
        (self.responder)(request)
    }
}

/// Generator that pops queued responses in order and fails once empty.
#[derive(Default)]
pub struct QueuedGenerator {
    responses: RefCell<VecDeque<Result<String, String>>>,
    calls: RefCell<Vec<GenerationRequest>>,
}

impl QueuedGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Queue a failure with the given message.
    pub fn push_error(&self, message: &str) {
        self.responses.borrow_mut().push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.borrow().clone()
    }
}

impl Generator for QueuedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.borrow_mut().push(request.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted response left")),
        }
    }
}

/// Value after `label` on the first line of `text` that starts with it.
pub fn line_value<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix(label))
        .map(str::trim)
}

/// Functional group for [`decomposition_text`].
pub struct AreaSpec<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub expected_output: &'a str,
    pub responsibilities: &'a [&'a str],
}

/// Well-formed decomposition response.
pub fn decomposition_text(intro: &str, areas: &[AreaSpec<'_>]) -> String {
    let mut out = format!("### INTRODUCTION ###\n{intro}\n### SUBTASKS ###\n");
    for (i, area) in areas.iter().enumerate() {
        out.push_str(&format!(
            "{}. Area: {}\nDescription: {}\nExpected_output: {}\n",
            i + 1,
            area.name,
            area.description,
            area.expected_output
        ));
        for item in area.responsibilities {
            out.push_str(&format!("- {item}\n"));
        }
    }
    out
}

/// Subtask for [`subtask_plan_text`] and [`refinement_split_text`].
pub struct SubtaskSpec<'a> {
    pub title: &'a str,
    pub execution_type: &'a str,
    pub dependencies: &'a [&'a str],
}

impl<'a> SubtaskSpec<'a> {
    pub fn new(title: &'a str, dependencies: &'a [&'a str]) -> Self {
        Self {
            title,
            execution_type: "generate",
            dependencies,
        }
    }

    pub fn external(title: &'a str, dependencies: &'a [&'a str]) -> Self {
        Self {
            execution_type: "external",
            ..Self::new(title, dependencies)
        }
    }
}

fn subtask_blocks(subtasks: &[SubtaskSpec<'_>]) -> String {
    let mut out = String::new();
    for subtask in subtasks {
        let deps = if subtask.dependencies.is_empty() {
            "none".to_string()
        } else {
            subtask.dependencies.join(", ")
        };
        out.push_str(&format!(
            "Subtask:\nTitle: {title}\nDescription: Do {title}\nExpected_output: {title} done\nExecution_type: {}\nDependencies: {deps}\n",
            subtask.execution_type,
            title = subtask.title,
        ));
    }
    out
}

/// Well-formed subtask plan response for one area.
pub fn subtask_plan_text(area: &str, subtasks: &[SubtaskSpec<'_>]) -> String {
    format!(
        "### AREA ###\n{area}\n### SUBTASKS ###\n{}",
        subtask_blocks(subtasks)
    )
}

/// Refinement response that keeps the task as is.
pub fn refinement_keep_text(title: &str) -> String {
    format!("### ORIGINAL ###\n{title}\n### REFINED ###\nNO_REFINEMENT\n")
}

/// Refinement response that splits the task.
pub fn refinement_split_text(title: &str, children: &[SubtaskSpec<'_>]) -> String {
    format!(
        "### ORIGINAL ###\n{title}\n### REFINED ###\n{}",
        subtask_blocks(children)
    )
}
