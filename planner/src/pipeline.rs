//! Runs the phases in order over one task graph.
//!
//! Phases are single-shot: each runs once, only after its predecessor, and a
//! failed phase leaves the pipeline at the last completed one.

use std::fmt;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{info, instrument};

use crate::agents::decomposer::{AreaDecomposer, DecomposeOutcome};
use crate::agents::executor::PostOrderExecutor;
use crate::agents::planner::{PlanOutcome, SubtaskPlanner};
use crate::agents::refiner::{RecursiveRefiner, RefineOutcome};
use crate::core::error::GraphError;
use crate::core::graph::{NewNode, TaskGraph};
use crate::core::types::GenerationRecord;
use crate::io::config::PlannerConfig;
use crate::io::generator::Generator;

/// Last completed step of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Created,
    Decomposed,
    Planned,
    Refined,
    Executed,
}

impl Phase {
    pub const RUNNABLE: [Phase; 4] = [
        Phase::Decomposed,
        Phase::Planned,
        Phase::Refined,
        Phase::Executed,
    ];

    /// The phase that may run after this one.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Created => Some(Phase::Decomposed),
            Phase::Decomposed => Some(Phase::Planned),
            Phase::Planned => Some(Phase::Refined),
            Phase::Refined => Some(Phase::Executed),
            Phase::Executed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::Decomposed => "decomposed",
            Phase::Planned => "planned",
            Phase::Refined => "refined",
            Phase::Executed => "executed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase was requested before its predecessor completed, or again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot run phase {requested} after {completed}")]
pub struct PhaseOrderError {
    pub completed: Phase,
    pub requested: Phase,
}

/// What a phase did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseReport {
    Decomposed(DecomposeOutcome),
    Planned(PlanOutcome),
    /// `None` when refinement is disabled in the config.
    Refined(Option<RefineOutcome>),
    Executed { generations: usize },
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    graph: TaskGraph,
    config: PlannerConfig,
    completed: Phase,
    records: Vec<GenerationRecord>,
    degenerate_decomposition: bool,
}

impl Pipeline {
    /// Start from a graph holding only the root objective.
    pub fn new(objective: &str, expected_output: &str, config: PlannerConfig) -> Result<Self, GraphError> {
        let mut graph = TaskGraph::new();
        let objective = objective.trim();
        graph.create(NewNode::new(objective, objective, expected_output.trim()))?;
        Ok(Self {
            graph,
            config,
            completed: Phase::Created,
            records: Vec::new(),
            degenerate_decomposition: false,
        })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn completed(&self) -> Phase {
        self.completed
    }

    /// Executor audit records; empty until [`Phase::Executed`].
    pub fn records(&self) -> &[GenerationRecord] {
        &self.records
    }

    pub fn degenerate_decomposition(&self) -> bool {
        self.degenerate_decomposition
    }

    /// Run `phase`, which must directly follow the last completed one.
    #[instrument(skip_all, fields(phase = %phase, completed = %self.completed))]
    pub fn run_phase<G: Generator>(&mut self, phase: Phase, generator: &G) -> Result<PhaseReport> {
        let order_error = PhaseOrderError {
            completed: self.completed,
            requested: phase,
        };
        if self.completed.next() != Some(phase) {
            return Err(order_error.into());
        }

        let budget = self.config.prompt_budget_bytes;
        let report = match phase {
            Phase::Created => return Err(order_error.into()),
            Phase::Decomposed => {
                let outcome = AreaDecomposer::new(budget).run(generator, &mut self.graph)?;
                self.degenerate_decomposition = outcome.degenerate;
                PhaseReport::Decomposed(outcome)
            }
            Phase::Planned => PhaseReport::Planned(SubtaskPlanner::new(budget).run(generator, &mut self.graph)?),
            Phase::Refined if !self.config.refine => {
                info!("refinement disabled");
                PhaseReport::Refined(None)
            }
            Phase::Refined => PhaseReport::Refined(Some(
                RecursiveRefiner::new(budget, self.config.max_refine_depth)
                    .refine_all(generator, &mut self.graph)?,
            )),
            Phase::Executed => {
                self.records = PostOrderExecutor::new(&self.config).run(generator, &mut self.graph)?;
                PhaseReport::Executed {
                    generations: self.records.len(),
                }
            }
        };

        self.completed = phase;
        info!(phase = %phase, nodes = self.graph.len(), "phase complete");
        Ok(report)
    }

    /// Run every remaining phase in order.
    pub fn run_all<G: Generator>(&mut self, generator: &G) -> Result<Vec<PhaseReport>> {
        let mut reports = Vec::new();
        while let Some(phase) = self.completed.next() {
            let report = self
                .run_phase(phase, generator)
                .with_context(|| format!("run phase {phase}"))?;
            reports.push(report);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::QueuedGenerator;

    #[test]
    fn phases_follow_each_other() {
        assert_eq!(Phase::Created.next(), Some(Phase::Decomposed));
        assert_eq!(Phase::Refined.next(), Some(Phase::Executed));
        assert_eq!(Phase::Executed.next(), None);
        assert_eq!(Phase::RUNNABLE.len(), 4);
    }

    #[test]
    fn out_of_order_phase_is_rejected_without_calling_the_generator() {
        let mut pipeline =
            Pipeline::new("Plan a trip", "", PlannerConfig::default()).expect("pipeline");
        let generator = QueuedGenerator::default();

        let err = pipeline.run_phase(Phase::Planned, &generator).unwrap_err();
        let order = err.downcast_ref::<PhaseOrderError>().expect("order error");
        assert_eq!(order.completed, Phase::Created);
        assert_eq!(order.requested, Phase::Planned);
        assert!(generator.calls().is_empty());

        let err = pipeline.run_phase(Phase::Created, &generator).unwrap_err();
        assert!(err.downcast_ref::<PhaseOrderError>().is_some());
    }

    #[test]
    fn failed_phase_stays_at_previous_completion() {
        let mut pipeline =
            Pipeline::new("Plan a trip", "", PlannerConfig::default()).expect("pipeline");
        let generator = QueuedGenerator::default();
        generator.push_error("backend down");

        assert!(pipeline.run_phase(Phase::Decomposed, &generator).is_err());
        assert_eq!(pipeline.completed(), Phase::Created);
    }

    #[test]
    fn empty_objective_is_rejected() {
        let err = Pipeline::new("   ", "", PlannerConfig::default()).unwrap_err();
        assert_eq!(err, GraphError::EmptyTitle);
    }
}
