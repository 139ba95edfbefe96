//! Objective planner: turns one free-form objective into a tree of subtasks,
//! then executes the tree bottom-up into results.
//!
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (task graph, ordering, response
//!   parsing, sibling dependency resolution). No I/O.
//! - **[`io`]**: Side effects (generator processes, prompt rendering, config,
//!   exported files).
//! - **[`agents`]**: The decompose, plan, refine and execute phases, each
//!   driving a [`io::generator::Generator`] against the graph.
//!
//! [`pipeline`] sequences the phases for one objective and [`session`] keeps
//! several pipelines in memory under ids.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
