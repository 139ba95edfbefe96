//! The four phases that grow and then execute a task graph.
//!
//! Each agent takes a [`crate::io::generator::Generator`] and mutates the
//! graph in place; none of them spawns processes or touches the filesystem.

pub mod decomposer;
pub mod executor;
pub mod planner;
pub mod refiner;
