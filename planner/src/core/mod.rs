//! Deterministic, pure logic for the task graph.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod error;
pub mod graph;
pub mod ordering;
pub mod parse;
pub mod siblings;
pub mod types;
