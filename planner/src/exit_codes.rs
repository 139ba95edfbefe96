//! Stable exit codes for planner CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, unreadable or malformed tree, failed generation phase, or
/// any other error.
pub const INVALID: i32 = 1;
/// `planner validate` found a dependency cycle in an exported tree.
pub const CYCLE: i32 = 2;
