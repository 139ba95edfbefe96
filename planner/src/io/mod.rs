//! I/O helpers: generator processes, prompts, config and exported files.

pub mod config;
pub mod export;
pub mod generator;
pub mod init;
pub mod process;
pub mod prompt;
pub mod run_log;
