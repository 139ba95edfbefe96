//! Run logs under `.planner/runs/<run_id>/`.
//!
//! Product artifacts, always written by `planner run` and unaffected by
//! `RUST_LOG`. `generations.jsonl` holds one executor record per line in
//! traversal order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::GenerationRecord;

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub run_id: String,
    pub objective: String,
    pub node_count: usize,
    pub generation_count: usize,
    /// The decomposition response could not be parsed.
    pub degenerate_decomposition: bool,
    pub tree_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunLogPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub generations_path: PathBuf,
}

impl RunLogPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let dir = runs_dir.join(run_id);
        Self {
            meta_path: dir.join("meta.json"),
            generations_path: dir.join("generations.jsonl"),
            dir,
        }
    }
}

pub fn write_run_log(
    runs_dir: &Path,
    meta: &RunMeta,
    records: &[GenerationRecord],
) -> Result<RunLogPaths> {
    let paths = RunLogPaths::new(runs_dir, &meta.run_id);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create run log dir {}", paths.dir.display()))?;

    let mut meta_buf = serde_json::to_string_pretty(meta).context("serialize run meta")?;
    meta_buf.push('\n');
    write_text(&paths.meta_path, &meta_buf)?;

    let mut lines = String::new();
    for record in records {
        lines.push_str(&serde_json::to_string(record).context("serialize generation record")?);
        lines.push('\n');
    }
    write_text(&paths.generations_path, &lines)?;

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
