//! Initialization helpers for `.planner/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{PlannerConfig, write_config};
use super::export::TASK_RECORD_SCHEMA;

/// All canonical paths within `.planner/` for a project root.
#[derive(Debug, Clone)]
pub struct PlannerPaths {
    pub root: PathBuf,
    pub planner_dir: PathBuf,
    pub config_path: PathBuf,
    pub schema_path: PathBuf,
    pub gitignore_path: PathBuf,
    /// Exported trees, one JSON file per run.
    pub output_dir: PathBuf,
    /// Generation logs, one directory per run.
    pub runs_dir: PathBuf,
}

impl PlannerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let planner_dir = root.join(".planner");
        Self {
            root,
            config_path: planner_dir.join("config.toml"),
            schema_path: planner_dir.join("task_record.schema.json"),
            gitignore_path: planner_dir.join(".gitignore"),
            output_dir: planner_dir.join("output"),
            runs_dir: planner_dir.join("runs"),
            planner_dir,
        }
    }

    /// Default export location for a run.
    pub fn tree_path(&self, run_id: &str) -> PathBuf {
        self.output_dir.join(format!("{run_id}.json"))
    }
}

/// Options for `init_planner`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing planner-owned files.
    pub force: bool,
}

/// Create `.planner/` scaffolding in `root`.
///
/// Fails if `.planner/` already exists unless `options.force` is set.
pub fn init_planner(root: &Path, options: &InitOptions) -> Result<PlannerPaths> {
    let paths = PlannerPaths::new(root);
    if paths.planner_dir.exists() && !paths.planner_dir.is_dir() {
        return Err(anyhow!(
            "planner init: .planner exists but is not a directory"
        ));
    }
    if paths.planner_dir.exists() && !options.force {
        return Err(anyhow!(
            "planner init: .planner already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.planner_dir)?;
    create_dir(&paths.output_dir)?;
    create_dir(&paths.runs_dir)?;

    write_config(&paths.config_path, &PlannerConfig::default())?;
    write_file(&paths.schema_path, TASK_RECORD_SCHEMA)?;
    write_file(&paths.gitignore_path, PLANNER_GITIGNORE)?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const PLANNER_GITIGNORE: &str = "output/\nruns/\n";
