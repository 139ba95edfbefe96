//! Planner configuration stored under `.planner/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Planner configuration (TOML).
///
/// Edited by humans; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    /// Deepest level the refiner may add children at, relative to the
    /// planned subtask it starts from.
    pub max_refine_depth: usize,

    /// Dependency and child results are cut to this many characters in
    /// execution prompts.
    pub max_dependency_chars: usize,

    /// Child results previewed in a node's execution prompt.
    pub max_child_previews: usize,

    /// Extra attempts after a failed generation before the error sentinel
    /// becomes the result.
    pub generation_retries: u32,

    /// Run the refinement phase at all.
    pub refine: bool,

    /// Droppable prompt sections are removed once a rendered prompt exceeds
    /// this many bytes.
    pub prompt_budget_bytes: usize,

    pub generator: GeneratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Command that reads a prompt on stdin and answers on stdout
    /// (e.g. `["llm", "-m", "gpt-4o"]`).
    pub command: Vec<String>,

    /// Per-call wall-clock limit.
    pub timeout_secs: u64,

    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 300,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_refine_depth: 3,
            max_dependency_chars: 800,
            max_child_previews: 3,
            generation_retries: 1,
            refine: true,
            prompt_budget_bytes: 40_000,
            generator: GeneratorConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_dependency_chars == 0 {
            return Err(anyhow!("max_dependency_chars must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PlannerConfig::default()`.
pub fn load_config(path: &Path) -> Result<PlannerConfig> {
    if !path.exists() {
        let cfg = PlannerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PlannerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PlannerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
