//! Generator abstraction for text generation.
//!
//! The [`Generator`] trait decouples the agents from the actual model backend.
//! [`CommandGenerator`] pipes each prompt through a configured command; tests
//! use scripted generators that answer without spawning processes.

use std::fmt;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::config::GeneratorConfig;
use crate::io::process::run_command_with_timeout;

/// Environment variable carrying [`Purpose::as_str`] to the generator command.
pub const PURPOSE_ENV: &str = "PLANNER_PURPOSE";

/// Which phase is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Decompose,
    Plan,
    Refine,
    Execute,
}

impl Purpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Purpose::Decompose => "decompose",
            Purpose::Plan => "plan",
            Purpose::Refine => "refine",
            Purpose::Execute => "execute",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub purpose: Purpose,
    pub system: String,
    pub user: String,
}

/// Abstraction over text generation backends.
pub trait Generator {
    /// Produce a response for `request`. Errors are reported, never panicked.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        (**self).generate(request)
    }
}

/// Generator that spawns a configured command per request.
///
/// The command receives `system`, a blank line and `user` on stdin, and the
/// purpose in `PLANNER_PURPOSE`. Trimmed stdout is the response.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator.command must be a non-empty array"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(purpose = %request.purpose, program = %self.program))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env(PURPOSE_ENV, request.purpose.as_str());

        let input = format!("{}\n\n{}", request.system, request.user);
        let output = run_command_with_timeout(
            cmd,
            Some(input.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run generator {}", self.program))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "generator timed out");
            return Err(anyhow!("generator timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator failed");
            return Err(anyhow!(
                "generator failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy()
            ));
        }

        let response = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if response.is_empty() {
            return Err(anyhow!("generator returned empty output"));
        }
        debug!(bytes = response.len(), "generator responded");
        Ok(response)
    }
}
