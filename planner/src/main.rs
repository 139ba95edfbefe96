//! Objective planner CLI.
//!
//! `planner run` decomposes an objective, plans and refines subtasks, executes
//! the tree through the configured generator command, and writes the result
//! tree to `.planner/output/`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use planner::exit_codes;
use planner::io::config::load_config;
use planner::io::export::{RecordError, export_tree, load_tree, render_outline, write_tree};
use planner::io::generator::CommandGenerator;
use planner::io::init::{InitOptions, PlannerPaths, init_planner};
use planner::io::run_log::{RunMeta, write_run_log};
use planner::logging;
use planner::pipeline::Pipeline;

#[derive(Parser)]
#[command(
    name = "planner",
    version,
    about = "Turn an objective into an executed tree of subtasks"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.planner/` with a default config.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Decompose, plan, refine and execute an objective.
    Run {
        /// The objective, in plain words.
        objective: String,
        /// What the finished work should look like.
        #[arg(long, default_value = "")]
        expected_output: String,
        /// Where to write the result tree (default `.planner/output/<run>.json`).
        #[arg(long)]
        out: Option<PathBuf>,
        /// Skip the refinement phase.
        #[arg(long)]
        no_refine: bool,
        /// Override `max_refine_depth` from the config.
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// Check an exported tree against the schema and tree invariants.
    Validate {
        path: PathBuf,
    },
    /// Print an exported tree as an indented outline.
    Show {
        path: PathBuf,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            objective,
            expected_output,
            out,
            no_refine,
            max_depth,
        } => cmd_run(
            &root,
            &RunArgs {
                objective,
                expected_output,
                out,
                no_refine,
                max_depth,
            },
        ),
        Command::Validate { path } => cmd_validate(&path),
        Command::Show { path } => cmd_show(&path),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_planner(root, &InitOptions { force })?;
    println!("initialized {}", paths.planner_dir.display());
    Ok(exit_codes::OK)
}

struct RunArgs {
    objective: String,
    expected_output: String,
    out: Option<PathBuf>,
    no_refine: bool,
    max_depth: Option<usize>,
}

fn cmd_run(root: &Path, args: &RunArgs) -> Result<i32> {
    let paths = PlannerPaths::new(root);
    let mut config = load_config(&paths.config_path).context("load config")?;
    if args.no_refine {
        config.refine = false;
    }
    if let Some(depth) = args.max_depth {
        config.max_refine_depth = depth;
    }
    config.validate()?;

    let generator = CommandGenerator::new(&config.generator)?;
    let mut pipeline = Pipeline::new(&args.objective, &args.expected_output, config)
        .context("create pipeline")?;
    pipeline.run_all(&generator)?;

    let run_id = format!("run-{}", Uuid::new_v4().simple());
    let tree_path = args
        .out
        .clone()
        .unwrap_or_else(|| paths.tree_path(&run_id));
    let record = export_tree(pipeline.graph())?;
    write_tree(&tree_path, &record)?;

    let meta = RunMeta {
        run_id: run_id.clone(),
        objective: args.objective.clone(),
        node_count: pipeline.graph().len(),
        generation_count: pipeline.records().len(),
        degenerate_decomposition: pipeline.degenerate_decomposition(),
        tree_path: tree_path.clone(),
    };
    let log = write_run_log(&paths.runs_dir, &meta, pipeline.records())?;
    info!(run_id = %run_id, log = %log.dir.display(), "run complete");

    if pipeline.degenerate_decomposition() {
        eprintln!("warning: decomposition response could not be parsed; see the tree for the raw text");
    }
    println!("{}", tree_path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(path: &Path) -> Result<i32> {
    match load_tree(path) {
        Ok(record) => {
            println!("ok: {} nodes", record.walk().len());
            Ok(exit_codes::OK)
        }
        Err(err) if matches!(err.downcast_ref::<RecordError>(), Some(RecordError::Cycle { .. })) => {
            eprintln!("{:#}", err);
            Ok(exit_codes::CYCLE)
        }
        Err(err) => Err(err),
    }
}

fn cmd_show(path: &Path) -> Result<i32> {
    let record = load_tree(path)?;
    print!("{}", render_outline(&record));
    Ok(exit_codes::OK)
}
