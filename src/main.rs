//! AutoPR CLI - pull-request automation orchestrator

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};

use autopr::actions::builtin_registry;
use autopr::detect::{Detector, RepoSnapshot};
use autopr::error::{AutoPrError, FixSuggestion};
use autopr::event::read_trace;
use autopr::{AutoPrConfig, Engine, RunStatus, Services, StateStore, WorkItem, WorkflowSpec};

#[derive(Parser)]
#[command(name = "autopr")]
#[command(about = "AutoPR - pull-request automation orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file against a PR
    Run {
        /// Path to the workflow YAML file
        workflow: PathBuf,

        /// Workflow inputs as key=value pairs
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Repository the run targets
        #[arg(long, default_value = "local/workspace")]
        repo: String,

        /// Pull request number
        #[arg(long, default_value_t = 1)]
        pr: u64,
    },

    /// Validate a workflow file (parse + structural checks only)
    Validate {
        /// Path to the workflow YAML file
        workflow: PathBuf,
    },

    /// Detect the platform of a repository
    Detect {
        /// Path to the repository to score
        repo_path: PathBuf,
    },

    /// Inspect persisted runs
    Trace {
        #[command(subcommand)]
        action: TraceAction,
    },
}

#[derive(Subcommand)]
enum TraceAction {
    /// List persisted runs, newest first
    List {
        /// Show only the last N runs
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print the event trace of a run
    Show {
        /// Run id (as printed by `run` / `trace list`)
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    let filter = std::env::var("AUTOPR_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            workflow,
            inputs,
            repo,
            pr,
        } => run_workflow(&workflow, &inputs, &repo, pr).await,
        Commands::Validate { workflow } => validate_workflow(&workflow),
        Commands::Detect { repo_path } => detect_platform(&repo_path),
        Commands::Trace { action } => handle_trace(action),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            if let Some(fix) = e.fix_suggestion() {
                eprintln!("  {} {}", "fix:".yellow(), fix);
            }
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(err: &AutoPrError) -> ExitCode {
    match err {
        AutoPrError::Config { .. } => ExitCode::from(4),
        // Misuse of the CLI surface (bad inputs, bad paths)
        AutoPrError::InvalidInput { .. } | AutoPrError::Io(_) => ExitCode::from(2),
        _ => ExitCode::from(3),
    }
}

async fn run_workflow(
    path: &PathBuf,
    raw_inputs: &[String],
    repo: &str,
    pr: u64,
) -> Result<ExitCode, AutoPrError> {
    let yaml = std::fs::read_to_string(path)?;
    let spec = WorkflowSpec::from_yaml(&yaml)?;
    let inputs = parse_inputs(raw_inputs)?;

    let config = AutoPrConfig::load()?;
    let state_dir = config.state_dir();
    // The CLI drives the in-memory adapter set; deployments embed the
    // library and wire real gateways into Services::new.
    let (services, _handles) = Services::in_memory(config)?;
    let engine = Engine::new(builtin_registry()?, services);

    let item = WorkItem::manual(repo, pr, inputs.clone());
    let (report, events) = engine.run(&spec, item, inputs).await?;

    StateStore::new(state_dir).save_run(&report, &spec, &events)?;

    let status_colored = match report.status {
        RunStatus::Ok => report.status.as_str().green(),
        RunStatus::Blocked => report.status.as_str().yellow(),
        RunStatus::Partial => report.status.as_str().yellow(),
        _ => report.status.as_str().red(),
    };
    println!("{} {} ({})", "run".cyan(), report.run_id, status_colored);
    println!("{}", report.message);
    for step in &report.step_results {
        println!(
            "  {} {:?}{}",
            step.step_id,
            step.status,
            step.error
                .as_deref()
                .map(|e| format!(" - {}", e))
                .unwrap_or_default()
        );
    }

    match report.status {
        RunStatus::Failed | RunStatus::Cancelled => Ok(ExitCode::from(3)),
        _ => Ok(ExitCode::SUCCESS),
    }
}

fn validate_workflow(path: &PathBuf) -> Result<ExitCode, AutoPrError> {
    let yaml = std::fs::read_to_string(path)?;
    match WorkflowSpec::from_yaml(&yaml) {
        Ok(spec) => {
            // Structural validation includes the cycle check
            autopr::StepGraph::from_spec(&spec).detect_cycles()?;
            println!(
                "{} {} (version {}, {} steps)",
                "valid:".green().bold(),
                spec.name,
                spec.version,
                spec.steps.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{} {}", "invalid:".red().bold(), e);
            if let Some(fix) = e.fix_suggestion() {
                eprintln!("  {} {}", "fix:".yellow(), fix);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn detect_platform(repo_path: &PathBuf) -> Result<ExitCode, AutoPrError> {
    let root = Utf8PathBuf::from_path_buf(repo_path.clone()).map_err(|p| {
        AutoPrError::InvalidInput {
            location: "repo_path".to_string(),
            reason: format!("path is not UTF-8: {}", p.display()),
        }
    })?;
    let snapshot = RepoSnapshot::from_dir(&root)?;
    let registry = autopr::SignatureRegistry::builtin()?;
    let result = Detector::new().detect(&registry.current(), &snapshot);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(ExitCode::SUCCESS)
}

fn handle_trace(action: TraceAction) -> Result<ExitCode, AutoPrError> {
    let config = AutoPrConfig::load()?;
    let store = StateStore::new(config.state_dir());
    match action {
        TraceAction::List { limit } => {
            let runs = store.list_runs()?;
            let shown = limit.unwrap_or(runs.len());
            for run_id in runs.iter().take(shown) {
                match store.load_run(run_id) {
                    Ok(report) => println!(
                        "{}  {}  {}  {}",
                        run_id,
                        report.workflow,
                        report.status.as_str(),
                        report.finished_at.format("%Y-%m-%d %H:%M:%S")
                    ),
                    Err(_) => println!("{}  <unreadable>", run_id),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        TraceAction::Show { run_id } => {
            let report = store.load_run(&run_id)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let trace_path = store.runs_dir().join(&run_id).join("trace.ndjson");
            if trace_path.exists() {
                for event in read_trace(&trace_path)? {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_inputs(raw: &[String]) -> Result<Value, AutoPrError> {
    let mut map = serde_json::Map::new();
    for pair in raw {
        let (key, value) = pair.split_once('=').ok_or_else(|| AutoPrError::InvalidInput {
            location: "--input".to_string(),
            reason: format!("expected key=value, got '{}'", pair),
        })?;
        // Values parse as JSON when they can, else as strings
        let parsed = serde_json::from_str(value).unwrap_or(Value::String(value.to_string()));
        map.insert(key.to_string(), parsed);
    }
    Ok(json!(map))
}
