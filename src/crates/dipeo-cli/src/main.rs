//! # dipeo-cli
//!
//! Runs, converts and inspects DiPeO diagrams against an in-process
//! engine. Exit codes: 0 success, 1 execution failed, 2 timeout,
//! 3 aborted, 4 diagram load/validate error.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dipeo_diagram::DiagramFormat;
use dipeo_domain::{DiagramId, ExecutionId, Status};
use dipeo_engine::{CancelToken, Engine, EngineConfig, ExecuteOptions, Runtime};
use dipeo_state::{ExecutionFilter, JsonFileStateRepository, StateRepository};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

mod display;

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_TIMEOUT: u8 = 2;
const EXIT_ABORTED: u8 = 3;
const EXIT_LOAD_ERROR: u8 = 4;

#[derive(Parser)]
#[command(name = "dipeo")]
#[command(about = "DiPeO - run and manage workflow diagrams", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose engine logging
    #[arg(long, global = true)]
    debug: bool,

    /// Directory for persisted execution state
    #[arg(long, global = true, default_value = ".dipeo")]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a diagram and stream its progress
    Run {
        /// Diagram file (format auto-detected)
        diagram: PathBuf,

        /// Force a format instead of auto-detection
        #[arg(short, long)]
        format: Option<String>,

        /// Input variables as a JSON object
        #[arg(long)]
        input_data: Option<String>,

        /// Abort the execution after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout: u64,

        /// Suppress the live event display
        #[arg(long)]
        simple: bool,
    },

    /// Convert a diagram between formats
    Convert {
        /// Input diagram file
        input: PathBuf,

        /// Output file; its extension picks the target format
        output: PathBuf,

        /// Force the target format
        #[arg(short, long)]
        to: Option<String>,
    },

    /// Print node/arrow/person statistics for a diagram
    Stats {
        /// Diagram file
        diagram: PathBuf,
    },

    /// Show the persisted state of an execution
    Monitor {
        /// Execution ID, or omit to list recent executions
        execution_id: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let code = runtime.block_on(dispatch(cli));
    ExitCode::from(code)
}

async fn dispatch(cli: Cli) -> u8 {
    let result = match cli.command {
        Commands::Run {
            diagram,
            format,
            input_data,
            timeout,
            simple,
        } => {
            return run_diagram(
                &cli.base_dir,
                &diagram,
                format.as_deref(),
                input_data.as_deref(),
                Duration::from_secs(timeout),
                simple,
            )
            .await;
        }
        Commands::Convert { input, output, to } => convert(&input, &output, to.as_deref()),
        Commands::Stats { diagram } => stats(&diagram),
        Commands::Monitor { execution_id } => {
            monitor(&cli.base_dir, execution_id.as_deref()).await
        }
    };

    match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_LOAD_ERROR
        }
    }
}

fn load_domain(
    path: &Path,
    format: Option<&str>,
) -> anyhow::Result<dipeo_domain::DomainDiagram> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    dipeo_diagram::deserialize_to_domain(&content, format, path.to_str())
        .with_context(|| format!("parsing {}", path.display()))
}

async fn run_diagram(
    base_dir: &Path,
    diagram_path: &Path,
    format: Option<&str>,
    input_data: Option<&str>,
    timeout: Duration,
    simple: bool,
) -> u8 {
    let compiled = match load_and_compile(diagram_path, format) {
        Ok(compiled) => Arc::new(compiled),
        Err(e) => {
            eprintln!("error: {e:#}");
            return EXIT_LOAD_ERROR;
        }
    };

    let variables: BTreeMap<String, Value> = match input_data {
        Some(raw) => match serde_json::from_str::<BTreeMap<String, Value>>(raw) {
            Ok(vars) => vars,
            Err(e) => {
                eprintln!("error: --input-data must be a JSON object: {e}");
                return EXIT_LOAD_ERROR;
            }
        },
        None => BTreeMap::new(),
    };

    let repo: Arc<dyn StateRepository> = match JsonFileStateRepository::new(base_dir) {
        Ok(repo) => Arc::new(repo),
        Err(e) => {
            eprintln!("error: cannot open state directory: {e}");
            return EXIT_LOAD_ERROR;
        }
    };
    let runtime = Runtime::new(EngineConfig::default(), repo, |_| {});
    runtime.spawn_observers();

    let execution_id = ExecutionId::generate();
    let diagram_name = diagram_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "diagram".to_string());
    let format_name = format
        .map(String::from)
        .or_else(|| {
            diagram_path
                .to_str()
                .and_then(DiagramFormat::from_path)
                .map(|f| f.to_string())
        })
        .unwrap_or_else(|| "auto".to_string());
    runtime.router.register_cli_session(
        execution_id.clone(),
        diagram_name.clone(),
        format_name,
    );

    let display = if simple {
        None
    } else {
        Some(display::spawn_event_display(&runtime, &execution_id))
    };

    // Ctrl-C trips the execution's cancellation signal.
    let cancel = CancelToken::new();
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received, aborting execution");
            ctrlc_cancel.cancel();
        }
    });

    println!("Running {} as {}", diagram_name, execution_id);
    let engine = Engine::new(runtime.clone());
    let outcome = engine
        .execute(
            compiled,
            ExecuteOptions {
                execution_id: Some(execution_id.clone()),
                diagram_id: Some(DiagramId::new(diagram_name)),
                variables,
                timeout: Some(timeout),
                is_sub_diagram: false,
                cancel: Some(cancel),
            },
        )
        .await;

    if let Some(display) = display {
        display.finish().await;
    }
    runtime.router.unregister_cli_session(&execution_id);

    match outcome {
        Ok(state) => {
            let code = match state.status {
                Status::Completed | Status::MaxiterReached => {
                    println!("Execution completed ({})", state.status);
                    EXIT_OK
                }
                Status::Aborted => {
                    eprintln!("Execution aborted");
                    EXIT_ABORTED
                }
                Status::Failed => {
                    let error = state.error.clone().unwrap_or_default();
                    eprintln!("Execution failed: {error}");
                    if error.contains("timed out") {
                        EXIT_TIMEOUT
                    } else {
                        EXIT_FAILED
                    }
                }
                other => {
                    eprintln!("Execution ended in unexpected status {other}");
                    EXIT_FAILED
                }
            };
            print_results(&state);
            code
        }
        Err(e) => {
            eprintln!("Execution error: {e}");
            EXIT_FAILED
        }
    }
}

fn load_and_compile(
    path: &Path,
    format: Option<&str>,
) -> anyhow::Result<dipeo_compiler::ExecutableDiagram> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    // Pre-compiled diagrams skip re-validation.
    if dipeo_diagram::is_executable_format(&content) {
        return Ok(dipeo_diagram::deserialize_to_executable(&content)?);
    }

    let domain = dipeo_diagram::deserialize_to_domain(&content, format, path.to_str())?;
    let options = dipeo_compiler::CompileOptions {
        base_path: path.parent().map(PathBuf::from),
        ..Default::default()
    };
    Ok(dipeo_compiler::compile_with_options(&domain, &options)?)
}

fn print_results(state: &dipeo_domain::ExecutionState) {
    if state.token_usage.total > 0 {
        println!(
            "Tokens: {} in / {} out / {} total",
            state.token_usage.input, state.token_usage.output, state.token_usage.total
        );
    }
}

fn convert(input: &Path, output: &Path, to: Option<&str>) -> anyhow::Result<()> {
    let domain = load_domain(input, None)?;
    let target = match to {
        Some(name) => name.parse::<DiagramFormat>()?,
        None => output
            .to_str()
            .and_then(DiagramFormat::from_path)
            .context("cannot infer target format from output extension; pass --to")?,
    };
    let serialized = dipeo_diagram::serialize_from_domain(&domain, target)?;
    std::fs::write(output, serialized)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Converted {} -> {} ({target})", input.display(), output.display());
    Ok(())
}

fn stats(path: &Path) -> anyhow::Result<()> {
    let domain = load_domain(path, None)?;
    println!("Diagram: {}", path.display());
    println!("  nodes:   {}", domain.nodes.len());
    println!("  arrows:  {}", domain.arrows.len());
    println!("  persons: {}", domain.persons.len());

    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for node in &domain.nodes {
        *by_type.entry(node.node_type.as_str()).or_insert(0) += 1;
    }
    for (node_type, count) in by_type {
        println!("    {node_type}: {count}");
    }
    Ok(())
}

async fn monitor(base_dir: &Path, execution_id: Option<&str>) -> anyhow::Result<()> {
    let repo = JsonFileStateRepository::new(base_dir)?;
    match execution_id {
        Some(id) => {
            let state = repo
                .get_execution(&ExecutionId::new(id))
                .await?
                .with_context(|| format!("no persisted execution '{id}'"))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        None => {
            let executions = repo
                .list_executions(&ExecutionFilter {
                    limit: 20,
                    ..Default::default()
                })
                .await?;
            if executions.is_empty() {
                println!("no persisted executions under {}", base_dir.display());
            }
            for state in executions {
                println!(
                    "{}  {}  {}",
                    state.id,
                    state.status,
                    state
                        .started_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
