//! Autodev - Agent Workflow Orchestrator
//!
//! Runs the Claude Code CLI through a TDD and refactor workflow with
//! reliable completion detection, usage-limit handling and retries.

use autodev::analytics::{EventLog, MetricsCollector, ObserverSet, TracingObserver, AUTODEV_DIR};
use autodev::config::{check_prerequisites, install_stop_hook, HookInstall, WorkflowConfig, SETTINGS_FILE};
use autodev::error::{AutodevError, Result};
use autodev::r#loop::{LoopManager, LoopManagerConfig, TaskTracker};
use autodev::session::signals::EXIT_INTERRUPTED;
use autodev::session::{SessionPersistence, ShutdownHandler, ShutdownHandlerConfig, ShutdownResult};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "autodev")]
#[command(version = "0.1.0")]
#[command(about = "Drive Claude Code through a TDD and refactor workflow", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".", env = "AUTODEV_PROJECT")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workflow until every task is done and no refactoring is left
    Run {
        /// Fix attempts before a task is abandoned
        #[arg(long)]
        max_fix_attempts: Option<u32>,

        /// Retries for transient command failures
        #[arg(long)]
        max_retries: Option<u32>,

        /// Seconds to wait for the completion marker
        #[arg(long)]
        signal_timeout: Option<f64>,

        /// Agent executable
        #[arg(long, env = "AUTODEV_PROGRAM")]
        program: Option<String>,

        /// Do not save a session snapshot on interrupt
        #[arg(long)]
        no_persist: bool,

        /// Append workflow events to .autodev/events.jsonl
        #[arg(long)]
        event_log: bool,
    },

    /// Install the Stop hook that signals command completion
    Init {
        /// Replace an existing Stop hook
        #[arg(long)]
        force: bool,
    },

    /// Print the next incomplete task
    Next,
}

/// Overrides for `run` taken from the command line.
struct RunArgs {
    max_fix_attempts: Option<u32>,
    max_retries: Option<u32>,
    signal_timeout: Option<f64>,
    program: Option<String>,
    no_persist: bool,
    event_log: bool,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        "autodev=debug,info"
    } else {
        "autodev=info,warn"
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Run {
            max_fix_attempts,
            max_retries,
            signal_timeout,
            program,
            no_persist,
            event_log,
        } => {
            let args = RunArgs {
                max_fix_attempts,
                max_retries,
                signal_timeout,
                program,
                no_persist,
                event_log,
            };
            run_workflow(&project_path, args).await
        }
        Commands::Init { force } => init_project(&project_path, force).map(|()| 0),
        Commands::Next => print_next_task(&project_path).map(|()| 0),
    };

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run_workflow(project: &Path, args: RunArgs) -> Result<i32> {
    let mut workflow = WorkflowConfig::load(project)?;
    if let Some(max_fix_attempts) = args.max_fix_attempts {
        workflow.max_fix_attempts = max_fix_attempts;
    }
    if let Some(max_retries) = args.max_retries {
        workflow.retry.max_retries = max_retries;
    }
    if let Some(timeout) = args.signal_timeout {
        workflow.signal.timeout_secs = timeout;
    }
    if let Some(program) = args.program {
        workflow.program = program;
    }
    workflow.validate()?;

    for missing in check_prerequisites(project, &workflow)? {
        println!(
            "{} {} not found, continuing without it",
            "Warning:".yellow().bold(),
            missing.display()
        );
    }
    if which::which(&workflow.program).is_err() {
        return Err(AutodevError::MissingTool {
            tool: workflow.program.clone(),
        });
    }

    let persistence = SessionPersistence::new(project.join(AUTODEV_DIR));
    if let Ok(Some(previous)) = persistence.load() {
        warn!(
            "Previous session {} was interrupted in state {} (task: {})",
            previous.session_id,
            previous.state,
            previous.current_task.as_deref().unwrap_or("-")
        );
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let metrics = Arc::new(MetricsCollector::new());
    let mut observers = ObserverSet::new()
        .with(Arc::new(TracingObserver))
        .with(metrics.clone());
    if args.event_log {
        observers = observers.with(Arc::new(EventLog::new(project, session_id.clone())));
    }

    let config = LoopManagerConfig::new(project.to_path_buf(), workflow).with_session_id(session_id);
    let mut manager = LoopManager::new(config, Arc::new(observers))?;

    let handler = ShutdownHandler::new(ShutdownHandlerConfig {
        persist: !args.no_persist,
    })
    .with_persistence(persistence.clone(), manager.snapshot_handle());

    let shutdown = async {
        match handler.wait_for_shutdown().await {
            Ok(result) => result,
            Err(e) => {
                warn!("Signal handling unavailable: {}", e);
                std::future::pending::<ShutdownResult>().await
            }
        }
    };

    let outcome = tokio::select! {
        result = manager.run() => Some(result),
        shutdown_result = shutdown => {
            info!("Shutdown complete: {:?}", shutdown_result);
            None
        }
    };

    metrics.summary().print();

    match outcome {
        Some(Ok(_)) => {
            if let Err(e) = persistence.delete() {
                warn!("Could not remove stale session file: {}", e);
            }
            Ok(0)
        }
        Some(Err(e)) => Err(e),
        None => {
            println!("{} Interrupted", "Stopped:".yellow().bold());
            Ok(EXIT_INTERRUPTED)
        }
    }
}

fn init_project(project: &Path, force: bool) -> Result<()> {
    let workflow = WorkflowConfig::load(project)?;
    match install_stop_hook(project, &workflow.signal.marker, force)? {
        HookInstall::Created => {
            println!("{} Created {}", "OK".green().bold(), SETTINGS_FILE);
        }
        HookInstall::Updated => {
            println!("{} Added Stop hook to {}", "OK".green().bold(), SETTINGS_FILE);
        }
        HookInstall::AlreadyPresent => {
            println!(
                "{} Stop hook already configured in {} (use --force to replace it)",
                "Skipped:".yellow().bold(),
                SETTINGS_FILE
            );
        }
    }
    Ok(())
}

fn print_next_task(project: &Path) -> Result<()> {
    let workflow = WorkflowConfig::load(project)?;
    check_prerequisites(project, &workflow)?;

    let mut tracker = TaskTracker::new(project.join(&workflow.plan_file), workflow.max_fix_attempts);
    let counts = tracker.counts()?;
    match tracker.get_next_task()? {
        Some(task) => println!("{} {}", "Next:".bright_cyan().bold(), task),
        None => println!("{} all tasks complete", "Done:".bright_green().bold()),
    }
    println!(
        "   {} of {} tasks complete",
        counts.complete,
        counts.total()
    );
    Ok(())
}
