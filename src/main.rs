use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wayline_core::config::AppConfig;
use wayline_core::event::EventBus;
use wayline_core::types::{ErrorCategory, RunId};
use wayline_engine::{definitions, DefinitionStore, RunLogger, TriggerScheduler, WorkflowEngine};
use wayline_store::WorkflowStore;

#[derive(Parser)]
#[command(name = "wayline", version, about = "Graph workflow engine for agent hosts")]
struct Cli {
    /// Path to config file (default: ~/.wayline/wayline.toml)
    #[arg(short, long, env = "WAYLINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available workflow definitions
    List,
    /// Validate a definition file or a workflow id from the workflows directory
    Validate {
        /// Path to a `<id>.json` file, or a workflow id
        target: String,
    },
    /// Show the effective configuration
    Config,
    /// Start a run of a workflow
    Start {
        workflow: String,
        /// What started the run
        #[arg(long, default_value = "manual")]
        trigger_type: String,
        /// Initial state as a JSON object
        #[arg(long)]
        data: Option<String>,
    },
    /// Show the node a run is waiting on
    Next { run_id: String },
    /// Complete the current step of a run
    Complete {
        run_id: String,
        /// State updates as a JSON object
        #[arg(long)]
        updates: Option<String>,
        /// Action taken during the step (repeatable)
        #[arg(long = "action")]
        actions: Vec<String>,
        /// What the agent observed
        #[arg(long)]
        observed: Option<String>,
    },
    /// Show a run, or a workflow's focused and recent runs
    Status {
        /// Run id, workflow id, or workflow name
        target: String,
    },
    /// Cancel a running run
    Cancel { run_id: String },
    /// Record an error against a run
    Error {
        run_id: String,
        /// system, llm, vision, network, state, tool, human, unexpected
        category: String,
        message: String,
        #[arg(long)]
        recoverable: bool,
        #[arg(long)]
        recovery_action: Option<String>,
        /// Step sequence the error belongs to
        #[arg(long)]
        step: Option<u64>,
    },
    /// Report free text to keyword triggers
    Keyword {
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Merge state into a running run without completing a step
    PushState {
        run_id: String,
        /// State updates as a JSON object
        updates: String,
    },
    /// Run the trigger scheduler and stream engine events as JSON lines
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wayline=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| dirs_home().map(|h| h.join(".wayline").join("wayline.toml")))
        .unwrap_or_else(|| PathBuf::from("wayline.toml"));
    let config = AppConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Commands that never touch the database
    match &cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Validate { target } => return validate(&config, target),
        _ => {}
    }

    let events = Arc::new(EventBus::new(config.engine.event_capacity));
    let engine = Arc::new(open_engine(&config, events.clone())?);

    match cli.command {
        Commands::List => {
            let workflows = engine.list_workflows();
            if workflows.is_empty() {
                println!("No workflows in {}", config.workflows_dir().display());
            }
            for wf in workflows {
                println!(
                    "{:<24} {:<32} nodes={} triggers={}",
                    wf.id, wf.name, wf.node_count, wf.trigger_count
                );
            }
        }
        Commands::Start {
            workflow,
            trigger_type,
            data,
        } => {
            let data = parse_object(data.as_deref())?;
            let run_id = engine.start(&workflow, &trigger_type, data)?;
            println!("{}", run_id);
        }
        Commands::Next { run_id } => {
            let next = engine.get_next_step(&RunId::from_string(&run_id))?;
            println!("{}", serde_json::to_string_pretty(&next)?);
        }
        Commands::Complete {
            run_id,
            updates,
            actions,
            observed,
        } => {
            let updates = parse_object(updates.as_deref())?;
            let outcome = engine.complete_step(
                &RunId::from_string(&run_id),
                &updates,
                &actions,
                observed.as_deref(),
            )?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Status { target } => {
            let report = engine.get_status(&target)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Cancel { run_id } => {
            engine.cancel(&RunId::from_string(&run_id))?;
            println!("Cancelled {}", run_id);
        }
        Commands::Error {
            run_id,
            category,
            message,
            recoverable,
            recovery_action,
            step,
        } => {
            let category: ErrorCategory = category.parse()?;
            let id = engine.record_error(
                &RunId::from_string(&run_id),
                category,
                &message,
                recoverable,
                recovery_action.as_deref(),
                step,
            )?;
            println!("{}", id);
        }
        Commands::Keyword { text } => {
            let fired = engine.keyword_event(&text.join(" "));
            println!("Fired {} trigger(s)", fired);
        }
        Commands::PushState { run_id, updates } => {
            let updates = parse_object(Some(&updates))?;
            let changed = engine.push_state(&RunId::from_string(&run_id), &updates)?;
            println!("Changed: {}", changed.join(", "));
        }
        Commands::Daemon => run_daemon(&config, engine, events).await?,
        Commands::Config | Commands::Validate { .. } => {}
    }

    Ok(())
}

fn open_engine(config: &AppConfig, events: Arc<EventBus>) -> anyhow::Result<WorkflowEngine> {
    let workflows_dir = config.workflows_dir();
    std::fs::create_dir_all(&workflows_dir)
        .with_context(|| format!("creating {}", workflows_dir.display()))?;
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let definitions = Arc::new(DefinitionStore::new(workflows_dir));
    let store = Arc::new(WorkflowStore::open(&db_path)?);
    let engine = WorkflowEngine::new(definitions, store, events.clone(), events)?;
    Ok(engine)
}

fn validate(config: &AppConfig, target: &str) -> anyhow::Result<()> {
    let direct = Path::new(target);
    let path = if direct.extension().is_some_and(|ext| ext == "json") {
        direct.to_path_buf()
    } else {
        config.workflows_dir().join(format!("{}.json", target))
    };
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("definition path has no file name")?
        .to_string();

    let workflow = definitions::load_file(&path, &id)?;
    let summary = workflow.summary();
    println!(
        "{}: ok ({} nodes, {} triggers, tools: {})",
        summary.id,
        summary.node_count,
        summary.trigger_count,
        workflow.tool_set().join(", ")
    );
    Ok(())
}

async fn run_daemon(
    config: &AppConfig,
    engine: Arc<WorkflowEngine>,
    events: Arc<EventBus>,
) -> anyhow::Result<()> {
    info!(runs = engine.active_runs().len(), "Starting daemon");
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down daemon...");
        cancel_clone.cancel();
    });

    if let Some(log_dir) = config.log_dir() {
        let logger = RunLogger::new(log_dir);
        tokio::spawn(logger.run(events.clone(), cancel.clone()));
        info!("Run logger started");
    }

    let handle = if config.scheduler.enabled {
        let (scheduler, handle) =
            TriggerScheduler::new(engine.clone(), &config.scheduler, cancel.clone());
        tokio::spawn(scheduler.run());
        Some(handle)
    } else {
        warn!("Trigger scheduler disabled; time triggers will not fire");
        None
    };

    let mut event_rx = events.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = event_rx.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => error!(error = %e, "Failed to serialize event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(text)) if !text.trim().is_empty() => match handle {
                    Some(ref handle) => {
                        if let Err(e) = handle.report_keyword(text).await {
                            error!(error = %e, "Failed to report keyword");
                        }
                    }
                    None => {
                        engine.keyword_event(&text);
                    }
                },
                Ok(Some(_)) => {}
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Stopped reading stdin");
                    stdin_open = false;
                }
            },
        }
    }

    Ok(())
}

fn parse_object(raw: Option<&str>) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    match raw {
        None => Ok(serde_json::Map::new()),
        Some(text) => {
            let value: serde_json::Value =
                serde_json::from_str(text).context("expected a JSON object")?;
            match value {
                serde_json::Value::Object(map) => Ok(map),
                other => anyhow::bail!("expected a JSON object, got {}", other),
            }
        }
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
