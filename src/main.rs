//! smart-abl: standalone print host with the SmartABL leveling engine
//!
//! ```text
//! smart-abl run --printer 192.168.1.50:8888 --job benchy.gcode
//! smart-abl status
//! smart-abl always-relevel on
//! smart-abl check-config
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use smart_abl::config::watcher::{run_config_watcher, ConfigEvent};
use smart_abl::config::{self, defaults, AblConfig, LivePolicy, Policy};
use smart_abl::engine::{Collaborators, DecisionEngine, EngineSettings};
use smart_abl::host::{DispatchQueue, FileJob, PrintOutcome, PrintRunner, PrinterConnection};
use smart_abl::notify::TracingNotifier;
use smart_abl::storage::{CounterStore, JsonFileStore, ProcessLock, SystemClock};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "smart-abl")]
#[command(about = "Smart auto bed leveling for 3D-printer print jobs")]
#[command(version)]
struct CliArgs {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// State directory holding state.json (overrides printer.state_dir)
    #[arg(long, global = true, env = "SMARTABL_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream a G-code file to a printer through the leveling engine
    Run {
        /// Printer bridge address (overrides printer.addr)
        #[arg(long, value_name = "HOST:PORT")]
        printer: Option<String>,

        /// G-code file to print
        #[arg(long)]
        job: PathBuf,
    },

    /// Show the persisted leveling counters
    Status,

    /// Turn the "re-level before every print" override on or off
    AlwaysRelevel {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Validate the configuration and print the effective policy
    CheckConfig,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let (abl_config, source) = AblConfig::load();
    config::init(abl_config, source);

    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| config::get().printer.state_dir.clone());

    match args.command {
        Command::Run { printer, job } => run_print(printer, job, state_dir).await,
        Command::Status => show_status(&state_dir),
        Command::AlwaysRelevel { state } => set_always_relevel(&state_dir, matches!(state, Toggle::On)),
        Command::CheckConfig => check_config(),
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn build_engine(state_dir: &std::path::Path, queue: Arc<DispatchQueue>) -> DecisionEngine {
    let store: Box<dyn CounterStore> = Box::new(JsonFileStore::in_dir(state_dir));
    let collab = Collaborators {
        link: queue,
        notifier: Arc::new(TracingNotifier),
        policy: Arc::new(LivePolicy),
        clock: Arc::new(SystemClock),
    };
    DecisionEngine::new(collab, store, EngineSettings::from_config(&config::get()))
}

// ============================================================================
// Subcommands
// ============================================================================

async fn run_print(printer: Option<String>, job_path: PathBuf, state_dir: PathBuf) -> Result<()> {
    let _lock = ProcessLock::acquire(&state_dir)?;

    let addr = printer.unwrap_or_else(|| config::get().printer.addr.clone());
    let mut job = FileJob::open(&job_path).await?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  SmartABL print host");
    info!("  Printer: {} | Job: {}", addr, job_path.display());
    info!("  State:   {}", state_dir.display());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, cancelling print...");
        shutdown_token.cancel();
    });

    if let Some(path) = config::source_path() {
        spawn_config_watcher(path, cancel_token.clone());
    }

    let conn = PrinterConnection::connect(
        &addr,
        Duration::from_secs(defaults::LINK_CONNECT_TIMEOUT_SECS),
        Duration::from_secs(defaults::LINK_READ_TIMEOUT_SECS),
    )
    .await
    .with_context(|| format!("Could not reach printer at {addr}"))?;

    let queue = Arc::new(DispatchQueue::new());
    let engine = build_engine(&state_dir, queue.clone());
    let mut runner = PrintRunner::new(conn, engine, queue, cancel_token.clone());

    let summary = runner.run(&mut job).await;
    cancel_token.cancel();
    let engine = runner.finish().await;

    info!(
        job_lines = summary.job_lines,
        commands_sent = summary.commands_sent,
        counters = %engine.counters(),
        "Print finished"
    );

    match summary.outcome {
        PrintOutcome::Completed => Ok(()),
        PrintOutcome::Cancelled => {
            warn!("Print cancelled by operator");
            Ok(())
        }
        PrintOutcome::Failed(reason) => anyhow::bail!("Print failed: {reason}"),
    }
}

fn spawn_config_watcher(path: PathBuf, cancel: CancellationToken) {
    let (tx, mut rx) = mpsc::channel(8);
    tokio::spawn(run_config_watcher(path, tx, cancel));
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ConfigEvent::Reloaded(changes) if changes.is_empty() => {
                    info!("Config file touched, no effective changes");
                }
                ConfigEvent::Reloaded(changes) => {
                    for change in &changes {
                        info!("Config changed: {}", change);
                    }
                }
                ConfigEvent::Error(e) => error!("Config reload failed: {}", e),
            }
        }
    });
}

fn show_status(state_dir: &std::path::Path) -> Result<()> {
    let store = JsonFileStore::in_dir(state_dir);
    let record = store
        .load_record()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    match record {
        None => println!("No leveling state at {} yet", store.path().display()),
        Some(record) => {
            let today = chrono::Local::now().date_naive();
            let policy_source = LivePolicy;
            let policy = Policy::new(&policy_source);
            println!("{}", serde_json::to_string_pretty(&record)?);
            println!(
                "Prints since mesh: {}/{} | Mesh age: {} day(s)",
                record.prints_since_mesh,
                policy.print_threshold(),
                record.days_since_mesh(today)
            );
        }
    }
    Ok(())
}

fn set_always_relevel(state_dir: &std::path::Path, enabled: bool) -> Result<()> {
    let _lock = ProcessLock::acquire(state_dir)?;
    let mut engine = build_engine(state_dir, Arc::new(DispatchQueue::new()));
    engine.set_always_relevel(enabled);
    println!("always re-level: {}", if enabled { "on" } else { "off" });
    Ok(())
}

fn check_config() -> Result<()> {
    let cfg = config::get();
    cfg.validate().context("Configuration is invalid")?;
    match config::source_path() {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# built-in defaults"),
    }
    print!("{}", cfg.to_toml()?);
    Ok(())
}
