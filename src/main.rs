//! Vigil - health-check, failure-detection and remediation daemon
//!
//! # Usage
//!
//! ```bash
//! # Run the engine and HTTP API (default subcommand)
//! vigil run --config vigil.toml
//!
//! # Query a running instance; exit 0 when the score is above the threshold
//! vigil status --url http://127.0.0.1:9090 --threshold 80
//!
//! # Probe every configured check once, without a server
//! vigil check --config vigil.toml --json
//! ```
//!
//! # Environment Variables
//!
//! - `VIGIL_CONFIG`: path to the TOML config (default: ./vigil.toml)
//! - `VIGIL_SERVER_ADDR`: override the HTTP bind address
//! - `VIGIL_SMTP_*`, `VIGIL_WEBHOOK_URL`: notification transports
//! - `VIGIL_CORS_ORIGINS`: comma-separated allowed origins for the API
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use vigil::api::{create_app, ApiState};
use vigil::config::{defaults, NotificationConfig, VigilConfig};
use vigil::{Engine, StatusSnapshot};

/// Request timeout for `vigil status`
const STATUS_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code when the status endpoint cannot be reached
const EXIT_UNREACHABLE: u8 = 2;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Autonomous health-check, failure-detection and remediation engine")]
#[command(version)]
struct CliArgs {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run the engine and HTTP API until Ctrl+C
    Run(RunArgs),

    /// Fetch the status snapshot from a running instance
    Status {
        /// Base URL of the running instance
        #[arg(long, env = "VIGIL_STATUS_URL", default_value = defaults::STATUS_URL)]
        url: String,
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
        /// Exit non-zero when the health score is at or below this value
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Probe every configured check once and print the snapshot
    Check {
        /// Config file (default: $VIGIL_CONFIG, then ./vigil.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
        /// Defaults to `engine.status_threshold` from the config
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Override the server address (default: "0.0.0.0:9090")
    #[arg(short, long)]
    addr: Option<String>,

    /// Config file (default: $VIGIL_CONFIG, then ./vigil.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Engine,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Engine => write!(f, "Engine"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Start the engine and stop it once the token is cancelled.
fn spawn_engine(
    task_set: &mut JoinSet<Result<TaskName>>,
    engine: Arc<Engine>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[Engine] Task starting");
        engine.start();

        cancel_token.cancelled().await;
        if !engine.stop().await {
            warn!("[Engine] Some probes or recoveries were abandoned at shutdown");
        }
        Ok(TaskName::Engine)
    });
}

/// Run the supervisor loop: monitor tasks, cancel everything on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Wait for the remaining tasks to finish their graceful shutdown.
async fn drain_tasks(task_set: &mut JoinSet<Result<TaskName>>) {
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => info!("✓ {} stopped", task_name),
            Ok(Err(e)) => warn!(error = %e, "Task failed during shutdown"),
            Err(e) => warn!(error = %e, "Task panicked during shutdown"),
        }
    }
}

// ============================================================================
// Subcommands
// ============================================================================

/// Explicit path: errors are fatal. Otherwise the usual search order.
fn load_config(path: Option<&Path>) -> Result<VigilConfig> {
    match path {
        Some(p) => {
            let mut config = VigilConfig::load_from_file(p)
                .with_context(|| format!("Failed to load config {}", p.display()))?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => Ok(VigilConfig::load()),
    }
}

async fn run_server(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Vigil {} - health checks, recovery, alerting", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let engine = Engine::from_config(&config).context("Failed to build engine from config")?;

    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.addr))?;
    info!("🌐 HTTP API listening on http://{}", config.server.addr);
    let app = create_app(ApiState::new(engine.clone()));

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    spawn_engine(&mut task_set, engine, cancel_token.clone());

    let result = run_supervisor(&mut task_set, cancel_token.clone()).await;
    cancel_token.cancel();
    drain_tasks(&mut task_set).await;

    info!("✓ Vigil shutdown complete");
    result
}

async fn fetch_status(url: &str) -> Result<StatusSnapshot> {
    let endpoint = format!("{}/api/v1/status", url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(STATUS_REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    client
        .get(&endpoint)
        .send()
        .await
        .with_context(|| format!("GET {} failed", endpoint))?
        .error_for_status()
        .with_context(|| format!("GET {} returned an error", endpoint))?
        .json::<StatusSnapshot>()
        .await
        .context("Status body was not a snapshot")
}

async fn run_status(url: &str, json: bool, threshold: Option<f64>) -> Result<ExitCode> {
    let snapshot = match fetch_status(url).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("vigil: {:#}", e);
            return Ok(ExitCode::from(EXIT_UNREACHABLE));
        }
    };
    report(&snapshot, json, threshold.unwrap_or(defaults::STATUS_THRESHOLD))
}

/// One pass needs no recovery, notification or persistence, and every
/// failure is final.
fn one_shot(config: &mut VigilConfig) {
    for check in &mut config.checks {
        check.failure_threshold = 1;
        check.recovery = None;
    }
    config.preventive.clear();
    config.notifications = NotificationConfig::default();
    config.storage.path = None;
}

async fn run_check(config: Option<&Path>, json: bool, threshold: Option<f64>) -> Result<ExitCode> {
    let mut config = load_config(config)?;
    let threshold = threshold.unwrap_or(config.engine.status_threshold);
    one_shot(&mut config);

    let engine = Engine::from_config(&config).context("Failed to build engine from config")?;
    engine.run_all_once().await;
    engine.sample_once().await;
    report(&engine.snapshot(), json, threshold)
}

fn report(snapshot: &StatusSnapshot, json: bool, threshold: f64) -> Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    } else {
        print!("{}", snapshot.render_text());
    }
    Ok(if snapshot.passes(threshold) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_tracing(json: bool, default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();

    match args.command {
        None => {
            init_tracing(args.log_json, "info");
            run_server(RunArgs::default()).await?;
            Ok(ExitCode::SUCCESS)
        }
        Some(SubCommand::Run(run)) => {
            init_tracing(args.log_json, "info");
            run_server(run).await?;
            Ok(ExitCode::SUCCESS)
        }
        Some(SubCommand::Status { url, json, threshold }) => {
            init_tracing(args.log_json, "warn");
            run_status(&url, json, threshold).await
        }
        Some(SubCommand::Check { config, json, threshold }) => {
            init_tracing(args.log_json, "warn");
            run_check(config.as_deref(), json, threshold).await
        }
    }
}
