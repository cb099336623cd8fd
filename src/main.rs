//! Shakti Grid - dual power-meter telemetry service
//!
//! # Usage
//!
//! ```bash
//! # Defaults (./shakti.toml if present)
//! cargo run --release
//!
//! # Explicit config, faster polling, JSON logs
//! ./shakti-grid --config /etc/shakti/shakti.toml --interval-ms 1000 --log-json
//! ```
//!
//! # Environment Variables
//!
//! - `SHAKTI_CONFIG`: path to the TOML config
//! - `OPENROUTER_API_KEY`: inference credential (name set by `ai.api_key_env`)
//! - `BLAND_API_KEY`: voice-call credential (name set by `escalation.api_key_env`)
//! - `SHAKTI_CORS_ORIGINS`: comma-separated origins allowed by the API
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shakti_grid::acquisition::HttpTelemetryStore;
use shakti_grid::api::{create_app, ApiState};
use shakti_grid::clock::{SharedClock, SystemClock};
use shakti_grid::config::{self, credential_from_env, AppConfig};
use shakti_grid::escalation::{CallTransport, HttpCallTransport};
use shakti_grid::llm::{HttpInferenceClient, InferenceBackend};
use shakti_grid::pipeline::{Pipeline, PipelineParts, PollerHandle};
use shakti_grid::types::EventKind;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "shakti-grid")]
#[command(about = "Shakti Grid dual power-meter telemetry pipeline")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides $SHAKTI_CONFIG and ./shakti.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP API bind address
    #[arg(long, value_name = "HOST:PORT", env = "SHAKTI_ADDR")]
    addr: Option<String>,

    /// Store poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Run the pipeline without the HTTP API
    #[arg(long)]
    no_api: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Poller,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Poller => write!(f, "Poller"),
        }
    }
}

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: Router,
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

/// Wrap the polling loop so the supervisor sees it exit.
fn spawn_poller(task_set: &mut JoinSet<Result<TaskName>>, handle: PollerHandle) {
    task_set.spawn(async move {
        handle.wait().await;
        Ok(TaskName::Poller)
    });
}

/// Wait until shutdown is requested or any task exits, then stop the rest.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("[Supervisor] All tasks spawned, monitoring...");

    let outcome = tokio::select! {
        () = cancel_token.cancelled() => {
            info!("[Supervisor] Shutdown signal received");
            Ok(())
        }
        result = task_set.join_next() => match result {
            Some(Ok(Ok(task_name))) => {
                warn!("[Supervisor] Task {} exited, stopping the rest", task_name);
                Ok(())
            }
            Some(Ok(Err(e))) => {
                error!("[Supervisor] Task failed with error: {}", e);
                Err(e)
            }
            Some(Err(e)) => {
                error!("[Supervisor] Task panicked: {}", e);
                Err(anyhow::anyhow!("Task panicked: {}", e))
            }
            None => Ok(()),
        },
    };

    cancel_token.cancel();
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => info!("[Supervisor] Task {} completed", task_name),
            Ok(Err(e)) => warn!("[Supervisor] Task ended with error during shutdown: {}", e),
            Err(e) => warn!("[Supervisor] Task join error during shutdown: {}", e),
        }
    }
    outcome
}

// ============================================================================
// Wiring
// ============================================================================

/// Inference backend. `Ok(None)` when switched off in config, `Err` with the
/// reason when it should run but cannot.
fn build_inference(cfg: &AppConfig) -> Result<Option<Arc<dyn InferenceBackend>>, String> {
    if !cfg.ai.enabled {
        return Ok(None);
    }
    let key = credential_from_env(&cfg.ai.api_key_env).map_err(|e| e.to_string())?;
    let client: Arc<dyn InferenceBackend> =
        Arc::new(HttpInferenceClient::new(&cfg.ai, key).map_err(|e| e.to_string())?);
    Ok(Some(client))
}

/// Voice-call transport, same contract as [`build_inference`].
fn build_call_transport(cfg: &AppConfig) -> Result<Option<Arc<dyn CallTransport>>, String> {
    if !cfg.escalation.enabled {
        return Ok(None);
    }
    if cfg.escalation.phone_number.trim().is_empty() {
        return Err(config::ConfigError::Component {
            component: "escalation",
            reason: "escalation.phone_number is empty".to_string(),
        }
        .to_string());
    }
    let key = credential_from_env(&cfg.escalation.api_key_env).map_err(|e| e.to_string())?;
    let client: Arc<dyn CallTransport> =
        Arc::new(HttpCallTransport::new(&cfg.escalation, key).map_err(|e| e.to_string())?);
    Ok(Some(client))
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut cfg = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::load(),
    };
    if let Some(addr) = &args.addr {
        cfg.server.addr.clone_from(addr);
    }
    if let Some(interval_ms) = args.interval_ms {
        cfg.polling.interval_ms = interval_ms;
    }
    cfg.validate().context("Invalid configuration")?;
    Ok(cfg)
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is normal
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    init_logging(args.log_json);

    let cfg = load_config(&args)?;
    let clock: SharedClock = Arc::new(SystemClock);
    let store = HttpTelemetryStore::new(&cfg.store.url, cfg.store.request_timeout(), Arc::clone(&clock))
        .context("Failed to build telemetry store client")?;
    info!(
        store = %store.url(),
        interval_ms = cfg.polling.interval_ms,
        "Shakti Grid starting"
    );

    let mut startup_warnings = Vec::new();
    let inference = match build_inference(&cfg) {
        Ok(Some(backend)) => Some(backend),
        Ok(None) => {
            info!("[AiDetector] disabled in config");
            None
        }
        Err(reason) => {
            error!("[AiDetector] disabled: {}", reason);
            startup_warnings.push(format!("AI detection disabled: {reason}"));
            None
        }
    };
    let calls = match build_call_transport(&cfg) {
        Ok(Some(transport)) => Some(transport),
        Ok(None) => {
            info!("[Escalation] disabled in config");
            None
        }
        Err(reason) => {
            error!("[Escalation] disabled: {}", reason);
            startup_warnings.push(format!("Emergency calls disabled: {reason}"));
            None
        }
    };

    let pipeline = Pipeline::assemble(
        &cfg,
        PipelineParts {
            store: Arc::new(store),
            inference,
            calls,
            clock,
        },
    );
    for warning in startup_warnings {
        pipeline.state.record_event(EventKind::Warning, warning);
    }

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    let poller = pipeline
        .controller
        .start_polling(cfg.polling.interval(), &cancel_token);

    if args.no_api {
        info!("HTTP API disabled (--no-api)");
    } else {
        let state = ApiState::new(
            Arc::clone(&pipeline.coordinator),
            poller.state_probe(),
            config::defaults::API_HISTORY_DEFAULT_LIMIT,
        );
        let listener = tokio::net::TcpListener::bind(&cfg.server.addr)
            .await
            .with_context(|| format!("Failed to bind {}", cfg.server.addr))?;
        info!(addr = %cfg.server.addr, "[HttpServer] listening");
        spawn_http_server(&mut task_set, listener, create_app(state), cancel_token.clone());
    }
    spawn_poller(&mut task_set, poller);

    let result = run_supervisor(&mut task_set, cancel_token).await;
    info!("{}", pipeline.coordinator.get_stats());
    info!("Shakti Grid shutdown complete");
    result
}
