#![forbid(unsafe_code)]

//! `canvas-spawn` — launch a terminal canvas and wait for the user's choice.
//!
//! Loads configuration, derives this terminal's scope, and drives one
//! command: run a canvas, report pane status, or clean up orphaned panes.
//! Results are printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use canvas_spawn::config::{GlobalConfig, MAX_SELECTION_SECONDS};
use canvas_spawn::orchestrator::{
    CanvasRequest, CanvasResolver, CanvasSpawner, ConfigResolver, SpawnOptions,
};
use canvas_spawn::pane::{FileScopeStore, PaneManager, ScopeContext, TmuxBackend};
use canvas_spawn::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "canvas-spawn", about = "Terminal canvas launcher", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show a canvas and print its result.
    Run {
        /// Registered canvas kind.
        kind: String,

        /// Scenario to render.
        #[arg(long, default_value = "default")]
        scenario: String,

        /// Canvas configuration as a JSON document.
        #[arg(long)]
        canvas_config: Option<String>,

        /// Seconds to wait for a decision; overrides `[timeouts]`.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_SELECTION_SECONDS))]
        timeout_secs: Option<u64>,

        /// Return once the canvas is displayed.
        #[arg(long)]
        no_wait: bool,

        /// Instance id to use instead of a generated one.
        #[arg(long)]
        id: Option<String>,
    },

    /// Print this terminal's pane ownership state.
    Status,

    /// Kill orphaned canvas panes.
    Cleanup {
        /// Only report what would be killed.
        #[arg(long)]
        dry_run: bool,
    },

    /// List registered canvas kinds.
    Kinds,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let outcome = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(%err, "canvas-spawn failed");
            ExitCode::FAILURE
        }
    }
}

/// Execute the selected command; `Ok(false)` means a reported failure.
async fn run(args: Cli) -> Result<bool> {
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    info!(socket_dir = %config.socket_dir.display(), "configuration loaded");

    let resolver = Arc::new(ConfigResolver::from_config(&config));

    match args.command {
        Command::Run {
            kind,
            scenario,
            canvas_config,
            timeout_secs,
            no_wait,
            id,
        } => {
            let canvas_config = match canvas_config {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|err| AppError::Config(format!("invalid --canvas-config: {err}")))?,
                None => serde_json::Value::Null,
            };
            let request = CanvasRequest {
                kind,
                scenario,
                config: canvas_config,
                timeout: timeout_secs
                    .map_or_else(|| config.selection_timeout(), Duration::from_secs),
                wait_for_result: !no_wait,
                instance_id: id,
            };

            let spawner = CanvasSpawner::new(
                Arc::new(build_pane_manager(&config)?),
                resolver,
                SpawnOptions::from_config(&config),
            );

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            let signal_task = tokio::spawn(async move {
                shutdown_signal().await;
                warn!("signal received, abandoning canvas");
                signal_cancel.cancel();
            });

            let result = spawner.run_canvas_with_cancel(request, cancel).await;
            signal_task.abort();

            print_json(&result)?;
            Ok(result.success)
        }
        Command::Status => {
            let status = build_pane_manager(&config)?.pane_status().await?;
            print_json(&status)?;
            Ok(true)
        }
        Command::Cleanup { dry_run } => {
            let orphans = build_pane_manager(&config)?
                .cleanup_orphans(dry_run)
                .await?;
            info!(count = orphans.len(), dry_run, "cleanup finished");
            print_json(&orphans)?;
            Ok(true)
        }
        Command::Kinds => {
            print_json(&resolver.kinds())?;
            Ok(true)
        }
    }
}

fn build_pane_manager(config: &GlobalConfig) -> Result<PaneManager> {
    let context = ScopeContext::from_env()?;
    if context.session.is_none() {
        warn!("not running inside tmux; pane scope falls back to the working directory");
    }
    let store = FileScopeStore::open(config.state_dir.join("scopes"))?;
    Ok(PaneManager::new(
        Arc::new(TmuxBackend::new(config.panes.tmux_bin.clone())),
        Arc::new(store),
        context,
        config.pane_settings()?,
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Io(format!("failed to serialize output: {err}")))?;
    println!("{json}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
