#![forbid(unsafe_code)]

//! `canvas-peer` — headless canvas for scripting and smoke tests.
//!
//! Connects to the controller's rendezvous socket, announces itself with
//! `ready`, answers controller queries, and optionally answers with a
//! scripted selection, cancellation, or error. Without `--socket` it only
//! logs that it is on display. If the controller cannot be reached it keeps
//! going in degraded mode and exits successfully.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use canvas_spawn::ipc::{connect_with_retry, CanvasMessage, ControllerMessage, PeerEvent, RetryPolicy};
use canvas_spawn::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "canvas-peer", about = "Headless canvas process", version, long_about = None)]
struct Cli {
    /// Instance id assigned by the controller.
    #[arg(long, default_value = "standalone")]
    id: String,

    /// Scenario to announce in `ready`.
    #[arg(long, default_value = "default")]
    scenario: String,

    /// Canvas configuration as a JSON document.
    #[arg(long)]
    config: Option<String>,

    /// Controller rendezvous socket; display-only when omitted.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Reply with `selected` carrying this JSON payload.
    #[arg(long, conflicts_with_all = ["cancel", "error"])]
    select: Option<String>,

    /// Reply with `cancelled`.
    #[arg(long, conflicts_with = "error")]
    cancel: bool,

    /// Reason attached to `--cancel`.
    #[arg(long, requires = "cancel")]
    reason: Option<String>,

    /// Reply with `error` carrying this message.
    #[arg(long)]
    error: Option<String>,

    /// Pause before sending the scripted reply.
    #[arg(long, default_value_t = 0)]
    reply_after_ms: u64,

    /// Connection attempts before giving up.
    #[arg(long, default_value_t = 10)]
    connect_attempts: u32,

    /// Pause between connection attempts.
    #[arg(long, default_value_t = 100)]
    connect_delay_ms: u64,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    /// Scripted terminal reply, if any.
    fn reply(&self) -> Result<Option<CanvasMessage>> {
        if let Some(raw) = &self.select {
            let data = serde_json::from_str(raw)
                .map_err(|err| AppError::Config(format!("invalid --select payload: {err}")))?;
            return Ok(Some(CanvasMessage::Selected { data }));
        }
        if self.cancel {
            return Ok(Some(CanvasMessage::Cancelled {
                reason: self.reason.clone(),
            }));
        }
        Ok(self
            .error
            .as_ref()
            .map(|message| CanvasMessage::Error {
                message: message.clone(),
            }))
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let outcome = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "canvas-peer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let mut config: Value = match &args.config {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| AppError::Config(format!("invalid --config: {err}")))?,
        None => Value::Null,
    };
    let reply = args.reply()?;

    let Some(socket) = &args.socket else {
        info!(id = %args.id, scenario = %args.scenario, "display-only canvas, no controller");
        return Ok(());
    };

    let policy = RetryPolicy {
        max_attempts: args.connect_attempts,
        delay: Duration::from_millis(args.connect_delay_ms),
    };
    let mut connection = match connect_with_retry(socket, policy).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(%err, "controller unreachable, running without it");
            return Ok(());
        }
    };

    connection.send(CanvasMessage::Ready {
        scenario: args.scenario.clone(),
    })?;
    info!(id = %args.id, "announced ready");

    let mut selection = Value::Null;
    let reply_timer = tokio::time::sleep(Duration::from_millis(args.reply_after_ms));
    tokio::pin!(reply_timer);
    let mut pending_reply = reply;

    loop {
        tokio::select! {
            () = &mut reply_timer, if pending_reply.is_some() => {
                if let Some(message) = pending_reply.take() {
                    if let CanvasMessage::Selected { data } = &message {
                        selection = data.clone();
                    }
                    info!(reply = ?message, "sending scripted reply");
                    connection.send(message)?;
                }
            }

            event = connection.recv() => {
                match event {
                    Some(PeerEvent::Message(message)) => match message {
                        ControllerMessage::Ping => connection.send(CanvasMessage::Pong)?,
                        ControllerMessage::GetSelection => connection.send(CanvasMessage::Selection {
                            data: selection.clone(),
                        })?,
                        ControllerMessage::GetContent => connection.send(CanvasMessage::Content {
                            data: config.clone(),
                        })?,
                        ControllerMessage::Update { config: next } => {
                            debug!("config replaced by controller");
                            config = next;
                        }
                        ControllerMessage::Close => {
                            info!("controller asked canvas to close");
                            break;
                        }
                        ControllerMessage::Unknown => debug!("ignoring unknown controller message"),
                    },
                    Some(PeerEvent::Malformed(error)) => {
                        warn!(%error, "skipping malformed controller message");
                    }
                    None => {
                        info!("controller went away");
                        break;
                    }
                }
            }
        }
    }

    connection.close().await;
    Ok(())
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
