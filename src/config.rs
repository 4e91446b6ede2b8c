//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::ipc::connector::RetryPolicy;
use crate::ipc::listener::PeerPolicy;
use crate::pane::{PaneSettings, SplitDirection};
use crate::{AppError, Result};

/// Local IPC settings shared by the listener and connector.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IpcConfig {
    /// Connection attempts a canvas makes before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts.
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    /// What the listener does with peers after the first.
    #[serde(default)]
    pub second_peer: PeerPolicy,
    /// Push the request config to the canvas with an `update` once it is ready.
    #[serde(default)]
    pub push_config_on_ready: bool,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            connect_attempts: default_connect_attempts(),
            connect_delay_ms: default_connect_delay_ms(),
            second_peer: PeerPolicy::default(),
            push_config_on_ready: false,
        }
    }
}

fn default_connect_attempts() -> u32 {
    10
}

fn default_connect_delay_ms() -> u64 {
    100
}

/// Longest accepted selection timeout, in seconds (one week).
pub const MAX_SELECTION_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Configurable timeout values (seconds) for interactive canvases.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// How long `run` waits for the user's decision.
    #[serde(default = "default_selection_seconds")]
    pub selection_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            selection_seconds: default_selection_seconds(),
        }
    }
}

fn default_selection_seconds() -> u64 {
    300
}

/// Multiplexer pane behaviour.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PaneConfig {
    /// tmux executable.
    #[serde(default = "default_tmux_bin")]
    pub tmux_bin: String,
    /// Direction of the split that hosts the canvas.
    #[serde(default)]
    pub split: SplitDirection,
    /// Size of the new pane as a percentage of the split region.
    #[serde(default = "default_size_percent")]
    pub size_percent: u8,
    /// Pause between interrupting a running canvas and respawning the pane.
    #[serde(default = "default_interrupt_grace_ms")]
    pub interrupt_grace_ms: u64,
    /// Keep the pane alive after an awaited result instead of killing it.
    #[serde(default)]
    pub retain_pane_after_result: bool,
    /// Regexes matching start commands of untagged canvas panes left by
    /// older releases.
    #[serde(default = "default_legacy_patterns")]
    pub legacy_patterns: Vec<String>,
}

impl Default for PaneConfig {
    fn default() -> Self {
        Self {
            tmux_bin: default_tmux_bin(),
            split: SplitDirection::default(),
            size_percent: default_size_percent(),
            interrupt_grace_ms: default_interrupt_grace_ms(),
            retain_pane_after_result: false,
            legacy_patterns: default_legacy_patterns(),
        }
    }
}

fn default_tmux_bin() -> String {
    "tmux".into()
}

fn default_size_percent() -> u8 {
    67
}

fn default_interrupt_grace_ms() -> u64 {
    150
}

fn default_legacy_patterns() -> Vec<String> {
    vec![r"canvas-peer\b".into(), r"\bcanvas\b.*\bshow\b".into()]
}

/// Launch template for one canvas kind.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CanvasKindConfig {
    /// Program followed by its leading arguments.
    pub command: Vec<String>,
    /// Scenario names the canvas accepts; empty accepts any.
    #[serde(default)]
    pub scenarios: Vec<String>,
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_state_dir() -> PathBuf {
    env::var_os("XDG_RUNTIME_DIR")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join("canvas-spawn")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding per-instance rendezvous sockets.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
    /// Directory holding per-scope pane tracking records.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Local IPC settings.
    #[serde(default)]
    pub ipc: IpcConfig,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Pane behaviour.
    #[serde(default)]
    pub panes: PaneConfig,
    /// Registry of launchable canvas kinds.
    #[serde(default)]
    pub canvases: HashMap<String, CanvasKindConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            socket_dir: default_socket_dir(),
            state_dir: default_state_dir(),
            ipc: IpcConfig::default(),
            timeouts: TimeoutConfig::default(),
            panes: PaneConfig::default(),
            canvases: HashMap::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Retry schedule handed to canvas processes.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.ipc.connect_attempts,
            delay: Duration::from_millis(self.ipc.connect_delay_ms),
        }
    }

    /// Default wait for a user decision.
    #[must_use]
    pub fn selection_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.selection_seconds)
    }

    /// Pane manager settings derived from `[panes]`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a legacy pattern is not a valid regex.
    pub fn pane_settings(&self) -> Result<PaneSettings> {
        Ok(PaneSettings {
            split: self.panes.split,
            size_percent: self.panes.size_percent,
            interrupt_grace: Duration::from_millis(self.panes.interrupt_grace_ms),
            legacy_patterns: compile_patterns(&self.panes.legacy_patterns)?,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.ipc.connect_attempts == 0 {
            return Err(AppError::Config(
                "ipc.connect_attempts must be greater than zero".into(),
            ));
        }

        if !(1..=MAX_SELECTION_SECONDS).contains(&self.timeouts.selection_seconds) {
            return Err(AppError::Config(format!(
                "timeouts.selection_seconds must be between 1 and {MAX_SELECTION_SECONDS}"
            )));
        }

        if !(1..=99).contains(&self.panes.size_percent) {
            return Err(AppError::Config(
                "panes.size_percent must be between 1 and 99".into(),
            ));
        }

        for (kind, canvas) in &self.canvases {
            if canvas.command.is_empty() {
                return Err(AppError::Config(format!(
                    "canvases.{kind}.command must not be empty"
                )));
            }
        }

        compile_patterns(&self.panes.legacy_patterns)?;
        Ok(())
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map_err(|err| AppError::Config(format!("invalid legacy pattern '{p}': {err}")))
        })
        .collect()
}
